//! Exit codes for the hatohol-core CLI.
//!
//! Exit code ranges:
//! - 0-1: Operational outcomes
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors (bugs, should be reported)

/// Exit codes for hatohol-core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success, every self-monitor trigger clear.
    Clean = 0,

    /// A simulation ended with at least one trigger in PROBLEM.
    ProblemsFound = 1,

    /// Invalid arguments
    ArgsError = 10,

    /// Configuration missing, unparseable or invalid
    ConfigError = 11,

    /// Unexpected internal failure
    InternalError = 20,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean | ExitCode::ProblemsFound)
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}
