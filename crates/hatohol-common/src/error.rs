//! Error types for Hatohol.
//!
//! Errors carry:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for the worker loops
//!
//! Structured form:
//! ```json
//! {
//!   "code": 31,
//!   "category": "incident",
//!   "message": "incident tracker 3 not found",
//!   "recoverable": false
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::TrackerId;

/// Result type alias for Hatohol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file errors.
    Config,
    /// Polling and fetching from monitored servers.
    Polling,
    /// Incident tracker communication.
    Incident,
    /// Central store access.
    Store,
    /// File I/O and serialization errors.
    Io,
    /// Thread lifecycle errors.
    Runtime,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Polling => write!(f, "polling"),
            ErrorCategory::Incident => write!(f, "incident"),
            ErrorCategory::Store => write!(f, "store"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Runtime => write!(f, "runtime"),
        }
    }
}

/// Unified error type for Hatohol.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    // Polling errors (20-29)
    #[error("polling failed: {0}")]
    Polling(String),

    // Incident errors (30-39)
    #[error("failed to send incident: {0}")]
    FailedToSendIncident(String),

    #[error("incident tracker {tracker_id} not found")]
    TrackerNotFound { tracker_id: TrackerId },

    #[error("incident tracker rejected request: {0}")]
    IncidentRejected(String),

    // Store errors (40-49)
    #[error("store operation failed: {0}")]
    Store(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Runtime errors (70-79)
    #[error("failed to spawn worker thread {name}: {reason}")]
    ThreadSpawn { name: String, reason: String },
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Polling errors
    /// - 30-39: Incident errors
    /// - 40-49: Store errors
    /// - 60-69: I/O errors
    /// - 70-79: Runtime errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::Polling(_) => 21,
            Error::FailedToSendIncident(_) => 30,
            Error::TrackerNotFound { .. } => 31,
            Error::IncidentRejected(_) => 32,
            Error::Store(_) => 40,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::ThreadSpawn { .. } => 70,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Config,
            Error::Polling(_) => ErrorCategory::Polling,
            Error::FailedToSendIncident(_)
            | Error::TrackerNotFound { .. }
            | Error::IncidentRejected(_) => ErrorCategory::Incident,
            Error::Store(_) => ErrorCategory::Store,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
            Error::ThreadSpawn { .. } => ErrorCategory::Runtime,
        }
    }

    /// Returns whether this error is potentially recoverable.
    ///
    /// Only transport-level failures are worth retrying; a request the
    /// remote side explicitly rejected stays rejected.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::Polling(_) => true,
            Error::FailedToSendIncident(_) => true,
            Error::TrackerNotFound { .. } => false,
            Error::IncidentRejected(_) => false,
            Error::Store(_) => true,
            Error::Io(_) => true,
            Error::Json(_) => false,
            Error::ThreadSpawn { .. } => false,
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

impl StructuredError {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}
