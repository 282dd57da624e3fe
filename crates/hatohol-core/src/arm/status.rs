//! Per-arm working status for health reporting.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Working status of an arm's most recent iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmWorkingStatus {
    /// No iteration has finished yet.
    #[default]
    Init,
    Ok,
    Failure,
}

/// Snapshot of an arm's health counters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArmInfo {
    pub running: bool,
    pub stat: ArmWorkingStatus,
    pub stat_update_time: Option<DateTime<Utc>>,
    pub failure_comment: String,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub num_update: u64,
    pub num_failure: u64,
}

/// Thread-safe status tracker shared between an arm and its readers.
#[derive(Debug, Default)]
pub struct ArmStatus {
    info: RwLock<ArmInfo>,
}

impl ArmStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running_status(&self, running: bool) {
        self.write(|info| info.running = running);
    }

    /// Record a successful iteration.
    pub fn log_success(&self) {
        let now = Utc::now();
        self.write(|info| {
            info.stat = ArmWorkingStatus::Ok;
            info.stat_update_time = Some(now);
            info.last_success_time = Some(now);
            info.failure_comment.clear();
            info.num_update += 1;
        });
    }

    /// Record a failed iteration.
    pub fn log_failure(&self, comment: &str, stat: ArmWorkingStatus) {
        let now = Utc::now();
        self.write(|info| {
            info.stat = stat;
            info.stat_update_time = Some(now);
            info.last_failure_time = Some(now);
            info.failure_comment = comment.to_string();
            info.num_failure += 1;
        });
    }

    pub fn info(&self) -> ArmInfo {
        self.info
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn write(&self, f: impl FnOnce(&mut ArmInfo)) {
        let mut info = self
            .info
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut info);
    }
}
