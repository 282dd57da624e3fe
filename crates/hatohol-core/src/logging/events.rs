//! Stable event names, emitted as the `event` field of log records.

/// Standard event names used in logging.
pub mod event_names {
    // Arm lifecycle
    pub const ARM_STARTED: &str = "arm.started";
    pub const ARM_STOPPED: &str = "arm.stopped";
    pub const ARM_POLL_FAILED: &str = "arm.poll_failed";
    pub const ARM_JOB_DONE: &str = "arm.job_done";

    // Self-monitoring
    pub const SELF_MONITOR_CHANGED: &str = "self_monitor.changed";
    pub const STORE_WRITE_FAILED: &str = "store.write_failed";

    // Incident sending
    pub const INCIDENT_QUEUED: &str = "incident.queued";
    pub const INCIDENT_SENT: &str = "incident.sent";
    pub const INCIDENT_RETRY: &str = "incident.retry";
    pub const INCIDENT_FAILED: &str = "incident.failed";
    pub const TRACKER_RELOADED: &str = "incident.tracker_reloaded";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";

    /// Every name above, for uniqueness checks.
    pub const ALL: &[&str] = &[
        ARM_STARTED,
        ARM_STOPPED,
        ARM_POLL_FAILED,
        ARM_JOB_DONE,
        SELF_MONITOR_CHANGED,
        STORE_WRITE_FAILED,
        INCIDENT_QUEUED,
        INCIDENT_SENT,
        INCIDENT_RETRY,
        INCIDENT_FAILED,
        TRACKER_RELOADED,
        CONFIG_LOADED,
        CONFIG_DEFAULT_USED,
    ];
}

#[cfg(test)]
mod tests {
    use super::event_names;
    use std::collections::HashSet;

    #[test]
    fn test_event_names_unique_and_dotted() {
        let unique: HashSet<_> = event_names::ALL.iter().collect();
        assert_eq!(unique.len(), event_names::ALL.len());
        for name in event_names::ALL {
            let (component, action) = name.split_once('.').unwrap();
            assert!(!component.is_empty() && !action.is_empty(), "{}", name);
        }
    }
}
