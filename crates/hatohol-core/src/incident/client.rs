//! The tracker-side send capability and the built-in in-house tracker.

use chrono::Utc;
use hatohol_common::{EventInfo, IncidentInfo, TrackerId};
use thiserror::Error;

use super::tracker::TrackerConfig;

/// Result of a failed send.
///
/// Only [`SendError::FailedToSend`] is worth retrying; everything else means
/// the tracker (or we) decided the request can never succeed as is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Transport-level failure: unreachable host, timeout, 5xx.
    #[error("failed to send to incident tracker: {0}")]
    FailedToSend(String),

    /// The tracker answered and refused the request.
    #[error("incident tracker rejected the request: {0}")]
    Rejected(String),

    #[error("incident tracker {0} not found")]
    TrackerNotFound(TrackerId),

    #[error("unsupported tracker operation: {0}")]
    Unsupported(String),

    /// The sender shut down before the job ran.
    #[error("cancelled before sending")]
    Cancelled,
}

impl SendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::FailedToSend(_))
    }

    /// Stable short code for logs and status payloads.
    pub fn code(&self) -> &'static str {
        match self {
            SendError::FailedToSend(_) => "failed_to_send",
            SendError::Rejected(_) => "rejected",
            SendError::TrackerNotFound(_) => "tracker_not_found",
            SendError::Unsupported(_) => "unsupported",
            SendError::Cancelled => "cancelled",
        }
    }
}

impl From<SendError> for hatohol_common::Error {
    fn from(err: SendError) -> Self {
        match err {
            SendError::FailedToSend(msg) => hatohol_common::Error::FailedToSendIncident(msg),
            SendError::TrackerNotFound(tracker_id) => {
                hatohol_common::Error::TrackerNotFound { tracker_id }
            }
            other => hatohol_common::Error::IncidentRejected(other.to_string()),
        }
    }
}

/// Network (or local) operations against one incident tracker.
///
/// Calls block the sender's worker thread; implementations apply their own
/// transport timeouts.
pub trait IncidentTrackerClient: Send {
    fn create_incident(
        &mut self,
        tracker: &TrackerConfig,
        event: &EventInfo,
    ) -> Result<IncidentInfo, SendError>;

    /// Push a status change or comment. Returns the incident as the tracker
    /// now reports it.
    fn update_incident(
        &mut self,
        tracker: &TrackerConfig,
        incident: &IncidentInfo,
        comment: &str,
    ) -> Result<IncidentInfo, SendError>;
}

/// Status assigned to freshly created in-house incidents.
pub const IN_HOUSE_INITIAL_STATUS: &str = "NONE";

/// Tracker that never leaves the process: every request succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct InHouseTracker;

impl IncidentTrackerClient for InHouseTracker {
    fn create_incident(
        &mut self,
        tracker: &TrackerConfig,
        event: &EventInfo,
    ) -> Result<IncidentInfo, SendError> {
        let now = Utc::now();
        Ok(IncidentInfo {
            tracker_id: tracker.id,
            server_id: event.server_id,
            event_id: event.event_id.clone(),
            trigger_id: event.trigger_id.clone(),
            identifier: event.event_id.to_string(),
            location: tracker.location(&event.event_id.0),
            status: IN_HOUSE_INITIAL_STATUS.to_string(),
            assignee: String::new(),
            priority: String::new(),
            done_ratio: 0,
            created_at: now,
            updated_at: now,
        })
    }

    fn update_incident(
        &mut self,
        _tracker: &TrackerConfig,
        incident: &IncidentInfo,
        _comment: &str,
    ) -> Result<IncidentInfo, SendError> {
        let mut updated = incident.clone();
        updated.updated_at = Utc::now();
        Ok(updated)
    }
}
