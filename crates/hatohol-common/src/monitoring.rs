//! Monitoring data shared between pollers and incident senders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{EventId, ServerId, TrackerId, TriggerId};

/// Status of a monitored (or self-monitoring) trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerStatus {
    Ok,
    Problem,
    Unknown,
}

impl std::fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerStatus::Ok => write!(f, "ok"),
            TriggerStatus::Problem => write!(f, "problem"),
            TriggerStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Trigger severity, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Unknown,
    Info,
    Warning,
    Error,
    Critical,
    Emergency,
}

/// Kind of event raised when a trigger changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The trigger recovered.
    Good,
    /// The trigger started reporting a problem.
    Bad,
    Unknown,
    Notification,
}

impl EventType {
    /// Event type matching a trigger's new status, if that status is eventful.
    pub fn for_status(status: TriggerStatus) -> Option<EventType> {
        match status {
            TriggerStatus::Ok => Some(EventType::Good),
            TriggerStatus::Problem => Some(EventType::Bad),
            TriggerStatus::Unknown => None,
        }
    }
}

/// A monitoring event as stored centrally, input to incident creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInfo {
    pub server_id: ServerId,
    pub event_id: EventId,
    pub trigger_id: TriggerId,
    pub event_type: EventType,
    pub status: TriggerStatus,
    pub severity: Severity,
    pub host_id: String,
    pub host_name: String,
    pub brief: String,
    pub time: DateTime<Utc>,
}

/// An incident (ticket) tracked for a monitoring event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentInfo {
    pub tracker_id: TrackerId,
    pub server_id: ServerId,
    pub event_id: EventId,
    pub trigger_id: TriggerId,
    /// Tracker-side ticket identifier.
    pub identifier: String,
    /// URL of the ticket, empty for the in-house tracker.
    pub location: String,
    pub status: String,
    pub assignee: String,
    pub priority: String,
    pub done_ratio: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
