//! Self-monitoring triggers: health indicators an arm keeps about itself.
//!
//! Not to be confused with the monitored source's own triggers. A
//! self-monitor trigger answers questions like "can this poller reach its
//! backend?" and is written to the central store under a pseudo host so the
//! usual trigger/event views show poller health alongside everything else.

use chrono::{DateTime, Utc};
use hatohol_common::{EventId, EventType, ServerId, Severity, TriggerId, TriggerStatus};
use serde::{Deserialize, Serialize};

use super::fetcher::{FailureKind, SlotSpec};

/// Host ID under which self-monitor triggers and events are recorded.
pub const SELF_MONITOR_HOST_ID: &str = "__SELF_MONITOR";

/// Status of one escalation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Ok,
    Problem,
    Unknown,
    /// The poller never registered this slot.
    Unused,
}

impl SlotStatus {
    /// The stored trigger status, `None` for unused slots.
    pub fn as_trigger_status(self) -> Option<TriggerStatus> {
        match self {
            SlotStatus::Ok => Some(TriggerStatus::Ok),
            SlotStatus::Problem => Some(TriggerStatus::Problem),
            SlotStatus::Unknown => Some(TriggerStatus::Unknown),
            SlotStatus::Unused => None,
        }
    }
}

impl From<TriggerStatus> for SlotStatus {
    fn from(status: TriggerStatus) -> Self {
        match status {
            TriggerStatus::Ok => SlotStatus::Ok,
            TriggerStatus::Problem => SlotStatus::Problem,
            TriggerStatus::Unknown => SlotStatus::Unknown,
        }
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotStatus::Ok => write!(f, "ok"),
            SlotStatus::Problem => write!(f, "problem"),
            SlotStatus::Unknown => write!(f, "unknown"),
            SlotStatus::Unused => write!(f, "unused"),
        }
    }
}

/// A status change of a used slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub kind: FailureKind,
    pub from: TriggerStatus,
    pub to: TriggerStatus,
}

impl Transition {
    /// Whether this change resolves an active problem.
    pub fn is_recovery(&self) -> bool {
        self.from == TriggerStatus::Problem && self.to == TriggerStatus::Ok
    }
}

/// Upsert of a self-monitor trigger row in the central store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfMonitorRecord {
    pub server_id: ServerId,
    pub trigger_id: TriggerId,
    pub status: TriggerStatus,
    pub severity: Severity,
    pub host_id: String,
    pub brief: String,
    pub last_change_time: DateTime<Utc>,
}

/// Event derived from a self-monitor trigger transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfMonitorEvent {
    pub event_id: EventId,
    pub server_id: ServerId,
    pub trigger_id: TriggerId,
    pub event_type: EventType,
    pub status: TriggerStatus,
    pub severity: Severity,
    pub host_id: String,
    pub brief: String,
    pub time: DateTime<Utc>,
}

/// One self-monitoring health indicator.
#[derive(Debug, Clone)]
pub struct SelfMonitorTrigger {
    kind: FailureKind,
    trigger_id: TriggerId,
    message: String,
    status: SlotStatus,
    persisted: bool,
    last_change: DateTime<Utc>,
}

impl SelfMonitorTrigger {
    /// Unregistered trigger for `kind`.
    pub fn new(kind: FailureKind) -> Self {
        let spec = SlotSpec::standard(kind);
        Self {
            kind,
            trigger_id: spec.trigger_id,
            message: spec.message,
            status: SlotStatus::Unused,
            persisted: false,
            last_change: Utc::now(),
        }
    }

    /// Start tracking this trigger. Returns `false` if it was already registered.
    pub fn register(&mut self, trigger_id: TriggerId, message: impl Into<String>) -> bool {
        if self.is_used() {
            return false;
        }
        self.trigger_id = trigger_id;
        self.message = message.into();
        self.status = SlotStatus::Ok;
        self.persisted = false;
        self.last_change = Utc::now();
        true
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn trigger_id(&self) -> &TriggerId {
        &self.trigger_id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> SlotStatus {
        self.status
    }

    pub fn is_used(&self) -> bool {
        self.status != SlotStatus::Unused
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    /// Move to `to`. Unused triggers and no-op changes yield `None`.
    pub fn set_status(&mut self, to: TriggerStatus, now: DateTime<Utc>) -> Option<Transition> {
        let from = self.status.as_trigger_status()?;
        if from == to {
            return None;
        }
        self.status = SlotStatus::from(to);
        self.last_change = now;
        Some(Transition {
            kind: self.kind,
            from,
            to,
        })
    }

    /// Current state as a store record.
    pub fn record(&self, server_id: ServerId) -> SelfMonitorRecord {
        SelfMonitorRecord {
            server_id,
            trigger_id: self.trigger_id.clone(),
            status: self
                .status
                .as_trigger_status()
                .unwrap_or(TriggerStatus::Unknown),
            severity: Severity::Emergency,
            host_id: SELF_MONITOR_HOST_ID.to_string(),
            brief: self.message.clone(),
            last_change_time: self.last_change,
        }
    }

    /// Event announcing the current state.
    pub fn event(&self, server_id: ServerId, event_type: EventType) -> SelfMonitorEvent {
        SelfMonitorEvent {
            event_id: EventId::generate(),
            server_id,
            trigger_id: self.trigger_id.clone(),
            event_type,
            status: self
                .status
                .as_trigger_status()
                .unwrap_or(TriggerStatus::Unknown),
            severity: Severity::Emergency,
            host_id: SELF_MONITOR_HOST_ID.to_string(),
            brief: self.message.clone(),
            time: self.last_change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trigger_is_unused() {
        let trigger = SelfMonitorTrigger::new(FailureKind::Disconnected);
        assert_eq!(trigger.status(), SlotStatus::Unused);
        assert!(!trigger.is_used());
        assert!(!trigger.is_persisted());
    }

    #[test]
    fn test_unused_trigger_never_transitions() {
        let mut trigger = SelfMonitorTrigger::new(FailureKind::Disconnected);
        assert!(trigger
            .set_status(TriggerStatus::Problem, Utc::now())
            .is_none());
        assert_eq!(trigger.status(), SlotStatus::Unused);
    }

    #[test]
    fn test_register_twice_is_noop() {
        let mut trigger = SelfMonitorTrigger::new(FailureKind::ParserError);
        assert!(trigger.register(TriggerId::from("t-1"), "first"));
        trigger.set_status(TriggerStatus::Problem, Utc::now());
        assert!(!trigger.register(TriggerId::from("t-2"), "second"));
        assert_eq!(trigger.trigger_id(), &TriggerId::from("t-1"));
        assert_eq!(trigger.message(), "first");
        assert_eq!(trigger.status(), SlotStatus::Problem);
    }

    #[test]
    fn test_transition_reports_from_and_to() {
        let mut trigger = SelfMonitorTrigger::new(FailureKind::Disconnected);
        trigger.register(TriggerId::from("t"), "msg");
        let t = trigger
            .set_status(TriggerStatus::Problem, Utc::now())
            .expect("changed");
        assert_eq!(t.from, TriggerStatus::Ok);
        assert_eq!(t.to, TriggerStatus::Problem);
        assert!(!t.is_recovery());

        assert!(trigger
            .set_status(TriggerStatus::Problem, Utc::now())
            .is_none());

        let t = trigger.set_status(TriggerStatus::Ok, Utc::now()).unwrap();
        assert!(t.is_recovery());
    }

    #[test]
    fn test_record_and_event_use_self_monitor_host() {
        let mut trigger = SelfMonitorTrigger::new(FailureKind::BrokerUnreachable);
        trigger.register(TriggerId::from("amqp"), "broker down");
        trigger.set_status(TriggerStatus::Problem, Utc::now());

        let record = trigger.record(ServerId(9));
        assert_eq!(record.host_id, SELF_MONITOR_HOST_ID);
        assert_eq!(record.status, TriggerStatus::Problem);
        assert_eq!(record.brief, "broker down");

        let event = trigger.event(ServerId(9), EventType::Bad);
        assert_eq!(event.trigger_id, TriggerId::from("amqp"));
        assert_eq!(event.event_type, EventType::Bad);
        assert_eq!(event.time, record.last_change_time);
    }
}
