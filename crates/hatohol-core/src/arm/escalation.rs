//! Cascading failure escalation across an arm's self-monitor triggers.
//!
//! Slots are ordered deepest first (see [`FailureKind`]). When polling fails
//! at slot `i`:
//!
//! - slot `i` takes the reported status,
//! - every shallower slot (`> i`) is forced back to OK: the poll got far
//!   enough to fail at `i`, so those checks were never hit this round,
//! - every deeper slot (`< i`) that was OK becomes UNKNOWN, since a more
//!   fundamental failure now hides whether it would pass.
//!
//! A successful poll clears every slot. Derived records and events are
//! returned as a [`StatusDelta`] for the caller to flush in one batch.

use chrono::Utc;
use hatohol_common::{EventType, ServerId, TriggerId, TriggerStatus};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::fetcher::{FailureKind, PollResult, SlotSpec};
use super::trigger::{
    SelfMonitorEvent, SelfMonitorRecord, SelfMonitorTrigger, SlotStatus, Transition,
};

/// A change to feed into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationUpdate {
    /// Collection succeeded: every used slot resolves to OK.
    AllClear,
    /// A failure (or explicit status) at one slot, cascading to the others.
    Escalate {
        slot: FailureKind,
        status: TriggerStatus,
    },
}

impl EscalationUpdate {
    /// The update a poll outcome calls for.
    pub fn for_result(result: PollResult) -> Self {
        match result {
            PollResult::Ok => EscalationUpdate::AllClear,
            PollResult::Failed(kind) => EscalationUpdate::Escalate {
                slot: kind,
                status: TriggerStatus::Problem,
            },
        }
    }
}

/// Records and events produced by one table operation.
#[derive(Debug, Clone, Default)]
pub struct StatusDelta {
    pub records: Vec<SelfMonitorRecord>,
    pub events: Vec<SelfMonitorEvent>,
    pub transitions: Vec<Transition>,
}

impl StatusDelta {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.events.is_empty()
    }

    pub fn merge(&mut self, other: StatusDelta) {
        self.records.extend(other.records);
        self.events.extend(other.events);
        self.transitions.extend(other.transitions);
    }
}

/// Read-only view of one slot for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub kind: FailureKind,
    pub trigger_id: TriggerId,
    pub message: String,
    pub status: SlotStatus,
}

/// Fixed table of one trigger per [`FailureKind`].
#[derive(Debug, Clone)]
pub struct EscalationTable {
    server_id: ServerId,
    slots: Vec<SelfMonitorTrigger>,
}

impl EscalationTable {
    pub fn new(server_id: ServerId) -> Self {
        Self {
            server_id,
            slots: FailureKind::ALL
                .iter()
                .map(|&kind| SelfMonitorTrigger::new(kind))
                .collect(),
        }
    }

    /// Table with `specs` already registered.
    pub fn with_slots(server_id: ServerId, specs: &[SlotSpec]) -> Self {
        let mut table = Self::new(server_id);
        for spec in specs {
            table.register_slot(spec.kind, spec.trigger_id.clone(), spec.message.clone());
        }
        table
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Start tracking `kind`. A repeated registration is ignored.
    pub fn register_slot(
        &mut self,
        kind: FailureKind,
        trigger_id: TriggerId,
        message: impl Into<String>,
    ) -> bool {
        self.slots[kind.index()].register(trigger_id, message)
    }

    pub fn is_used(&self, kind: FailureKind) -> bool {
        self.slots[kind.index()].is_used()
    }

    pub fn status(&self, kind: FailureKind) -> SlotStatus {
        self.slots[kind.index()].status()
    }

    /// Apply `update` and return what must be persisted.
    pub fn update_status(&mut self, update: EscalationUpdate) -> StatusDelta {
        match update {
            EscalationUpdate::AllClear => self.clear_all(),
            EscalationUpdate::Escalate { slot, status } => self.escalate(slot, status),
        }
    }

    /// Records for every used slot never written to the store yet.
    pub fn initial_registration(&mut self) -> StatusDelta {
        let mut delta = StatusDelta::default();
        for slot in self.slots.iter_mut().filter(|s| s.is_used()) {
            if slot.is_persisted() {
                continue;
            }
            delta.records.push(slot.record(self.server_id));
            slot.mark_persisted();
        }
        delta
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.slots
            .iter()
            .map(|slot| SlotSnapshot {
                kind: slot.kind(),
                trigger_id: slot.trigger_id().clone(),
                message: slot.message().to_string(),
                status: slot.status(),
            })
            .collect()
    }

    fn clear_all(&mut self) -> StatusDelta {
        let mut delta = StatusDelta::default();
        for idx in 0..self.slots.len() {
            self.resolve(idx, &mut delta);
        }
        delta
    }

    fn escalate(&mut self, kind: FailureKind, status: TriggerStatus) -> StatusDelta {
        let mut delta = StatusDelta::default();
        let idx = kind.index();

        if !self.slots[idx].is_used() {
            warn!(
                server_id = %self.server_id,
                slot = %kind,
                "escalation requested for an unregistered slot"
            );
            return delta;
        }

        let now = Utc::now();
        let slot = &mut self.slots[idx];
        let Some(transition) = slot.set_status(status, now) else {
            return delta;
        };
        delta.records.push(slot.record(self.server_id));
        if let Some(event_type) = EventType::for_status(status) {
            delta.events.push(slot.event(self.server_id, event_type));
        }
        slot.mark_persisted();
        delta.transitions.push(transition);

        for shallower in idx + 1..self.slots.len() {
            self.resolve(shallower, &mut delta);
        }

        // Deeper slots only lose certainty; no event is raised for that.
        for deeper in 0..idx {
            let slot = &mut self.slots[deeper];
            if slot.status() != SlotStatus::Ok {
                continue;
            }
            if let Some(transition) = slot.set_status(TriggerStatus::Unknown, now) {
                delta.records.push(slot.record(self.server_id));
                slot.mark_persisted();
                delta.transitions.push(transition);
            }
        }

        delta
    }

    /// Force slot `idx` to OK, raising a recovery event if it was a problem.
    fn resolve(&mut self, idx: usize, delta: &mut StatusDelta) {
        let slot = &mut self.slots[idx];
        let Some(transition) = slot.set_status(TriggerStatus::Ok, Utc::now()) else {
            return;
        };
        delta.records.push(slot.record(self.server_id));
        if transition.is_recovery() {
            delta.events.push(slot.event(self.server_id, EventType::Good));
        }
        slot.mark_persisted();
        delta.transitions.push(transition);
    }
}
