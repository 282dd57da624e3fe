//! Central store capabilities consumed by arms and incident senders.
//!
//! The real store (SQL tables with upsert semantics) lives outside this
//! crate. Implementations are injected at construction; see
//! [`crate::memory`] for in-memory versions.

use hatohol_common::{Result, TrackerId};

use crate::arm::trigger::{SelfMonitorEvent, SelfMonitorRecord};
use crate::incident::{IncidentHistoryRecord, TrackerConfig};

/// Where an arm writes its self-monitor triggers and events.
pub trait SelfMonitorStore: Send + Sync {
    /// Upsert trigger rows, one call per batch.
    fn persist_trigger_records(&self, records: &[SelfMonitorRecord]) -> Result<()>;

    /// Append derived events, one call per batch.
    fn persist_events(&self, events: &[SelfMonitorEvent]) -> Result<()>;
}

/// Store operations an incident sender needs.
pub trait IncidentStore: Send + Sync {
    fn load_tracker_config(&self, tracker_id: TrackerId) -> Result<TrackerConfig>;

    fn persist_incident_history(&self, record: &IncidentHistoryRecord) -> Result<()>;
}
