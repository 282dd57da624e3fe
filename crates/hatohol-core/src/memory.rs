//! In-memory collaborators: stores and a scripted fetcher.
//!
//! Used by the `simulate` command and as fakes in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use hatohol_common::{Error, Result, TrackerId, TriggerId, TriggerStatus};

use crate::arm::fetcher::{
    FailureKind, Fetcher, HistoryQuery, HistorySample, PollResult, SlotSpec,
};
use crate::arm::trigger::{SelfMonitorEvent, SelfMonitorRecord};
use crate::incident::{IncidentHistoryRecord, TrackerConfig};
use crate::store::{IncidentStore, SelfMonitorStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// -----------------------------------------------------------------------------
// Self-monitor store
// -----------------------------------------------------------------------------

/// Keeps every persisted batch, in call order.
#[derive(Debug, Default)]
pub struct MemorySelfMonitorStore {
    record_batches: Mutex<Vec<Vec<SelfMonitorRecord>>>,
    event_batches: Mutex<Vec<Vec<SelfMonitorEvent>>>,
    fail_writes: AtomicBool,
}

impl MemorySelfMonitorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn record_batches(&self) -> Vec<Vec<SelfMonitorRecord>> {
        lock(&self.record_batches).clone()
    }

    pub fn event_batches(&self) -> Vec<Vec<SelfMonitorEvent>> {
        lock(&self.event_batches).clone()
    }

    pub fn records(&self) -> Vec<SelfMonitorRecord> {
        lock(&self.record_batches).iter().flatten().cloned().collect()
    }

    pub fn events(&self) -> Vec<SelfMonitorEvent> {
        lock(&self.event_batches).iter().flatten().cloned().collect()
    }

    /// Latest persisted status of a trigger, as an upserting table would hold.
    pub fn trigger_status(&self, trigger_id: &TriggerId) -> Option<TriggerStatus> {
        lock(&self.record_batches)
            .iter()
            .flatten()
            .filter(|r| &r.trigger_id == trigger_id)
            .last()
            .map(|r| r.status)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Store("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl SelfMonitorStore for MemorySelfMonitorStore {
    fn persist_trigger_records(&self, records: &[SelfMonitorRecord]) -> Result<()> {
        self.check_writable()?;
        lock(&self.record_batches).push(records.to_vec());
        Ok(())
    }

    fn persist_events(&self, events: &[SelfMonitorEvent]) -> Result<()> {
        self.check_writable()?;
        lock(&self.event_batches).push(events.to_vec());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Incident store
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryIncidentStore {
    trackers: Mutex<HashMap<TrackerId, TrackerConfig>>,
    history: Mutex<Vec<IncidentHistoryRecord>>,
    tracker_loads: AtomicUsize,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tracker.
    pub fn put_tracker(&self, config: TrackerConfig) {
        lock(&self.trackers).insert(config.id, config);
    }

    pub fn remove_tracker(&self, tracker_id: TrackerId) -> Option<TrackerConfig> {
        lock(&self.trackers).remove(&tracker_id)
    }

    pub fn history(&self) -> Vec<IncidentHistoryRecord> {
        lock(&self.history).clone()
    }

    /// How many times a tracker config was read.
    pub fn tracker_loads(&self) -> usize {
        self.tracker_loads.load(Ordering::SeqCst)
    }
}

impl IncidentStore for MemoryIncidentStore {
    fn load_tracker_config(&self, tracker_id: TrackerId) -> Result<TrackerConfig> {
        self.tracker_loads.fetch_add(1, Ordering::SeqCst);
        lock(&self.trackers)
            .get(&tracker_id)
            .cloned()
            .ok_or(Error::TrackerNotFound { tracker_id })
    }

    fn persist_incident_history(&self, record: &IncidentHistoryRecord) -> Result<()> {
        lock(&self.history).push(record.clone());
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Scripted fetcher
// -----------------------------------------------------------------------------

/// A fetcher operation as seen by [`ScriptedFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchCall {
    RegularPoll,
    FetchItems,
    FetchHistory(HistoryQuery),
    FetchTriggers,
}

/// Fetcher that replays queued results, then a fallback.
///
/// Clones share the script and the call log, so a test can keep one clone
/// while the arm owns another.
#[derive(Debug, Clone)]
pub struct ScriptedFetcher {
    slots: Vec<SlotSpec>,
    script: Arc<Mutex<VecDeque<PollResult>>>,
    calls: Arc<Mutex<Vec<FetchCall>>>,
    fallback: PollResult,
    comment: Option<String>,
    history: Vec<HistorySample>,
}

impl ScriptedFetcher {
    pub fn new(slots: Vec<SlotSpec>) -> Self {
        Self {
            slots,
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            fallback: PollResult::Ok,
            comment: None,
            history: Vec::new(),
        }
    }

    /// Registers every standard failure slot.
    pub fn standard() -> Self {
        Self::new(FailureKind::ALL.iter().map(|&k| SlotSpec::standard(k)).collect())
    }

    pub fn with_script(self, results: impl IntoIterator<Item = PollResult>) -> Self {
        lock(&self.script).extend(results);
        self
    }

    /// Result returned once the script runs dry.
    pub fn with_fallback(mut self, fallback: PollResult) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_history(mut self, history: Vec<HistorySample>) -> Self {
        self.history = history;
        self
    }

    pub fn push_result(&self, result: PollResult) {
        lock(&self.script).push_back(result);
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        lock(&self.calls).clone()
    }

    fn next(&mut self, call: FetchCall) -> PollResult {
        lock(&self.calls).push(call);
        lock(&self.script).pop_front().unwrap_or(self.fallback)
    }
}

impl Fetcher for ScriptedFetcher {
    fn failure_slots(&self) -> Vec<SlotSpec> {
        self.slots.clone()
    }

    fn regular_poll(&mut self) -> PollResult {
        self.next(FetchCall::RegularPoll)
    }

    fn fetch_items(&mut self) -> PollResult {
        self.next(FetchCall::FetchItems)
    }

    fn fetch_history(&mut self, query: &HistoryQuery) -> (PollResult, Vec<HistorySample>) {
        let result = self.next(FetchCall::FetchHistory(query.clone()));
        let history = if result.is_ok() {
            self.history.clone()
        } else {
            Vec::new()
        };
        (result, history)
    }

    fn fetch_triggers(&mut self) -> PollResult {
        self.next(FetchCall::FetchTriggers)
    }

    fn failure_comment(&self) -> Option<String> {
        self.comment.clone()
    }
}
