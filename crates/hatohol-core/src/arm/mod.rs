//! Per-server polling state machine ("arm").
//!
//! Each [`Arm`] owns one worker thread that alternates between on-demand
//! fetch jobs and scheduled polls of a monitored server. Poll failures are
//! mapped onto a fixed table of self-monitor triggers (see
//! [`escalation`]) so operators see *why* collection is broken, not just
//! that it is.
//!
//! Iteration order:
//!
//! 1. a queued job runs before the regular poll,
//! 2. the outcome updates [`ArmStatus`] and the escalation table,
//! 3. derived records/events are flushed to the [`SelfMonitorStore`],
//! 4. the worker sleeps until the next poll, or the retry interval after a
//!    failure, unless woken by an enqueue or an exit request.

pub mod escalation;
pub mod fetcher;
pub mod job;
pub mod signal;
pub mod status;
pub mod trigger;

pub use escalation::{EscalationTable, EscalationUpdate, SlotSnapshot, StatusDelta};
pub use fetcher::{FailureKind, Fetcher, HistoryQuery, HistorySample, PollResult, SlotSpec};
pub use job::{Job, JobCallback, JobKind, JobQueue, JobReport, JobStatus};
pub use signal::WakeSignal;
pub use status::{ArmInfo, ArmStatus, ArmWorkingStatus};
pub use trigger::{SelfMonitorEvent, SelfMonitorRecord, SlotStatus, SELF_MONITOR_HOST_ID};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use hatohol_common::ServerId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::logging::event_names;
use crate::store::SelfMonitorStore;

/// Default seconds between regular polls.
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 30;
/// Default seconds before retrying after a failed iteration.
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 10;

/// The monitored server an arm polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingTarget {
    pub server_id: ServerId,
    pub name: String,
    pub polling_interval_secs: u64,
    pub retry_interval_secs: u64,
}

impl PollingTarget {
    pub fn new(server_id: ServerId, name: impl Into<String>) -> Self {
        Self {
            server_id,
            name: name.into(),
            polling_interval_secs: DEFAULT_POLLING_INTERVAL_SECS,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
        }
    }

    pub fn with_intervals(mut self, polling_secs: u64, retry_secs: u64) -> Self {
        self.polling_interval_secs = polling_secs;
        self.retry_interval_secs = retry_secs;
        self
    }
}

/// Errors from arm lifecycle operations.
#[derive(Debug, Error)]
pub enum ArmError {
    #[error("arm for server {server_id} was already started")]
    AlreadyStarted { server_id: ServerId },

    #[error("failed to spawn worker thread for server {server_id}: {source}")]
    Spawn {
        server_id: ServerId,
        #[source]
        source: std::io::Error,
    },
}

impl From<ArmError> for hatohol_common::Error {
    fn from(err: ArmError) -> Self {
        match err {
            ArmError::AlreadyStarted { .. } => hatohol_common::Error::Polling(err.to_string()),
            ArmError::Spawn { server_id, source } => hatohol_common::Error::ThreadSpawn {
                name: arm_thread_name(server_id),
                reason: source.to_string(),
            },
        }
    }
}

fn arm_thread_name(server_id: ServerId) -> String {
    format!("arm-{}", server_id)
}

/// Seconds to sleep before the next regular poll.
///
/// `elapsed` is the time since the last regular poll, `None` if there has
/// been none. Anything outside `(0, interval)` yields the full interval, and
/// the result is never below one second.
pub fn seconds_to_next_polling(interval_secs: u64, elapsed: Option<Duration>) -> u64 {
    let interval = interval_secs.max(1);
    let Some(elapsed) = elapsed else {
        return interval;
    };
    let elapsed = elapsed.as_secs();
    if elapsed >= interval {
        return interval;
    }
    (interval - elapsed).max(1)
}

// -----------------------------------------------------------------------------
// Shared state
// -----------------------------------------------------------------------------

/// State shared between the [`Arm`] handle and its worker thread.
struct ArmShared {
    server_id: ServerId,
    name: String,
    polling_interval: AtomicU64,
    retry_interval: AtomicU64,
    exit_requested: AtomicBool,
    wake: WakeSignal,
    jobs: Mutex<JobQueue>,
    escalation: RwLock<EscalationTable>,
    status: Arc<ArmStatus>,
    store: Arc<dyn SelfMonitorStore>,
    last_polling: Mutex<Option<Instant>>,
}

impl ArmShared {
    fn jobs(&self) -> MutexGuard<'_, JobQueue> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }

    fn seconds_to_next_polling(&self) -> u64 {
        let elapsed = self
            .last_polling
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .map(|at| at.elapsed());
        seconds_to_next_polling(self.polling_interval.load(Ordering::SeqCst), elapsed)
    }

    fn mark_polled(&self) {
        *self
            .last_polling
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
    }

    fn drain_jobs(&self) -> usize {
        // Cancel outside the lock so callbacks may enqueue or query freely.
        let pending = self.jobs().take_all();
        let count = pending.len();
        for job in pending {
            job.cancel();
        }
        count
    }

    /// Write one delta to the store: records once, events once.
    fn flush(&self, delta: &StatusDelta) {
        for transition in &delta.transitions {
            info!(
                event = event_names::SELF_MONITOR_CHANGED,
                server_id = %self.server_id,
                slot = %transition.kind,
                from = %transition.from,
                to = %transition.to,
                "self-monitor trigger changed"
            );
        }
        if !delta.records.is_empty() {
            if let Err(e) = self.store.persist_trigger_records(&delta.records) {
                warn!(
                    event = event_names::STORE_WRITE_FAILED,
                    server_id = %self.server_id,
                    count = delta.records.len(),
                    error = %e,
                    "failed to persist self-monitor triggers"
                );
            }
        }
        if !delta.events.is_empty() {
            if let Err(e) = self.store.persist_events(&delta.events) {
                warn!(
                    event = event_names::STORE_WRITE_FAILED,
                    server_id = %self.server_id,
                    count = delta.events.len(),
                    error = %e,
                    "failed to persist self-monitor events"
                );
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Arm handle
// -----------------------------------------------------------------------------

/// Handle to one server's polling worker.
///
/// Dropping the handle stops the worker and cancels any job it never ran,
/// so every enqueued callback fires exactly once.
pub struct Arm {
    shared: Arc<ArmShared>,
    fetcher: Mutex<Option<Box<dyn Fetcher>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Arm {
    /// Build an arm. The fetcher's failure slots are registered up front;
    /// nothing runs until [`Arm::start`].
    pub fn new(
        target: PollingTarget,
        fetcher: Box<dyn Fetcher>,
        store: Arc<dyn SelfMonitorStore>,
    ) -> Self {
        let escalation = EscalationTable::with_slots(target.server_id, &fetcher.failure_slots());
        let shared = ArmShared {
            server_id: target.server_id,
            name: target.name,
            polling_interval: AtomicU64::new(target.polling_interval_secs),
            retry_interval: AtomicU64::new(target.retry_interval_secs),
            exit_requested: AtomicBool::new(false),
            wake: WakeSignal::new(),
            jobs: Mutex::new(JobQueue::new()),
            escalation: RwLock::new(escalation),
            status: Arc::new(ArmStatus::new()),
            store,
            last_polling: Mutex::new(None),
        };
        Self {
            shared: Arc::new(shared),
            fetcher: Mutex::new(Some(fetcher)),
            thread: Mutex::new(None),
        }
    }

    pub fn server_id(&self) -> ServerId {
        self.shared.server_id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawn the worker thread.
    pub fn start(&self) -> Result<(), ArmError> {
        let server_id = self.shared.server_id;
        let worker = self
            .take_worker()
            .ok_or(ArmError::AlreadyStarted { server_id })?;

        self.shared.status.set_running_status(true);
        let handle = thread::Builder::new()
            .name(arm_thread_name(server_id))
            .spawn(move || worker.run())
            .map_err(|source| {
                self.shared.status.set_running_status(false);
                ArmError::Spawn { server_id, source }
            })?;

        *self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        Ok(())
    }

    /// Stop the worker and wait for it. Safe to call more than once.
    pub fn request_exit_and_wait(&self) {
        self.shared.exit_requested.store(true, Ordering::SeqCst);
        self.shared.wake.post();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                warn!(
                    server_id = %self.shared.server_id,
                    "exit requested from the arm's own thread; not joining"
                );
            } else if handle.join().is_err() {
                error!(
                    server_id = %self.shared.server_id,
                    "arm worker thread panicked"
                );
            }
        }
        self.shared.status.set_running_status(false);

        let cancelled = self.shared.drain_jobs();
        if cancelled > 0 {
            debug!(
                server_id = %self.shared.server_id,
                cancelled,
                "cancelled pending jobs"
            );
        }
    }

    /// Run one iteration on the calling thread instead of the worker.
    ///
    /// Only valid before [`Arm::start`]; used for dry runs and simulations.
    pub fn poll_once(&self) -> Result<PollResult, ArmError> {
        let mut slot = self
            .fetcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let fetcher = slot.take().ok_or(ArmError::AlreadyStarted {
            server_id: self.shared.server_id,
        })?;
        let mut worker = ArmWorker::new(Arc::clone(&self.shared), fetcher);
        let iteration = worker.run_once();
        *slot = Some(worker.fetcher);
        Ok(iteration.result)
    }

    pub fn is_running(&self) -> bool {
        self.shared.status.info().running
    }

    /// Queue a job and wake the worker.
    ///
    /// After an exit request the job is cancelled on the spot instead.
    pub fn enqueue(&self, kind: JobKind, callback: Option<JobCallback>) {
        let job = Job::new(kind, callback);
        // Checked under the queue lock: a job pushed before the exit flag is
        // set is always seen by the drain that follows it.
        let rejected = {
            let mut jobs = self.shared.jobs();
            if self.shared.is_exit_requested() {
                Some(job)
            } else {
                debug!(server_id = %self.shared.server_id, job = %job.kind(), "job queued");
                jobs.push(job);
                None
            }
        };
        match rejected {
            Some(job) => job.cancel(),
            None => self.shared.wake.post(),
        }
    }

    pub fn enqueue_fetch_items<F>(&self, callback: F)
    where
        F: FnOnce(JobReport) + Send + 'static,
    {
        self.enqueue(JobKind::FetchItems, Some(Box::new(callback)));
    }

    pub fn enqueue_fetch_triggers<F>(&self, callback: F)
    where
        F: FnOnce(JobReport) + Send + 'static,
    {
        self.enqueue(JobKind::FetchTriggers, Some(Box::new(callback)));
    }

    pub fn enqueue_fetch_history<F>(&self, query: HistoryQuery, callback: F)
    where
        F: FnOnce(JobReport) + Send + 'static,
    {
        self.enqueue(JobKind::FetchHistory(query), Some(Box::new(callback)));
    }

    /// Queue a job and block until it reports or `timeout` passes.
    pub fn run_and_wait(&self, kind: JobKind, timeout: Duration) -> Option<JobReport> {
        let (tx, rx) = mpsc::channel();
        self.enqueue(
            kind,
            Some(Box::new(move |report| {
                let _ = tx.send(report);
            })),
        );
        rx.recv_timeout(timeout).ok()
    }

    pub fn fetch_items_and_wait(&self, timeout: Duration) -> Option<JobReport> {
        self.run_and_wait(JobKind::FetchItems, timeout)
    }

    pub fn fetch_triggers_and_wait(&self, timeout: Duration) -> Option<JobReport> {
        self.run_and_wait(JobKind::FetchTriggers, timeout)
    }

    pub fn set_polling_interval(&self, secs: u64) {
        self.shared.polling_interval.store(secs, Ordering::SeqCst);
    }

    pub fn polling_interval(&self) -> u64 {
        self.shared.polling_interval.load(Ordering::SeqCst)
    }

    pub fn set_retry_interval(&self, secs: u64) {
        self.shared.retry_interval.store(secs, Ordering::SeqCst);
    }

    pub fn retry_interval(&self) -> u64 {
        self.shared.retry_interval.load(Ordering::SeqCst)
    }

    pub fn seconds_to_next_polling(&self) -> u64 {
        self.shared.seconds_to_next_polling()
    }

    pub fn escalation_snapshot(&self) -> Vec<SlotSnapshot> {
        self.shared
            .escalation
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .snapshot()
    }

    pub fn status(&self) -> Arc<ArmStatus> {
        Arc::clone(&self.shared.status)
    }

    pub fn pending_jobs(&self) -> usize {
        self.shared.jobs().len()
    }

    fn take_worker(&self) -> Option<ArmWorker> {
        let fetcher = self
            .fetcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        Some(ArmWorker::new(Arc::clone(&self.shared), fetcher))
    }
}

impl Drop for Arm {
    fn drop(&mut self) {
        self.request_exit_and_wait();
    }
}

impl std::fmt::Debug for Arm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arm")
            .field("server_id", &self.shared.server_id)
            .field("name", &self.shared.name)
            .field("pending_jobs", &self.pending_jobs())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Worker
// -----------------------------------------------------------------------------

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Iteration {
    result: PollResult,
    regular: bool,
    sleep_secs: u64,
}

struct ArmWorker {
    shared: Arc<ArmShared>,
    fetcher: Box<dyn Fetcher>,
}

impl ArmWorker {
    fn new(shared: Arc<ArmShared>, fetcher: Box<dyn Fetcher>) -> Self {
        Self { shared, fetcher }
    }

    fn run(mut self) {
        info!(
            event = event_names::ARM_STARTED,
            server_id = %self.shared.server_id,
            name = %self.shared.name,
            "arm started"
        );
        while !self.shared.is_exit_requested() {
            let iteration = self.run_once();
            if self.shared.is_exit_requested() {
                break;
            }
            self.shared
                .wake
                .wait_timeout(Duration::from_secs(iteration.sleep_secs));
        }
        info!(
            event = event_names::ARM_STOPPED,
            server_id = %self.shared.server_id,
            "arm stopped"
        );
    }

    fn run_once(&mut self) -> Iteration {
        let previous = self.shared.status.info().stat;
        let job = self.shared.jobs().pop();
        let regular = job.is_none();
        let mut sleep_secs = self.shared.seconds_to_next_polling();

        let result = match job {
            Some(job) => self.run_job(job),
            None => self.fetcher.regular_poll(),
        };

        match result {
            PollResult::Ok => self.shared.status.log_success(),
            PollResult::Failed(kind) => {
                sleep_secs = self.shared.retry_interval.load(Ordering::SeqCst).max(1);
                let comment = self
                    .fetcher
                    .failure_comment()
                    .unwrap_or_else(|| kind.default_message().to_string());
                warn!(
                    event = event_names::ARM_POLL_FAILED,
                    server_id = %self.shared.server_id,
                    kind = %kind,
                    comment = %comment,
                    retry_in_secs = sleep_secs,
                    "poll failed"
                );
                self.shared
                    .status
                    .log_failure(&comment, ArmWorkingStatus::Failure);
            }
        }

        let mut delta = StatusDelta::default();
        {
            let mut table = self
                .shared
                .escalation
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if previous == ArmWorkingStatus::Init {
                delta.merge(table.initial_registration());
            }
            if !result.is_ok() || previous != ArmWorkingStatus::Ok {
                delta.merge(table.update_status(EscalationUpdate::for_result(result)));
            }
        }
        self.shared.flush(&delta);

        if regular {
            self.shared.mark_polled();
        }

        Iteration {
            result,
            regular,
            sleep_secs,
        }
    }

    fn run_job(&mut self, job: Job) -> PollResult {
        let (result, history) = match job.kind() {
            JobKind::FetchItems => (self.fetcher.fetch_items(), Vec::new()),
            JobKind::FetchTriggers => (self.fetcher.fetch_triggers(), Vec::new()),
            JobKind::FetchHistory(query) => self.fetcher.fetch_history(query),
        };
        debug!(
            event = event_names::ARM_JOB_DONE,
            server_id = %self.shared.server_id,
            job = %job.kind(),
            ok = result.is_ok(),
            "job finished"
        );
        job.complete(JobReport::completed(result).with_history(history));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FetchCall, MemorySelfMonitorStore, ScriptedFetcher};
    use hatohol_common::TriggerStatus;

    fn arm_with(fetcher: &ScriptedFetcher) -> (Arm, Arc<MemorySelfMonitorStore>) {
        let store = Arc::new(MemorySelfMonitorStore::new());
        let arm = Arm::new(
            PollingTarget::new(ServerId(7), "zabbix-7").with_intervals(60, 5),
            Box::new(fetcher.clone()),
            store.clone(),
        );
        (arm, store)
    }

    #[test]
    fn test_sleep_clamp() {
        assert_eq!(seconds_to_next_polling(60, None), 60);
        assert_eq!(seconds_to_next_polling(60, Some(Duration::from_secs(90))), 60);
        assert_eq!(seconds_to_next_polling(60, Some(Duration::from_secs(60))), 60);
        assert_eq!(seconds_to_next_polling(60, Some(Duration::from_secs(45))), 15);
        assert_eq!(seconds_to_next_polling(60, Some(Duration::from_secs(59))), 1);
        assert_eq!(seconds_to_next_polling(0, None), 1);
    }

    #[test]
    fn test_first_iteration_registers_slots() {
        let fetcher = ScriptedFetcher::standard();
        let (arm, store) = arm_with(&fetcher);
        let mut worker = arm.take_worker().unwrap();

        let iteration = worker.run_once();
        assert_eq!(iteration.result, PollResult::Ok);
        assert!(iteration.regular);
        assert_eq!(iteration.sleep_secs, 60);

        // One batch holding every registered slot at OK, no events.
        let batches = store.record_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), FailureKind::COUNT);
        assert!(batches[0].iter().all(|r| r.status == TriggerStatus::Ok));
        assert!(store.events().is_empty());

        // Steady success writes nothing.
        worker.run_once();
        assert_eq!(store.record_batches().len(), 1);
    }

    #[test]
    fn test_failure_uses_retry_interval() {
        let fetcher = ScriptedFetcher::standard();
        fetcher.push_result(PollResult::Failed(FailureKind::ParserError));
        let (arm, store) = arm_with(&fetcher);
        let mut worker = arm.take_worker().unwrap();

        let iteration = worker.run_once();
        assert_eq!(iteration.sleep_secs, 5);
        assert_eq!(
            arm.escalation_snapshot()[FailureKind::ParserError.index()].status,
            SlotStatus::Problem
        );
        let info = arm.status().info();
        assert_eq!(info.stat, ArmWorkingStatus::Failure);
        assert_eq!(info.failure_comment, FailureKind::ParserError.default_message());
        assert_eq!(store.event_batches().len(), 1);

        // Recovery resolves the slot and flips the status back.
        let iteration = worker.run_once();
        assert_eq!(iteration.result, PollResult::Ok);
        assert_eq!(
            arm.escalation_snapshot()[FailureKind::ParserError.index()].status,
            SlotStatus::Ok
        );
        assert_eq!(arm.status().info().stat, ArmWorkingStatus::Ok);
    }

    #[test]
    fn test_fetcher_comment_preferred() {
        let fetcher = ScriptedFetcher::standard().with_comment("HTTP 502 from api");
        fetcher.push_result(PollResult::Failed(FailureKind::Disconnected));
        let (arm, _store) = arm_with(&fetcher);
        let mut worker = arm.take_worker().unwrap();
        worker.run_once();
        assert_eq!(arm.status().info().failure_comment, "HTTP 502 from api");
    }

    #[test]
    fn test_job_runs_before_regular_poll() {
        let fetcher = ScriptedFetcher::standard();
        let (arm, _store) = arm_with(&fetcher);
        let mut worker = arm.take_worker().unwrap();

        let (tx, rx) = mpsc::channel();
        arm.enqueue_fetch_triggers(move |report| {
            tx.send(report).unwrap();
        });

        let iteration = worker.run_once();
        assert!(!iteration.regular);
        assert_eq!(fetcher.calls(), vec![FetchCall::FetchTriggers]);
        assert_eq!(rx.try_recv().unwrap().result(), Some(PollResult::Ok));

        // A job iteration does not count as a regular poll.
        assert_eq!(arm.seconds_to_next_polling(), 60);

        worker.run_once();
        assert_eq!(
            fetcher.calls(),
            vec![FetchCall::FetchTriggers, FetchCall::RegularPoll]
        );
    }

    #[test]
    fn test_start_twice_fails() {
        let fetcher = ScriptedFetcher::standard();
        let (arm, _store) = arm_with(&fetcher);
        arm.start().unwrap();
        assert!(arm.is_running());
        assert!(matches!(
            arm.start(),
            Err(ArmError::AlreadyStarted { server_id: ServerId(7) })
        ));
        arm.request_exit_and_wait();
        assert!(!arm.is_running());
        arm.request_exit_and_wait();
    }

    #[test]
    fn test_intervals_are_adjustable() {
        let fetcher = ScriptedFetcher::standard();
        let (arm, _store) = arm_with(&fetcher);
        arm.set_polling_interval(120);
        arm.set_retry_interval(15);
        assert_eq!(arm.polling_interval(), 120);
        assert_eq!(arm.retry_interval(), 15);
        assert_eq!(arm.seconds_to_next_polling(), 120);
    }

    #[test]
    fn test_arm_error_converts_to_common_error() {
        let err: hatohol_common::Error = ArmError::AlreadyStarted {
            server_id: ServerId(3),
        }
        .into();
        assert_eq!(err.code(), 21);
    }
}
