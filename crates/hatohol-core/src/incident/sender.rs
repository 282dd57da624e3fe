//! Per-tracker incident send queue with bounded retry.
//!
//! One worker thread per tracker sends jobs strictly in FIFO order, never
//! more than one at a time. Transport failures are retried in place up to
//! the configured limit; any other error fails the job at once.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use hatohol_common::{IncidentInfo, TrackerId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::client::{IncidentTrackerClient, SendError};
use super::job::{IncidentHistoryRecord, IncidentJob, IncidentJobStatus, IncidentRequest};
use super::tracker::{TrackerConfig, TrackerConfigCache};
use crate::arm::WakeSignal;
use crate::logging::event_names;
use crate::store::IncidentStore;

pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 5000;

/// How often and how far apart failed sends are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub limit: u32,
    pub interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RETRY_LIMIT,
            interval_ms: DEFAULT_RETRY_INTERVAL_MS,
        }
    }
}

impl RetryPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

struct SenderShared {
    tracker_id: TrackerId,
    queue: Mutex<VecDeque<IncidentJob>>,
    running: AtomicBool,
    exit_requested: AtomicBool,
    signal: WakeSignal,
    tracker: TrackerConfigCache,
    store: Arc<dyn IncidentStore>,
    retry_limit: AtomicU32,
    retry_interval_ms: AtomicU64,
    record_history: AtomicBool,
    last_result: Mutex<Option<Result<(), SendError>>>,
}

impl SenderShared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<IncidentJob>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            limit: self.retry_limit.load(Ordering::SeqCst),
            interval_ms: self.retry_interval_ms.load(Ordering::SeqCst),
        }
    }

    /// Clear the running flag under the queue lock, so `is_idling` is
    /// already true when the terminal callback fires.
    fn finish_running(&self) {
        let _queue = self.queue();
        self.running.store(false, Ordering::SeqCst);
    }

    fn set_last_result(&self, result: Result<(), SendError>) {
        *self
            .last_result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result);
    }
}

/// Handle to one tracker's send queue and worker.
///
/// Dropping it stops the worker after the job in flight (if any) and fails
/// every job that never started with [`SendError::Cancelled`].
pub struct IncidentSender {
    shared: Arc<SenderShared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl IncidentSender {
    /// Load the tracker config and spawn the worker.
    pub fn start(
        tracker_id: TrackerId,
        client: Box<dyn IncidentTrackerClient>,
        store: Arc<dyn IncidentStore>,
        policy: RetryPolicy,
        record_history: bool,
    ) -> hatohol_common::Result<Self> {
        let tracker = TrackerConfigCache::new(tracker_id, Arc::clone(&store));
        Self::spawn(tracker, client, store, policy, record_history)
    }

    /// Spawn the worker around a config the caller already loaded.
    pub fn start_with_config(
        config: TrackerConfig,
        client: Box<dyn IncidentTrackerClient>,
        store: Arc<dyn IncidentStore>,
        policy: RetryPolicy,
        record_history: bool,
    ) -> hatohol_common::Result<Self> {
        let tracker = TrackerConfigCache::with_config(config, Arc::clone(&store));
        Self::spawn(tracker, client, store, policy, record_history)
    }

    fn spawn(
        tracker: TrackerConfigCache,
        client: Box<dyn IncidentTrackerClient>,
        store: Arc<dyn IncidentStore>,
        policy: RetryPolicy,
        record_history: bool,
    ) -> hatohol_common::Result<Self> {
        let tracker_id = tracker.tracker_id();
        let shared = Arc::new(SenderShared {
            tracker_id,
            queue: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            exit_requested: AtomicBool::new(false),
            signal: WakeSignal::new(),
            tracker,
            store,
            retry_limit: AtomicU32::new(policy.limit),
            retry_interval_ms: AtomicU64::new(policy.interval_ms),
            record_history: AtomicBool::new(record_history),
            last_result: Mutex::new(None),
        });

        let name = format!("incident-{}", tracker_id);
        let worker = SenderWorker {
            shared: Arc::clone(&shared),
            client,
        };
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(|e| hatohol_common::Error::ThreadSpawn {
                name,
                reason: e.to_string(),
            })?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    pub fn tracker_id(&self) -> TrackerId {
        self.shared.tracker_id
    }

    /// Append `job` to the queue. `Queued` is reported on the calling thread.
    pub fn queue(&self, mut job: IncidentJob) {
        job.notify(IncidentJobStatus::Queued, 0, None, None);
        debug!(
            event = event_names::INCIDENT_QUEUED,
            tracker_id = %self.shared.tracker_id,
            event_id = %job.request().event_id(),
            "incident job queued"
        );
        self.shared.queue().push_back(job);
        self.shared.signal.post();
    }

    /// True when nothing is queued and nothing is being sent.
    pub fn is_idling(&self) -> bool {
        let queue = self.shared.queue();
        queue.is_empty() && !self.shared.running.load(Ordering::SeqCst)
    }

    pub fn queued_jobs(&self) -> usize {
        self.shared.queue().len()
    }

    /// Drop the cached tracker config; the next job reloads it.
    pub fn notify_tracker_changed(&self) {
        self.shared.tracker.invalidate();
    }

    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        self.shared.retry_limit.store(policy.limit, Ordering::SeqCst);
        self.shared
            .retry_interval_ms
            .store(policy.interval_ms, Ordering::SeqCst);
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.shared.policy()
    }

    pub fn set_record_history(&self, enabled: bool) {
        self.shared.record_history.store(enabled, Ordering::SeqCst);
    }

    /// Outcome of the most recent finished job.
    pub fn last_result(&self) -> Option<Result<(), SendError>> {
        self.shared
            .last_result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Drop for IncidentSender {
    fn drop(&mut self) {
        self.shared.exit_requested.store(true, Ordering::SeqCst);
        self.shared.signal.post();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(tracker_id = %self.shared.tracker_id, "incident sender thread panicked");
            }
        }

        let pending: Vec<IncidentJob> = self.shared.queue().drain(..).collect();
        for mut job in pending {
            job.notify(
                IncidentJobStatus::Failed,
                0,
                None,
                Some(SendError::Cancelled),
            );
        }
    }
}

impl std::fmt::Debug for IncidentSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentSender")
            .field("tracker_id", &self.shared.tracker_id)
            .field("queued_jobs", &self.queued_jobs())
            .field("policy", &self.retry_policy())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Worker
// -----------------------------------------------------------------------------

struct SenderWorker {
    shared: Arc<SenderShared>,
    client: Box<dyn IncidentTrackerClient>,
}

impl SenderWorker {
    fn run(mut self) {
        info!(tracker_id = %self.shared.tracker_id, "incident sender started");
        loop {
            self.shared.signal.wait();
            if self.shared.is_exit_requested() {
                break;
            }
            let job = {
                let mut queue = self.shared.queue();
                let job = queue.pop_front();
                if job.is_some() {
                    self.shared.running.store(true, Ordering::SeqCst);
                }
                job
            };
            if let Some(job) = job {
                self.process(job);
            }
        }
        debug!(tracker_id = %self.shared.tracker_id, "incident sender stopped");
    }

    fn process(&mut self, mut job: IncidentJob) {
        job.notify(IncidentJobStatus::Started, 0, None, None);

        let tracker = match self.shared.tracker.get() {
            Ok(tracker) => tracker,
            Err(e) => {
                warn!(tracker_id = %self.shared.tracker_id, error = %e, "tracker config unavailable");
                self.fail(job, 0, SendError::TrackerNotFound(self.shared.tracker_id));
                return;
            }
        };

        let policy = self.shared.policy();
        let mut retry_count = 0;
        loop {
            let err = match self.send(&tracker, job.request()) {
                Ok(incident) => {
                    self.succeed(job, retry_count, incident);
                    return;
                }
                Err(err) => err,
            };

            if !err.is_retryable() || retry_count >= policy.limit {
                self.fail(job, retry_count, err);
                return;
            }

            warn!(
                event = event_names::INCIDENT_RETRY,
                tracker_id = %self.shared.tracker_id,
                retry = retry_count + 1,
                limit = policy.limit,
                error = %err,
                "incident send failed, retrying"
            );
            job.notify(
                IncidentJobStatus::WaitingRetry,
                retry_count,
                None,
                Some(err.clone()),
            );
            if self.shared.is_exit_requested() {
                self.fail(job, retry_count, err);
                return;
            }
            thread::sleep(policy.interval());
            if self.shared.is_exit_requested() {
                self.fail(job, retry_count, err);
                return;
            }
            retry_count += 1;
            job.notify(IncidentJobStatus::Retrying, retry_count, None, None);
        }
    }

    fn send(
        &mut self,
        tracker: &TrackerConfig,
        request: &IncidentRequest,
    ) -> Result<IncidentInfo, SendError> {
        match request {
            IncidentRequest::Create(event) => self.client.create_incident(tracker, event),
            IncidentRequest::Update { incident, comment } => {
                self.client.update_incident(tracker, incident, comment)
            }
        }
    }

    fn succeed(&self, mut job: IncidentJob, retry_count: u32, incident: IncidentInfo) {
        if self.shared.record_history.load(Ordering::SeqCst) {
            let record = IncidentHistoryRecord::for_success(&job, &incident);
            if let Err(e) = self.shared.store.persist_incident_history(&record) {
                warn!(
                    event = event_names::STORE_WRITE_FAILED,
                    tracker_id = %self.shared.tracker_id,
                    error = %e,
                    "failed to persist incident history"
                );
            }
        }
        info!(
            event = event_names::INCIDENT_SENT,
            tracker_id = %self.shared.tracker_id,
            identifier = %incident.identifier,
            retries = retry_count,
            "incident sent"
        );
        self.shared.set_last_result(Ok(()));
        self.shared.finish_running();
        job.notify(IncidentJobStatus::Succeeded, retry_count, Some(incident), None);
    }

    fn fail(&self, mut job: IncidentJob, retry_count: u32, err: SendError) {
        warn!(
            event = event_names::INCIDENT_FAILED,
            tracker_id = %self.shared.tracker_id,
            code = err.code(),
            retries = retry_count,
            error = %err,
            "incident send failed"
        );
        self.shared.set_last_result(Err(err.clone()));
        self.shared.finish_running();
        job.notify(IncidentJobStatus::Failed, retry_count, None, Some(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::client::InHouseTracker;
    use crate::incident::tracker::TrackerConfig;
    use crate::memory::MemoryIncidentStore;
    use chrono::Utc;
    use hatohol_common::{
        EventId, EventInfo, EventType, ServerId, Severity, TriggerId, TriggerStatus, UserId,
    };
    use std::sync::mpsc;

    fn event(id: &str) -> EventInfo {
        EventInfo {
            server_id: ServerId(1),
            event_id: EventId(id.to_string()),
            trigger_id: TriggerId("t1".to_string()),
            event_type: EventType::Bad,
            status: TriggerStatus::Problem,
            severity: Severity::Error,
            host_id: "h1".to_string(),
            host_name: "web01".to_string(),
            brief: "HTTP check failed".to_string(),
            time: Utc::now(),
        }
    }

    fn store_with_tracker() -> Arc<MemoryIncidentStore> {
        let store = Arc::new(MemoryIncidentStore::new());
        store.put_tracker(TrackerConfig::in_house(TrackerId(1), "local"));
        store
    }

    #[test]
    fn test_in_house_create_succeeds_and_records_history() {
        let store = store_with_tracker();
        let sender = IncidentSender::start(
            TrackerId(1),
            Box::new(InHouseTracker),
            store.clone(),
            RetryPolicy::default(),
            true,
        )
        .unwrap();

        let (tx, rx) = mpsc::channel();
        sender.queue(
            IncidentJob::create(event("100"), UserId(3)).with_callback(move |notice| {
                tx.send(notice.status).unwrap();
            }),
        );

        let mut seen = Vec::new();
        while let Ok(status) = rx.recv_timeout(Duration::from_secs(5)) {
            seen.push(status);
            if status.is_terminal() {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                IncidentJobStatus::Queued,
                IncidentJobStatus::Started,
                IncidentJobStatus::Succeeded
            ]
        );

        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_id, UserId(3));
        assert_eq!(history[0].status, "NONE");
        assert_eq!(sender.last_result(), Some(Ok(())));
    }

    #[test]
    fn test_missing_tracker_fails_without_retry() {
        let store = Arc::new(MemoryIncidentStore::new());
        let sender = IncidentSender::start(
            TrackerId(8),
            Box::new(InHouseTracker),
            store,
            RetryPolicy::default(),
            false,
        )
        .unwrap();

        let (tx, rx) = mpsc::channel();
        sender.queue(
            IncidentJob::create(event("1"), UserId::SYSTEM).with_callback(move |notice| {
                if notice.status.is_terminal() {
                    tx.send(notice.clone()).unwrap();
                }
            }),
        );
        let notice = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(notice.status, IncidentJobStatus::Failed);
        assert_eq!(notice.error, Some(SendError::TrackerNotFound(TrackerId(8))));
    }

    #[test]
    fn test_drop_cancels_unstarted_jobs() {
        struct Slow;
        impl IncidentTrackerClient for Slow {
            fn create_incident(
                &mut self,
                tracker: &TrackerConfig,
                event: &EventInfo,
            ) -> Result<IncidentInfo, SendError> {
                thread::sleep(Duration::from_millis(200));
                InHouseTracker.create_incident(tracker, event)
            }
            fn update_incident(
                &mut self,
                tracker: &TrackerConfig,
                incident: &IncidentInfo,
                comment: &str,
            ) -> Result<IncidentInfo, SendError> {
                InHouseTracker.update_incident(tracker, incident, comment)
            }
        }

        let store = store_with_tracker();
        let sender = IncidentSender::start(
            TrackerId(1),
            Box::new(Slow),
            store,
            RetryPolicy::default(),
            false,
        )
        .unwrap();

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        for id in ["a", "b", "c"] {
            let outcomes = Arc::clone(&outcomes);
            sender.queue(IncidentJob::create(event(id), UserId::SYSTEM).with_callback(
                move |notice| {
                    if notice.status.is_terminal() {
                        outcomes
                            .lock()
                            .unwrap()
                            .push((notice.event_id.0.clone(), notice.error.clone()));
                    }
                },
            ));
        }
        // Let the worker pick up the first job before shutting down.
        thread::sleep(Duration::from_millis(50));
        drop(sender);

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0], ("a".to_string(), None));
        assert!(outcomes[1..]
            .iter()
            .all(|(_, err)| err == &Some(SendError::Cancelled)));
    }

    #[test]
    fn test_retry_policy_is_adjustable() {
        let store = store_with_tracker();
        let sender = IncidentSender::start(
            TrackerId(1),
            Box::new(InHouseTracker),
            store,
            RetryPolicy::default(),
            false,
        )
        .unwrap();
        assert_eq!(sender.retry_policy(), RetryPolicy::default());

        let policy = RetryPolicy {
            limit: 1,
            interval_ms: 10,
        };
        sender.set_retry_policy(policy);
        assert_eq!(sender.retry_policy(), policy);
        assert!(sender.is_idling());
    }
}
