//! Incident sender behavior against scripted tracker clients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use hatohol_common::{
    EventId, EventInfo, EventType, IncidentInfo, ServerId, Severity, TrackerId, TriggerId,
    TriggerStatus, UserId,
};
use hatohol_core::incident::{
    InHouseTracker, IncidentJob, IncidentJobStatus, IncidentSender, IncidentTrackerClient,
    RetryPolicy, SendError, StatusNotice, TrackerConfig,
};
use hatohol_core::memory::MemoryIncidentStore;

const WAIT: Duration = Duration::from_secs(5);

fn event(id: &str) -> EventInfo {
    EventInfo {
        server_id: ServerId(1),
        event_id: EventId(id.to_string()),
        trigger_id: TriggerId("100".to_string()),
        event_type: EventType::Bad,
        status: TriggerStatus::Problem,
        severity: Severity::Critical,
        host_id: "10084".to_string(),
        host_name: "app01".to_string(),
        brief: "Service down".to_string(),
        time: Utc::now(),
    }
}

/// Client that fails a set number of times before succeeding.
#[derive(Clone)]
struct FlakyClient {
    failures: Arc<AtomicUsize>,
    error: SendError,
    delay: Duration,
    attempts: Arc<Mutex<Vec<(String, Instant)>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FlakyClient {
    fn new(failures: usize, error: SendError) -> Self {
        Self {
            failures: Arc::new(AtomicUsize::new(failures)),
            error,
            delay: Duration::ZERO,
            attempts: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn reliable() -> Self {
        Self::new(0, SendError::FailedToSend("unused".into()))
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn attempts(&self) -> Vec<(String, Instant)> {
        self.attempts.lock().unwrap().clone()
    }

    fn attempt(&self, event_id: &EventId) -> Result<(), SendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.attempts
            .lock()
            .unwrap()
            .push((event_id.0.clone(), Instant::now()));
        thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(self.error.clone());
        }
        Ok(())
    }
}

impl IncidentTrackerClient for FlakyClient {
    fn create_incident(
        &mut self,
        tracker: &TrackerConfig,
        event: &EventInfo,
    ) -> Result<IncidentInfo, SendError> {
        self.attempt(&event.event_id)?;
        InHouseTracker.create_incident(tracker, event)
    }

    fn update_incident(
        &mut self,
        tracker: &TrackerConfig,
        incident: &IncidentInfo,
        comment: &str,
    ) -> Result<IncidentInfo, SendError> {
        self.attempt(&incident.event_id)?;
        InHouseTracker.update_incident(tracker, incident, comment)
    }
}

fn start(
    client: &FlakyClient,
    policy: RetryPolicy,
) -> (IncidentSender, Arc<MemoryIncidentStore>) {
    let store = Arc::new(MemoryIncidentStore::new());
    store.put_tracker(TrackerConfig::in_house(TrackerId(1), "local"));
    let sender = IncidentSender::start(
        TrackerId(1),
        Box::new(client.clone()),
        store.clone(),
        policy,
        true,
    )
    .unwrap();
    (sender, store)
}

/// Queue one create job and collect its notices until it finishes.
fn run_one(sender: &IncidentSender, id: &str) -> Vec<StatusNotice> {
    let (tx, rx) = mpsc::channel();
    sender.queue(
        IncidentJob::create(event(id), UserId(7)).with_callback(move |notice| {
            let _ = tx.send(notice.clone());
        }),
    );
    let mut notices = Vec::new();
    while let Ok(notice) = rx.recv_timeout(WAIT) {
        let done = notice.status.is_terminal();
        notices.push(notice);
        if done {
            break;
        }
    }
    notices
}

fn statuses(notices: &[StatusNotice]) -> Vec<IncidentJobStatus> {
    notices.iter().map(|n| n.status).collect()
}

fn fast_policy(limit: u32) -> RetryPolicy {
    RetryPolicy {
        limit,
        interval_ms: 30,
    }
}

#[test]
fn retries_are_bounded_and_spaced() {
    let client = FlakyClient::new(usize::MAX, SendError::FailedToSend("timeout".into()));
    let (sender, store) = start(&client, fast_policy(3));

    let notices = run_one(&sender, "e1");
    use IncidentJobStatus::*;
    assert_eq!(
        statuses(&notices),
        vec![
            Queued,
            Started,
            WaitingRetry,
            Retrying,
            WaitingRetry,
            Retrying,
            WaitingRetry,
            Retrying,
            Failed
        ]
    );
    assert_eq!(notices.last().unwrap().retry_count, 3);

    let attempts = client.attempts();
    assert_eq!(attempts.len(), 4);
    for pair in attempts.windows(2) {
        assert!(pair[1].1.duration_since(pair[0].1) >= Duration::from_millis(30));
    }
    assert!(store.history().is_empty());
    assert_eq!(
        sender.last_result(),
        Some(Err(SendError::FailedToSend("timeout".into())))
    );
}

#[test]
fn permanent_rejection_fails_without_retry() {
    let client = FlakyClient::new(1, SendError::Rejected("project is closed".into()));
    let (sender, store) = start(&client, fast_policy(3));

    let notices = run_one(&sender, "e1");
    assert_eq!(
        statuses(&notices),
        vec![
            IncidentJobStatus::Queued,
            IncidentJobStatus::Started,
            IncidentJobStatus::Failed
        ]
    );
    assert_eq!(
        notices.last().unwrap().error,
        Some(SendError::Rejected("project is closed".into()))
    );
    assert_eq!(client.attempts().len(), 1);
    assert!(store.history().is_empty());
}

#[test]
fn transient_failures_then_success() {
    let client = FlakyClient::new(2, SendError::FailedToSend("503".into()));
    let (sender, store) = start(&client, fast_policy(3));

    let notices = run_one(&sender, "e1");
    let last = notices.last().unwrap();
    assert_eq!(last.status, IncidentJobStatus::Succeeded);
    assert_eq!(last.retry_count, 2);
    assert!(last.incident.is_some());
    assert_eq!(client.attempts().len(), 3);

    let history = store.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].user_id, UserId(7));
    assert_eq!(history[0].event_id, EventId("e1".to_string()));
}

#[test]
fn zero_retry_limit_means_single_attempt() {
    let client = FlakyClient::new(usize::MAX, SendError::FailedToSend("down".into()));
    let (sender, _store) = start(&client, fast_policy(0));

    let notices = run_one(&sender, "e1");
    assert_eq!(notices.last().unwrap().status, IncidentJobStatus::Failed);
    assert_eq!(client.attempts().len(), 1);
}

#[test]
fn jobs_run_fifo_one_at_a_time() {
    let client = FlakyClient::reliable().with_delay(Duration::from_millis(10));
    let (sender, store) = start(&client, fast_policy(3));

    let (tx, rx) = mpsc::channel();
    let ids: Vec<String> = (0..6).map(|i| format!("e{}", i)).collect();
    for id in &ids {
        let tx = tx.clone();
        sender.queue(
            IncidentJob::create(event(id), UserId::SYSTEM).with_callback(move |notice| {
                if notice.status.is_terminal() {
                    let _ = tx.send(notice.status);
                }
            }),
        );
    }
    for _ in &ids {
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), IncidentJobStatus::Succeeded);
    }

    let sent: Vec<String> = client.attempts().into_iter().map(|(id, _)| id).collect();
    assert_eq!(sent, ids);
    assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(store.history().len(), ids.len());
}

#[test]
fn idling_reflects_running_job() {
    let client = FlakyClient::reliable().with_delay(Duration::from_millis(200));
    let (sender, _store) = start(&client, fast_policy(3));
    assert!(sender.is_idling());

    sender.queue(IncidentJob::create(event("slow"), UserId::SYSTEM));
    let started = Instant::now();
    // Busy while queued and while sending.
    while client.attempts().is_empty() && started.elapsed() < WAIT {
        assert!(!sender.is_idling());
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!sender.is_idling());

    while !sender.is_idling() && started.elapsed() < WAIT {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(sender.is_idling());
}

#[test]
fn idle_as_soon_as_terminal_notice_arrives() {
    let client = FlakyClient::reliable();
    let (sender, _store) = start(&client, fast_policy(0));

    for i in 0..200 {
        let (tx, rx) = mpsc::channel();
        sender.queue(
            IncidentJob::create(event(&format!("e{}", i)), UserId::SYSTEM).with_callback(
                move |notice| {
                    if notice.status.is_terminal() {
                        let _ = tx.send(notice.status);
                    }
                },
            ),
        );
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), IncidentJobStatus::Succeeded);
        assert!(sender.is_idling(), "busy after job {} finished", i);
    }
}

#[test]
fn idle_after_failed_job_notice() {
    let client = FlakyClient::new(usize::MAX, SendError::Rejected("closed".into()));
    let (sender, _store) = start(&client, fast_policy(0));

    let notices = run_one(&sender, "e1");
    assert_eq!(notices.last().unwrap().status, IncidentJobStatus::Failed);
    assert!(sender.is_idling());
}

#[test]
fn tracker_change_reloads_config() {
    let client = FlakyClient::reliable();
    let (sender, store) = start(&client, fast_policy(3));
    run_one(&sender, "e1");
    let loads = store.tracker_loads();

    run_one(&sender, "e2");
    assert_eq!(store.tracker_loads(), loads);

    sender.notify_tracker_changed();
    run_one(&sender, "e3");
    assert_eq!(store.tracker_loads(), loads + 1);
}

#[test]
fn update_job_records_comment() {
    let client = FlakyClient::reliable();
    let (sender, store) = start(&client, fast_policy(3));
    let created = run_one(&sender, "e1")
        .pop()
        .and_then(|n| n.incident)
        .unwrap();

    let (tx, rx) = mpsc::channel();
    sender.queue(
        IncidentJob::update(created, "assigned to ops", UserId(9)).with_callback(move |notice| {
            if notice.status.is_terminal() {
                let _ = tx.send(notice.status);
            }
        }),
    );
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), IncidentJobStatus::Succeeded);

    let history = store.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].comment, "assigned to ops");
    assert_eq!(history[1].user_id, UserId(9));
}
