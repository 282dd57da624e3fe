//! Registry of incident senders, one per tracker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use hatohol_common::{EventInfo, IncidentInfo, TrackerId, UserId};
use tracing::info;

use super::client::{InHouseTracker, IncidentTrackerClient, SendError};
use super::job::{IncidentJob, IncidentJobStatus, StatusCallback};
use super::sender::{IncidentSender, RetryPolicy};
use super::tracker::{TrackerConfig, TrackerKind};
use crate::config::IncidentSenderConfig;
use crate::store::IncidentStore;

/// Picks the client used to talk to a tracker.
pub type ClientResolver =
    Box<dyn Fn(&TrackerConfig) -> Result<Box<dyn IncidentTrackerClient>, SendError> + Send + Sync>;

/// Resolver that knows only the in-house tracker.
pub fn in_house_resolver() -> ClientResolver {
    Box::new(|config: &TrackerConfig| match config.kind {
        TrackerKind::InHouse => Ok(Box::new(InHouseTracker) as Box<dyn IncidentTrackerClient>),
        other => Err(SendError::Unsupported(format!(
            "no client for {} tracker {}",
            other, config.id
        ))),
    })
}

/// Lazily creates an [`IncidentSender`] the first time a tracker is used.
pub struct IncidentSenderManager {
    store: Arc<dyn IncidentStore>,
    resolver: ClientResolver,
    senders: Mutex<HashMap<TrackerId, IncidentSender>>,
    policy: Mutex<RetryPolicy>,
    record_history: bool,
}

impl IncidentSenderManager {
    pub fn new(store: Arc<dyn IncidentStore>, resolver: ClientResolver) -> Self {
        Self {
            store,
            resolver,
            senders: Mutex::new(HashMap::new()),
            policy: Mutex::new(RetryPolicy::default()),
            record_history: true,
        }
    }

    /// Manager using the `incident_sender` section of the config.
    pub fn from_config(
        config: &IncidentSenderConfig,
        store: Arc<dyn IncidentStore>,
        resolver: ClientResolver,
    ) -> Self {
        Self::new(store, resolver)
            .with_policy(config.retry_policy())
            .with_record_history(config.record_history)
    }

    pub fn with_policy(self, policy: RetryPolicy) -> Self {
        *self.lock_policy() = policy;
        self
    }

    pub fn with_record_history(mut self, enabled: bool) -> Self {
        self.record_history = enabled;
        self
    }

    /// Queue creation of an incident for `event` on `tracker_id`.
    pub fn queue_create(
        &self,
        tracker_id: TrackerId,
        event: EventInfo,
        user_id: UserId,
        callback: Option<StatusCallback>,
    ) -> Result<(), SendError> {
        let job = IncidentJob::create(event, user_id).with_boxed_callback(callback);
        self.queue(tracker_id, job)
    }

    /// Queue an update of `incident` on the tracker that owns it.
    pub fn queue_update(
        &self,
        incident: IncidentInfo,
        comment: impl Into<String>,
        user_id: UserId,
        callback: Option<StatusCallback>,
    ) -> Result<(), SendError> {
        let tracker_id = incident.tracker_id;
        let job = IncidentJob::update(incident, comment, user_id).with_boxed_callback(callback);
        self.queue(tracker_id, job)
    }

    /// Hand `job` to the tracker's sender, creating it if needed.
    ///
    /// When no sender can be built the job is failed right away: its
    /// callback sees `Failed` and the error is returned.
    pub fn queue(&self, tracker_id: TrackerId, mut job: IncidentJob) -> Result<(), SendError> {
        let mut senders = self.lock_senders();
        if !senders.contains_key(&tracker_id) {
            match self.spawn_sender(tracker_id) {
                Ok(sender) => {
                    senders.insert(tracker_id, sender);
                }
                Err(err) => {
                    drop(senders);
                    job.notify(IncidentJobStatus::Failed, 0, None, Some(err.clone()));
                    return Err(err);
                }
            }
        }
        if let Some(sender) = senders.get(&tracker_id) {
            sender.queue(job);
        }
        Ok(())
    }

    /// True when every sender is idle.
    pub fn is_idling(&self) -> bool {
        self.lock_senders().values().all(IncidentSender::is_idling)
    }

    pub fn notify_tracker_changed(&self, tracker_id: TrackerId) {
        if let Some(sender) = self.lock_senders().get(&tracker_id) {
            sender.notify_tracker_changed();
        }
    }

    /// Tear down a deleted tracker's sender. Returns whether one existed.
    pub fn delete_tracker(&self, tracker_id: TrackerId) -> bool {
        let removed = self.lock_senders().remove(&tracker_id);
        // Joining happens in the sender's drop, outside the registry lock.
        match removed {
            Some(sender) => {
                info!(tracker_id = %tracker_id, "incident sender removed");
                drop(sender);
                true
            }
            None => false,
        }
    }

    /// Change the retry policy of current and future senders.
    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        *self.lock_policy() = policy;
        for sender in self.lock_senders().values() {
            sender.set_retry_policy(policy);
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        *self.lock_policy()
    }

    pub fn records_history(&self) -> bool {
        self.record_history
    }

    pub fn tracker_ids(&self) -> Vec<TrackerId> {
        let mut ids: Vec<TrackerId> = self.lock_senders().keys().copied().collect();
        ids.sort();
        ids
    }

    fn spawn_sender(&self, tracker_id: TrackerId) -> Result<IncidentSender, SendError> {
        let config = self
            .store
            .load_tracker_config(tracker_id)
            .map_err(|_| SendError::TrackerNotFound(tracker_id))?;
        let client = (self.resolver)(&config)?;
        let kind = config.kind;
        let sender = IncidentSender::start_with_config(
            config,
            client,
            Arc::clone(&self.store),
            self.retry_policy(),
            self.record_history,
        )
        .map_err(|e| SendError::FailedToSend(e.to_string()))?;
        info!(tracker_id = %tracker_id, kind = %kind, "incident sender created");
        Ok(sender)
    }

    fn lock_senders(&self) -> MutexGuard<'_, HashMap<TrackerId, IncidentSender>> {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_policy(&self) -> MutexGuard<'_, RetryPolicy> {
        self.policy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for IncidentSenderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentSenderManager")
            .field("trackers", &self.tracker_ids())
            .field("policy", &self.retry_policy())
            .field("record_history", &self.record_history)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIncidentStore;
    use chrono::Utc;
    use hatohol_common::{EventId, EventType, ServerId, Severity, TriggerId, TriggerStatus};
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn event(id: &str) -> EventInfo {
        EventInfo {
            server_id: ServerId(1),
            event_id: EventId(id.to_string()),
            trigger_id: TriggerId("t".to_string()),
            event_type: EventType::Bad,
            status: TriggerStatus::Problem,
            severity: Severity::Warning,
            host_id: "h".to_string(),
            host_name: "host".to_string(),
            brief: "load high".to_string(),
            time: Utc::now(),
        }
    }

    fn wait_idle(manager: &IncidentSenderManager) {
        let started = Instant::now();
        while !manager.is_idling() && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_sender_created_lazily() {
        let store = Arc::new(MemoryIncidentStore::new());
        store.put_tracker(TrackerConfig::in_house(TrackerId(1), "local"));
        let manager = IncidentSenderManager::new(store.clone(), in_house_resolver());
        assert!(manager.tracker_ids().is_empty());
        assert!(manager.is_idling());

        manager
            .queue_create(TrackerId(1), event("e1"), UserId(2), None)
            .unwrap();
        assert_eq!(manager.tracker_ids(), vec![TrackerId(1)]);
        // One store read builds the sender and primes its cache.
        assert_eq!(store.tracker_loads(), 1);

        wait_idle(&manager);
        assert_eq!(store.history().len(), 1);
    }

    #[test]
    fn test_unknown_tracker_fails_job() {
        let store = Arc::new(MemoryIncidentStore::new());
        let manager = IncidentSenderManager::new(store, in_house_resolver());

        let (tx, rx) = mpsc::channel();
        let callback: StatusCallback = Box::new(move |notice| {
            tx.send(notice.clone()).unwrap();
        });
        let err = manager
            .queue_create(TrackerId(42), event("e1"), UserId::SYSTEM, Some(callback))
            .unwrap_err();
        assert_eq!(err, SendError::TrackerNotFound(TrackerId(42)));

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.status, IncidentJobStatus::Failed);
        assert!(manager.tracker_ids().is_empty());
    }

    #[test]
    fn test_unsupported_kind_rejected() {
        let store = Arc::new(MemoryIncidentStore::new());
        let mut config = TrackerConfig::in_house(TrackerId(2), "redmine");
        config.kind = TrackerKind::Redmine;
        store.put_tracker(config);
        let manager = IncidentSenderManager::new(store, in_house_resolver());

        let err = manager
            .queue_create(TrackerId(2), event("e1"), UserId::SYSTEM, None)
            .unwrap_err();
        assert!(matches!(err, SendError::Unsupported(_)));
    }

    #[test]
    fn test_policy_applies_to_existing_and_new_senders() {
        let store = Arc::new(MemoryIncidentStore::new());
        store.put_tracker(TrackerConfig::in_house(TrackerId(1), "a"));
        store.put_tracker(TrackerConfig::in_house(TrackerId(2), "b"));
        let manager = IncidentSenderManager::new(store, in_house_resolver());

        manager
            .queue_create(TrackerId(1), event("e1"), UserId::SYSTEM, None)
            .unwrap();
        let policy = RetryPolicy {
            limit: 5,
            interval_ms: 100,
        };
        manager.set_retry_policy(policy);
        manager
            .queue_create(TrackerId(2), event("e2"), UserId::SYSTEM, None)
            .unwrap();

        let senders = manager.lock_senders();
        assert!(senders.values().all(|s| s.retry_policy() == policy));
    }

    #[test]
    fn test_from_config_applies_sender_settings() {
        let store = Arc::new(MemoryIncidentStore::new());
        store.put_tracker(TrackerConfig::in_house(TrackerId(1), "local"));
        let config = IncidentSenderConfig {
            retry_limit: 7,
            retry_interval_ms: 250,
            record_history: false,
        };
        let manager = IncidentSenderManager::from_config(&config, store.clone(), in_house_resolver());
        assert_eq!(
            manager.retry_policy(),
            RetryPolicy {
                limit: 7,
                interval_ms: 250
            }
        );
        assert!(!manager.records_history());

        let (tx, rx) = mpsc::channel();
        let callback: StatusCallback = Box::new(move |notice| {
            if notice.status.is_terminal() {
                tx.send(notice.status).unwrap();
            }
        });
        manager
            .queue_create(TrackerId(1), event("e1"), UserId(2), Some(callback))
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            IncidentJobStatus::Succeeded
        );
        assert!(store.history().is_empty());
        assert!(manager
            .lock_senders()
            .values()
            .all(|s| s.retry_policy().limit == 7));
    }

    #[test]
    fn test_default_config_matches_default_manager() {
        let store = Arc::new(MemoryIncidentStore::new());
        let manager = IncidentSenderManager::from_config(
            &IncidentSenderConfig::default(),
            store,
            in_house_resolver(),
        );
        assert_eq!(manager.retry_policy(), RetryPolicy::default());
        assert!(manager.records_history());
    }

    #[test]
    fn test_delete_tracker() {
        let store = Arc::new(MemoryIncidentStore::new());
        store.put_tracker(TrackerConfig::in_house(TrackerId(1), "local"));
        let manager = IncidentSenderManager::new(store, in_house_resolver());
        manager
            .queue_create(TrackerId(1), event("e1"), UserId::SYSTEM, None)
            .unwrap();

        assert!(manager.delete_tracker(TrackerId(1)));
        assert!(!manager.delete_tracker(TrackerId(1)));
        assert!(manager.tracker_ids().is_empty());
    }
}
