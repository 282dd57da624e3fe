//! Incident tracker configuration and its per-sender cache.

use std::sync::{Arc, Mutex, MutexGuard};

use hatohol_common::{Result, TrackerId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::logging::event_names;
use crate::store::IncidentStore;

/// Backend kind of an incident tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    /// Incidents kept in the central store only.
    InHouse,
    Redmine,
}

impl std::fmt::Display for TrackerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerKind::InHouse => write!(f, "in_house"),
            TrackerKind::Redmine => write!(f, "redmine"),
        }
    }
}

/// Connection settings of one incident tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub id: TrackerId,
    pub kind: TrackerKind,
    pub nickname: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub tracker_name: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl TrackerConfig {
    pub fn in_house(id: TrackerId, nickname: impl Into<String>) -> Self {
        Self {
            id,
            kind: TrackerKind::InHouse,
            nickname: nickname.into(),
            base_url: String::new(),
            project_id: String::new(),
            tracker_name: String::new(),
            user_name: String::new(),
            password: String::new(),
        }
    }

    /// Public URL of a ticket, empty when the tracker has no web front.
    pub fn location(&self, identifier: &str) -> String {
        match self.kind {
            TrackerKind::InHouse => String::new(),
            TrackerKind::Redmine => {
                format!("{}/issues/{}", self.base_url.trim_end_matches('/'), identifier)
            }
        }
    }
}

/// Lazily refreshed copy of one tracker's configuration.
///
/// Has its own lock so a slow reload never holds up job dispatch.
pub struct TrackerConfigCache {
    tracker_id: TrackerId,
    store: Arc<dyn IncidentStore>,
    cached: Mutex<Option<TrackerConfig>>,
}

impl TrackerConfigCache {
    /// Create the cache and try a first load. A failed load is retried on
    /// the next [`get`](Self::get).
    pub fn new(tracker_id: TrackerId, store: Arc<dyn IncidentStore>) -> Self {
        let cache = Self {
            tracker_id,
            store,
            cached: Mutex::new(None),
        };
        if let Err(e) = cache.get() {
            warn!(tracker_id = %tracker_id, error = %e, "initial tracker config load failed");
        }
        cache
    }

    /// Create the cache around a config that was just loaded.
    pub fn with_config(config: TrackerConfig, store: Arc<dyn IncidentStore>) -> Self {
        Self {
            tracker_id: config.id,
            store,
            cached: Mutex::new(Some(config)),
        }
    }

    pub fn tracker_id(&self) -> TrackerId {
        self.tracker_id
    }

    /// Current configuration, reloading it if invalidated.
    pub fn get(&self) -> Result<TrackerConfig> {
        let mut cached = self.lock();
        if let Some(config) = cached.as_ref() {
            return Ok(config.clone());
        }
        let config = self.store.load_tracker_config(self.tracker_id)?;
        debug!(
            event = event_names::TRACKER_RELOADED,
            tracker_id = %self.tracker_id,
            kind = %config.kind,
            "tracker config loaded"
        );
        *cached = Some(config.clone());
        Ok(config)
    }

    pub fn invalidate(&self) {
        *self.lock() = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<TrackerConfig>> {
        self.cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
