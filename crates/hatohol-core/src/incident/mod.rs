//! Incident delivery to external (or in-house) trackers.
//!
//! Each tracker gets its own [`IncidentSender`]: a FIFO queue drained by a
//! dedicated thread with bounded retry. [`IncidentSenderManager`] creates
//! senders on first use and routes jobs to them.

pub mod client;
pub mod job;
pub mod manager;
pub mod sender;
pub mod tracker;

pub use client::{InHouseTracker, IncidentTrackerClient, SendError, IN_HOUSE_INITIAL_STATUS};
pub use job::{
    IncidentHistoryRecord, IncidentJob, IncidentJobStatus, IncidentRequest, StatusCallback,
    StatusNotice,
};
pub use manager::{in_house_resolver, ClientResolver, IncidentSenderManager};
pub use sender::{IncidentSender, RetryPolicy, DEFAULT_RETRY_INTERVAL_MS, DEFAULT_RETRY_LIMIT};
pub use tracker::{TrackerConfig, TrackerConfigCache, TrackerKind};
