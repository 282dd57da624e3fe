//! Incident jobs, their lifecycle states, and history records.

use chrono::{DateTime, Utc};
use hatohol_common::{EventId, EventInfo, IncidentInfo, TrackerId, UserId};
use serde::{Deserialize, Serialize};

use super::client::SendError;

/// Lifecycle of one incident job.
///
/// `Queued → Started → [WaitingRetry → Retrying]* → Succeeded | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentJobStatus {
    Queued,
    Started,
    WaitingRetry,
    Retrying,
    Succeeded,
    Failed,
}

impl IncidentJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, IncidentJobStatus::Succeeded | IncidentJobStatus::Failed)
    }
}

impl std::fmt::Display for IncidentJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IncidentJobStatus::Queued => "queued",
            IncidentJobStatus::Started => "started",
            IncidentJobStatus::WaitingRetry => "waiting_retry",
            IncidentJobStatus::Retrying => "retrying",
            IncidentJobStatus::Succeeded => "succeeded",
            IncidentJobStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// What a job asks the tracker to do.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentRequest {
    Create(EventInfo),
    Update {
        incident: IncidentInfo,
        comment: String,
    },
}

impl IncidentRequest {
    /// Event the request is about.
    pub fn event_id(&self) -> &EventId {
        match self {
            IncidentRequest::Create(event) => &event.event_id,
            IncidentRequest::Update { incident, .. } => &incident.event_id,
        }
    }
}

/// Payload passed to a job's status callback on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusNotice {
    pub status: IncidentJobStatus,
    pub event_id: EventId,
    /// Retries performed so far (0 for the first attempt).
    pub retry_count: u32,
    /// Set on `Succeeded`.
    pub incident: Option<IncidentInfo>,
    /// Set on `WaitingRetry` and `Failed`.
    pub error: Option<SendError>,
}

pub type StatusCallback = Box<dyn FnMut(&StatusNotice) + Send + 'static>;

/// One queued create/update request.
pub struct IncidentJob {
    request: IncidentRequest,
    user_id: UserId,
    callback: Option<StatusCallback>,
}

impl IncidentJob {
    pub fn create(event: EventInfo, user_id: UserId) -> Self {
        Self {
            request: IncidentRequest::Create(event),
            user_id,
            callback: None,
        }
    }

    pub fn update(incident: IncidentInfo, comment: impl Into<String>, user_id: UserId) -> Self {
        Self {
            request: IncidentRequest::Update {
                incident,
                comment: comment.into(),
            },
            user_id,
            callback: None,
        }
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&StatusNotice) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn with_boxed_callback(mut self, callback: Option<StatusCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn request(&self) -> &IncidentRequest {
        &self.request
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub(crate) fn notify(
        &mut self,
        status: IncidentJobStatus,
        retry_count: u32,
        incident: Option<IncidentInfo>,
        error: Option<SendError>,
    ) {
        if let Some(callback) = self.callback.as_mut() {
            let notice = StatusNotice {
                status,
                event_id: self.request.event_id().clone(),
                retry_count,
                incident,
                error,
            };
            callback(&notice);
        }
    }
}

impl std::fmt::Debug for IncidentJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentJob")
            .field("request", &self.request)
            .field("user_id", &self.user_id)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Who changed which incident to what, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentHistoryRecord {
    pub tracker_id: TrackerId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub status: String,
    #[serde(default)]
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl IncidentHistoryRecord {
    /// History entry for a job that just succeeded with `incident`.
    pub fn for_success(job: &IncidentJob, incident: &IncidentInfo) -> Self {
        let comment = match job.request() {
            IncidentRequest::Create(_) => String::new(),
            IncidentRequest::Update { comment, .. } => comment.clone(),
        };
        Self {
            tracker_id: incident.tracker_id,
            event_id: incident.event_id.clone(),
            user_id: job.user_id(),
            status: incident.status.clone(),
            comment,
            created_at: Utc::now(),
        }
    }
}
