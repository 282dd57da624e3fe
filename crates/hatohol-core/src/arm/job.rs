//! On-demand fetch jobs and the FIFO that feeds them to an arm.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::fetcher::{HistoryQuery, HistorySample, PollResult};

/// Completion continuation of a job. Fires exactly once.
pub type JobCallback = Box<dyn FnOnce(JobReport) + Send + 'static>;

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "result")]
pub enum JobStatus {
    /// The fetch ran; `PollResult` tells whether it worked.
    Completed(PollResult),
    /// The arm shut down before the job ran.
    Cancelled,
}

/// Payload handed to a job's callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistorySample>,
}

impl JobReport {
    pub fn completed(result: PollResult) -> Self {
        Self {
            status: JobStatus::Completed(result),
            history: Vec::new(),
        }
    }

    /// Empty payload for jobs dropped at shutdown.
    pub fn cancelled() -> Self {
        Self {
            status: JobStatus::Cancelled,
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<HistorySample>) -> Self {
        self.history = history;
        self
    }

    /// The poll result if the job ran.
    pub fn result(&self) -> Option<PollResult> {
        match self.status {
            JobStatus::Completed(result) => Some(result),
            JobStatus::Cancelled => None,
        }
    }
}

/// Kind of work a job asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    FetchItems,
    FetchHistory(HistoryQuery),
    FetchTriggers,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::FetchItems => write!(f, "fetch_items"),
            JobKind::FetchHistory(_) => write!(f, "fetch_history"),
            JobKind::FetchTriggers => write!(f, "fetch_triggers"),
        }
    }
}

/// One queued on-demand fetch.
pub struct Job {
    kind: JobKind,
    callback: Option<JobCallback>,
}

impl Job {
    pub fn new(kind: JobKind, callback: Option<JobCallback>) -> Self {
        Self { kind, callback }
    }

    pub fn kind(&self) -> &JobKind {
        &self.kind
    }

    /// Consume the job, delivering `report` to its callback if it has one.
    pub fn complete(self, report: JobReport) {
        if let Some(callback) = self.callback {
            callback(report);
        }
    }

    /// Consume the job without running it.
    pub fn cancel(self) {
        self.complete(JobReport::cancelled());
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("kind", &self.kind)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// FIFO of pending jobs.
///
/// Pushing does not wake the worker; the owner posts its wake signal right
/// after every push.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    pub fn pop(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Remove every remaining job in FIFO order. The caller cancels them,
    /// typically after releasing its lock on the queue.
    pub fn take_all(&mut self) -> Vec<Job> {
        self.jobs.drain(..).collect()
    }
}
