//! Job definitions for the job queue.
//!
//! A [`Job`] carries a one-shot work closure together with the bookkeeping
//! the queue reports through metrics: a generated key, free-form `function`
//! and `args` descriptors, lifecycle timestamps, and a [`JobStatus`] that
//! moves `Queued -> Started -> Completed | Failed`.

use crate::error::DispatchResult;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

/// One-shot work closure executed by a worker.
pub type JobWork = Box<dyn FnOnce() -> DispatchResult<()> + Send>;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the first clock read in this process.
///
/// Timestamps from here are only comparable to each other. 0 is reserved
/// for "not yet stamped".
pub(crate) fn monotonic_nanos() -> u64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    Instant::now().duration_since(epoch).as_nanos().max(1) as u64
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted into the buffer, not yet picked up
    Queued,
    /// A worker is processing it
    Started,
    /// Work finished without error
    Completed,
    /// Work returned an error
    Failed,
}

impl JobStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Queued,
            1 => Self::Started,
            2 => Self::Completed,
            _ => Self::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Started => 1,
            Self::Completed => 2,
            Self::Failed => 3,
        }
    }
}

/// A unit of work submitted to [`JobQueue`](crate::queue::JobQueue).
///
/// Status and timestamps are updated atomically by the worker that executes
/// the job, so metrics captures read them without locking.
pub struct Job {
    key: String,
    function: String,
    args: String,
    work: Mutex<Option<JobWork>>,
    queued_at: u64,
    started_at: AtomicU64,
    completed_at: AtomicU64,
    status: AtomicU8,
}

impl Job {
    /// Create a job around a work closure.
    ///
    /// `function` and `args` are free-form descriptors surfaced in metrics;
    /// the key is generated. The job is stamped `Queued` immediately.
    pub fn new<F>(function: impl Into<String>, args: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> DispatchResult<()> + Send + 'static,
    {
        Self {
            key: uuid::Uuid::new_v4().to_string(),
            function: function.into(),
            args: args.into(),
            work: Mutex::new(Some(Box::new(work))),
            queued_at: monotonic_nanos(),
            started_at: AtomicU64::new(0),
            completed_at: AtomicU64::new(0),
            status: AtomicU8::new(JobStatus::Queued.as_u8()),
        }
    }

    /// Unique key assigned at construction.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Descriptor of what the job does.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Descriptor of the job's arguments.
    pub fn args(&self) -> &str {
        &self.args
    }

    /// Current lifecycle state.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// When the job entered the buffer, in monotonic nanoseconds.
    pub fn queued_at(&self) -> u64 {
        self.queued_at
    }

    /// When a worker picked the job up, if it has been.
    pub fn started_at(&self) -> Option<u64> {
        match self.started_at.load(Ordering::Acquire) {
            0 => None,
            nanos => Some(nanos),
        }
    }

    /// When processing finished, if it has.
    pub fn completed_at(&self) -> Option<u64> {
        match self.completed_at.load(Ordering::Acquire) {
            0 => None,
            nanos => Some(nanos),
        }
    }

    pub(crate) fn mark_started(&self) {
        self.started_at.store(monotonic_nanos(), Ordering::Release);
        self.status
            .store(JobStatus::Started.as_u8(), Ordering::Release);
    }

    pub(crate) fn mark_completed(&self) {
        self.completed_at
            .store(monotonic_nanos(), Ordering::Release);
        self.status
            .store(JobStatus::Completed.as_u8(), Ordering::Release);
    }

    pub(crate) fn mark_failed(&self) {
        self.completed_at
            .store(monotonic_nanos(), Ordering::Release);
        self.status
            .store(JobStatus::Failed.as_u8(), Ordering::Release);
    }

    /// Take the work closure. Yields `Some` exactly once.
    pub(crate) fn take_work(&self) -> Option<JobWork> {
        // A poisoned lock still hands back its guard; nothing under it can
        // be left half-written.
        let mut guard = match self.work.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("key", &self.key)
            .field("function", &self.function)
            .field("args", &self.args)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
