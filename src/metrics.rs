//! Metrics for dispatchq queues.
//!
//! Counters are plain atomics updated on the hot path; the snapshot types
//! here are point-in-time copies safe to serialize or compare. Snapshots
//! taken while work is racing are best-effort: they never lose a recorded
//! failure, but `in_flight` arithmetic can transiently disagree with the
//! individual counters.

use crate::job::{Job, JobStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time view of a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobMetrics {
    /// Job key
    pub key: String,
    /// Descriptor of what the job does
    pub function: String,
    /// Descriptor of the job's arguments
    pub args: String,
    /// Monotonic nanoseconds at submission
    pub queued_at: u64,
    /// Monotonic nanoseconds when a worker picked the job up
    pub started_at: Option<u64>,
    /// Monotonic nanoseconds when processing finished
    pub completed_at: Option<u64>,
    /// Lifecycle state at capture time
    pub status: JobStatus,
}

impl JobMetrics {
    /// Capture the current view of a job.
    pub fn capture(job: &Job) -> Self {
        Self {
            key: job.key().to_string(),
            function: job.function().to_string(),
            args: job.args().to_string(),
            queued_at: job.queued_at(),
            started_at: job.started_at(),
            completed_at: job.completed_at(),
            status: job.status(),
        }
    }
}

/// Point-in-time view of a single worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerMetrics {
    /// Worker identifier
    pub worker_id: String,
    /// Jobs this worker finished without error
    pub completed: u64,
    /// Submission backpressure events observed queue-wide
    pub retried: u64,
    /// Jobs that failed on this worker
    pub failed: u64,
    /// Time since the worker was created
    pub uptime: Duration,
}

/// Point-in-time view of a job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueMetrics {
    /// Number of configured workers
    pub active_workers: usize,
    /// Jobs accepted since the queue was created
    pub queued: u64,
    /// `queued - completed - failed`; signed because racing counter reads
    /// can transiently run ahead of each other
    pub in_flight: i64,
}

/// Aggregate snapshot of an async task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskMetrics {
    /// Tasks accepted for execution
    pub submitted: u64,
    /// Tasks that finished without error
    pub completed: u64,
    /// Tasks that exhausted their retries or timed out
    pub failed: u64,
    /// Summed execution time of completed tasks
    pub total_execution_time: Duration,
    /// `total_execution_time / completed`, zero when nothing completed
    pub average_execution_time: Duration,
}

/// Live counters for [`AsyncTaskQueue`](crate::queue::AsyncTaskQueue).
#[derive(Debug)]
pub struct TaskQueueMetrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    total_execution_nanos: AtomicU64,
    logging_enabled: bool,
}

impl TaskQueueMetrics {
    /// Create zeroed counters.
    pub fn new(logging_enabled: bool) -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_execution_nanos: AtomicU64::new(0),
            logging_enabled,
        }
    }

    pub(crate) fn record_submitted(&self) {
        let count = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        if self.logging_enabled {
            tracing::trace!(submitted = count, "task submitted");
        }
    }

    pub(crate) fn record_completed(&self, elapsed: Duration) {
        let count = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        self.total_execution_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        if self.logging_enabled {
            tracing::trace!(completed = count, ?elapsed, "task completed");
        }
    }

    pub(crate) fn record_failed(&self) {
        let count = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
        if self.logging_enabled {
            tracing::trace!(failed = count, "task failed");
        }
    }

    /// Tasks accepted for execution.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Tasks that finished without error.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Tasks that exhausted their retries or timed out.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Summed execution time of completed tasks.
    pub fn total_execution_time(&self) -> Duration {
        Duration::from_nanos(self.total_execution_nanos.load(Ordering::Relaxed))
    }

    /// Mean execution time, zero when nothing has completed.
    pub fn average_execution_time(&self) -> Duration {
        let completed = self.completed();
        if completed == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_execution_nanos.load(Ordering::Relaxed) / completed)
    }

    /// Copy the counters into a [`TaskMetrics`] snapshot.
    pub fn snapshot(&self) -> TaskMetrics {
        TaskMetrics {
            submitted: self.submitted(),
            completed: self.completed(),
            failed: self.failed(),
            total_execution_time: self.total_execution_time(),
            average_execution_time: self.average_execution_time(),
        }
    }
}
