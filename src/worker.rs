//! Worker identities for the job queue.
//!
//! Workers are execution identities, not threads: the dispatcher picks one
//! per event and runs the job on it inline, so per-worker counters describe
//! how dispatch was distributed rather than parallelism.

use crate::error::{DispatchError, DispatchResult};
use crate::job::Job;
use crate::metrics::WorkerMetrics;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A job-processing identity with its own counters.
pub struct Worker {
    id: String,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    started_at: Instant,
    process_delay_nanos: AtomicU64,
}

impl Worker {
    pub(crate) fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            started_at: Instant::now(),
            process_delay_nanos: AtomicU64::new(0),
        }
    }

    /// Worker identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Jobs this worker finished without error.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Jobs that failed on this worker.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Submission backpressure events observed queue-wide.
    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    /// Time since this worker was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Artificial delay applied before each job, for throttling and tests.
    pub fn process_delay(&self) -> Duration {
        Duration::from_nanos(self.process_delay_nanos.load(Ordering::Relaxed))
    }

    /// Set the artificial per-job processing delay.
    pub fn set_process_delay(&self, delay: Duration) {
        self.process_delay_nanos
            .store(delay.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Copy the counters into a [`WorkerMetrics`] snapshot.
    pub fn metrics(&self) -> WorkerMetrics {
        WorkerMetrics {
            worker_id: self.id.clone(),
            completed: self.completed(),
            retried: self.retried(),
            failed: self.failed(),
            uptime: self.uptime(),
        }
    }

    pub(crate) fn increment_retries(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Run a job to completion, driving its status machine.
    ///
    /// A panicking closure is caught and recorded as a failure, the same
    /// as a returned error.
    pub(crate) async fn process(&self, job: &Job) -> DispatchResult<()> {
        job.mark_started();

        let delay = self.process_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = match job.take_work() {
            Some(work) => match std::panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(result) => result,
                Err(panic) => Err(DispatchError::task_panic(panic)),
            },
            None => Err(DispatchError::task_failure("job work already consumed")),
        };

        match result {
            Ok(()) => {
                job.mark_completed();
                self.completed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker_id = %self.id, job_key = %job.key(), "job completed");
                Ok(())
            }
            Err(err) => {
                job.mark_failed();
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(worker_id = %self.id, job_key = %job.key(), error = %err, "job failed");
                Err(DispatchError::job_failure(job.key(), err))
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("completed", &self.completed())
            .field("failed", &self.failed())
            .field("retried", &self.retried())
            .finish()
    }
}
