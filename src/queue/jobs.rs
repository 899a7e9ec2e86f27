//! Job queue with bounded-retry submission.
//!
//! [`JobQueue`] accepts [`Job`]s into a fixed-capacity event buffer. When
//! the buffer is full, submission backs off exponentially and retries a
//! configured number of times before rejecting the job outright; accepted
//! jobs are processed strictly in submission order by a single dispatcher
//! that distributes them round-robin across worker identities.

use crate::config::Config;
use crate::error::{DispatchError, DispatchResult};
use crate::job::Job;
use crate::metrics::{JobMetrics, QueueMetrics, WorkerMetrics};
use crate::ring::EventRing;
use crate::worker::Worker;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// In-process job queue with backoff-and-reject submission.
///
/// # Examples
///
/// ```rust,no_run
/// use dispatchq::prelude::*;
/// use std::time::Duration;
///
/// # async fn example() -> DispatchResult<()> {
/// let queue = JobQueue::new(Config::default()).await?;
///
/// queue
///     .submit(Job::new("send_email", "user@example.com", || {
///         // job logic
///         Ok(())
///     }))
///     .await?;
///
/// queue.shutdown(Duration::from_secs(5)).await?;
/// # Ok(())
/// # }
/// ```
pub struct JobQueue {
    config: Config,
    ring: Arc<EventRing<Arc<Job>>>,
    jobs: RwLock<HashMap<String, Arc<Job>>>,
    workers: Arc<Vec<Arc<Worker>>>,
    queued: AtomicU64,
    shutting_down: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    /// Create a queue and start its dispatcher.
    pub async fn new(config: Config) -> DispatchResult<Self> {
        config
            .validate()
            .map_err(|errors| DispatchError::InvalidConfig { errors })?;

        let ring = Arc::new(EventRing::new(config.capacity));
        let workers: Arc<Vec<Arc<Worker>>> = Arc::new(
            (0..config.workers)
                .map(|_| Arc::new(Worker::new()))
                .collect(),
        );

        let dispatcher = tokio::spawn(Self::dispatch_loop(
            Arc::clone(&ring),
            Arc::clone(&workers),
        ));

        tracing::info!(
            capacity = config.capacity,
            workers = config.workers,
            "job queue started"
        );

        Ok(Self {
            config,
            ring,
            jobs: RwLock::new(HashMap::new()),
            workers,
            queued: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Submit a job for processing.
    ///
    /// While the buffer is full this backs off exponentially from
    /// `backoff_base`, doubling after each failed claim; after
    /// `max_retries` failed retries the job is rejected with
    /// [`DispatchError::SubmissionRejected`] and leaves no trace in
    /// metrics. Every failed claim also bumps the retried counter on all
    /// workers, as a queue-wide backpressure signal.
    pub async fn submit(&self, job: Job) -> DispatchResult<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(DispatchError::QueueClosed);
        }

        let job = Arc::new(job);
        let mut failed_claims = 0u32;
        let mut backoff = self.config.backoff_base;

        loop {
            // The index write lock spans claim, publish, and insert so a
            // metrics capture can never observe a published job that is
            // missing from the index.
            let claimed = {
                let mut jobs = self.jobs.write().await;
                match self.ring.try_claim() {
                    Ok(seq) => {
                        self.ring.publish(seq, Arc::clone(&job));
                        jobs.insert(job.key().to_string(), Arc::clone(&job));
                        self.queued.fetch_add(1, Ordering::Relaxed);
                        Some(seq)
                    }
                    Err(err) if err.is_capacity_exceeded() => None,
                    Err(err) => return Err(err),
                }
            };

            match claimed {
                Some(seq) => {
                    tracing::debug!(job_key = %job.key(), sequence = seq, "job accepted");
                    return Ok(());
                }
                None => {
                    failed_claims += 1;
                    // Queue-wide backpressure signal, bumped on every
                    // failed claim, the rejecting one included
                    for worker in self.workers.iter() {
                        worker.increment_retries();
                    }
                    if failed_claims > self.config.max_retries {
                        tracing::warn!(
                            job_key = %job.key(),
                            retries = self.config.max_retries,
                            "job rejected, buffer stayed full"
                        );
                        return Err(DispatchError::SubmissionRejected {
                            job_key: job.key().to_string(),
                            retries: self.config.max_retries,
                        });
                    }
                    tracing::debug!(
                        job_key = %job.key(),
                        retry = failed_claims,
                        backoff_ms = backoff.as_millis() as u64,
                        "buffer full, backing off"
                    );
                    sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    /// Stop accepting jobs and wait up to `grace` for the buffer to drain.
    ///
    /// Jobs already accepted are still processed. If the dispatcher does
    /// not finish within `grace` it is aborted and
    /// [`DispatchError::ShutdownTimeout`] is returned. Calling shutdown
    /// again is a no-op.
    pub async fn shutdown(&self, grace: Duration) -> DispatchResult<()> {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!(grace = ?grace, "job queue shutting down");
        self.ring.close();

        let handle = self.dispatcher.lock().await.take();
        let Some(mut handle) = handle else {
            return Ok(());
        };

        match timeout(grace, &mut handle).await {
            Ok(join_result) => {
                if let Err(err) = join_result {
                    tracing::error!(error = %err, "job dispatcher ended abnormally");
                } else {
                    tracing::info!("job queue drained");
                }
                Ok(())
            }
            Err(_) => {
                handle.abort();
                tracing::warn!(grace = ?grace, "job queue did not drain in time");
                Err(DispatchError::ShutdownTimeout { grace })
            }
        }
    }

    /// Whether the queue still accepts submissions.
    pub fn is_running(&self) -> bool {
        !self.shutting_down.load(Ordering::Acquire)
    }

    /// The queue's worker identities.
    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Capture a point-in-time view of every job accepted so far,
    /// ordered by submission time.
    pub async fn capture_job_metrics(&self) -> Vec<JobMetrics> {
        let jobs = self.jobs.read().await;
        let mut captures: Vec<JobMetrics> = jobs
            .values()
            .map(|job| JobMetrics::capture(job))
            .collect();
        captures.sort_by_key(|capture| capture.queued_at);
        captures
    }

    /// Capture a point-in-time view of every worker.
    pub fn capture_worker_metrics(&self) -> Vec<WorkerMetrics> {
        self.workers.iter().map(|worker| worker.metrics()).collect()
    }

    /// Capture queue-level counters.
    pub fn capture_queue_metrics(&self) -> QueueMetrics {
        let queued = self.queued.load(Ordering::Relaxed);
        let completed: u64 = self.workers.iter().map(|worker| worker.completed()).sum();
        let failed: u64 = self.workers.iter().map(|worker| worker.failed()).sum();

        QueueMetrics {
            active_workers: self.workers.len(),
            queued,
            in_flight: queued as i64 - completed as i64 - failed as i64,
        }
    }

    /// Single consumer: takes events in sequence order, runs each job on
    /// the worker picked by `sequence % workers`, and frees the slot only
    /// after processing so capacity covers in-flight work.
    async fn dispatch_loop(ring: Arc<EventRing<Arc<Job>>>, workers: Arc<Vec<Arc<Worker>>>) {
        while let Some((job, seq)) = ring.next().await {
            let worker = &workers[(seq % workers.len() as u64) as usize];
            if let Err(err) = worker.process(&job).await {
                // Already recorded on the job and the worker
                tracing::debug!(sequence = seq, error = %err, "dispatch absorbed job failure");
            }
            ring.release(seq);
        }
        tracing::debug!("job dispatcher drained");
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("config", &self.config)
            .field("workers", &self.workers.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        if !self.shutting_down.load(Ordering::Acquire) {
            tracing::warn!(
                "job queue dropped without shutdown; call shutdown() for a graceful drain"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use std::sync::atomic::AtomicU32;
    use tokio_test::assert_ok;

    fn test_config() -> Config {
        Config::new(1024, 2, 3, Duration::from_millis(100))
    }

    async fn wait_for_drain(queue: &JobQueue) {
        for _ in 0..200 {
            if queue.capture_queue_metrics().in_flight == 0 {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("queue did not drain in time");
    }

    #[tokio::test]
    async fn test_jobs_run_to_completion() {
        let queue = JobQueue::new(test_config()).await.unwrap();
        let executed = Arc::new(AtomicU32::new(0));

        for i in 0..2 {
            let executed = Arc::clone(&executed);
            queue
                .submit(Job::new("count", format!("job-{}", i), move || {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .await
                .unwrap();
        }

        wait_for_drain(&queue).await;
        assert_eq!(executed.load(Ordering::SeqCst), 2);

        let queue_metrics = queue.capture_queue_metrics();
        assert_eq!(queue_metrics.queued, 2);
        assert_eq!(queue_metrics.active_workers, 2);
        assert_eq!(queue_metrics.in_flight, 0);

        let captures = queue.capture_job_metrics().await;
        assert_eq!(captures.len(), 2);
        for capture in &captures {
            assert_eq!(capture.status, JobStatus::Completed);
            let started = capture.started_at.unwrap();
            let completed = capture.completed_at.unwrap();
            assert!(capture.queued_at <= started);
            assert!(started <= completed);
        }

        queue.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_round_robin_distribution() {
        let queue = JobQueue::new(test_config()).await.unwrap();

        for i in 0..4 {
            queue
                .submit(Job::new("noop", format!("{}", i), || Ok(())))
                .await
                .unwrap();
        }

        wait_for_drain(&queue).await;

        for worker in queue.workers() {
            assert_eq!(worker.completed(), 2);
        }

        queue.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_job_is_recorded_not_fatal() {
        let queue = JobQueue::new(test_config()).await.unwrap();

        queue
            .submit(Job::new("boom", "", || {
                Err(DispatchError::task_failure("deliberate"))
            }))
            .await
            .unwrap();
        queue
            .submit(Job::new("noop", "", || Ok(())))
            .await
            .unwrap();

        wait_for_drain(&queue).await;

        let captures = queue.capture_job_metrics().await;
        assert_eq!(captures.len(), 2);
        assert_eq!(captures[0].status, JobStatus::Failed);
        assert_eq!(captures[1].status, JobStatus::Completed);

        let failed: u64 = queue.workers().iter().map(|w| w.failed()).sum();
        assert_eq!(failed, 1);

        queue.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_submission_rejected_when_buffer_stays_full() {
        let config = Config::new(1, 2, 3, Duration::from_millis(50));
        let queue = JobQueue::new(config).await.unwrap();

        // Make the single slot stay occupied well past the total backoff
        // budget (50 + 100 + 200 ms)
        for worker in queue.workers() {
            worker.set_process_delay(Duration::from_millis(500));
        }

        queue
            .submit(Job::new("slow", "", || Ok(())))
            .await
            .unwrap();

        let err = queue
            .submit(Job::new("rejected", "", || Ok(())))
            .await
            .unwrap_err();
        match err {
            DispatchError::SubmissionRejected { retries, .. } => assert_eq!(retries, 3),
            other => panic!("unexpected error: {:?}", other),
        }

        // Four claims failed, each bumping the signal on every worker
        for worker in queue.workers() {
            assert_eq!(worker.retried(), 4);
        }

        // The rejected job left no trace
        assert_eq!(queue.capture_queue_metrics().queued, 1);
        let captures = queue.capture_job_metrics().await;
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].function, "slow");

        queue.shutdown(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_submission_succeeds_once_backoff_outlasts_occupancy() {
        let config = Config::new(1, 2, 3, Duration::from_millis(100));
        let queue = JobQueue::new(config).await.unwrap();

        // The slot frees after 250ms, well inside the 100 + 200 + 400 ms
        // backoff budget
        for worker in queue.workers() {
            worker.set_process_delay(Duration::from_millis(250));
        }

        queue
            .submit(Job::new("slow", "", || Ok(())))
            .await
            .unwrap();
        queue
            .submit(Job::new("patient", "", || Ok(())))
            .await
            .unwrap();

        assert!(queue.workers()[0].retried() >= 1);

        wait_for_drain(&queue).await;
        assert_eq!(queue.capture_queue_metrics().queued, 2);

        let captures = queue.capture_job_metrics().await;
        assert_eq!(captures.len(), 2);
        assert!(
            captures
                .iter()
                .all(|capture| capture.status == JobStatus::Completed)
        );

        queue.shutdown(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_halt_dispatch() {
        let queue = JobQueue::new(test_config()).await.unwrap();

        queue
            .submit(Job::new("explode", "", || panic!("boom")))
            .await
            .unwrap();
        queue
            .submit(Job::new("noop", "", || Ok(())))
            .await
            .unwrap();

        wait_for_drain(&queue).await;

        let captures = queue.capture_job_metrics().await;
        assert_eq!(captures.len(), 2);
        assert_eq!(captures[0].status, JobStatus::Failed);
        assert_eq!(captures[1].status, JobStatus::Completed);

        queue.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let queue = JobQueue::new(test_config()).await.unwrap();
        queue.shutdown(Duration::from_secs(1)).await.unwrap();

        let err = queue
            .submit(Job::new("late", "", || Ok(())))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::QueueClosed));
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_jobs() {
        let queue = JobQueue::new(test_config()).await.unwrap();
        let executed = Arc::new(AtomicU32::new(0));

        for _ in 0..8 {
            let executed = Arc::clone(&executed);
            queue
                .submit(Job::new("count", "", move || {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .await
                .unwrap();
        }

        queue.shutdown(Duration::from_secs(2)).await.unwrap();
        assert_eq!(executed.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_shutdown_timeout_is_surfaced() {
        let queue = JobQueue::new(test_config()).await.unwrap();
        for worker in queue.workers() {
            worker.set_process_delay(Duration::from_millis(300));
        }

        queue
            .submit(Job::new("slow", "", || Ok(())))
            .await
            .unwrap();

        let err = queue.shutdown(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, DispatchError::ShutdownTimeout { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let queue = JobQueue::new(test_config()).await.unwrap();
        assert_ok!(queue.shutdown(Duration::from_secs(1)).await);
        assert_ok!(queue.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_debug_reports_running_state() {
        let queue = JobQueue::new(test_config()).await.unwrap();
        let rendered = format!("{:?}", queue);
        assert!(rendered.contains("JobQueue"));
        assert!(rendered.contains("running: true"));
        queue.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = Config::new(0, 2, 3, Duration::from_millis(100));
        let err = JobQueue::new(config).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig { .. }));
    }
}
