//! Async task queue with blocking submission and consumer-side retries.
//!
//! [`AsyncTaskQueue`] accepts async actions into a fixed-capacity event
//! buffer. Submission never rejects for capacity; when the buffer is full
//! the caller suspends until the dispatcher frees a slot. Each accepted
//! task yields a [`TaskHandle`] that resolves with the task's first
//! outcome. Failed attempts are retried immediately by the dispatcher, and
//! tasks that exhaust their retries are reported through the configured
//! error handler.

use crate::config::{ErrorHandler, TaskQueueConfig};
use crate::error::{DispatchError, DispatchResult};
use crate::metrics::{TaskMetrics, TaskQueueMetrics};
use crate::ring::EventRing;
use crate::task::{TaskHandle, TaskWrapper};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};

/// In-process task queue with suspend-on-full submission.
///
/// # Examples
///
/// ```rust,no_run
/// use dispatchq::prelude::*;
/// use std::time::Duration;
///
/// # async fn example() -> DispatchResult<()> {
/// let queue = AsyncTaskQueue::new(TaskQueueConfig::default()).await?;
///
/// let handle = queue
///     .submit_with_result(|| async {
///         // task logic
///         Ok(21 * 2)
///     })
///     .await?;
///
/// assert_eq!(handle.outcome().await.into_result()?, 42);
/// queue.shutdown(Duration::from_secs(5)).await?;
/// # Ok(())
/// # }
/// ```
pub struct AsyncTaskQueue {
    config: TaskQueueConfig,
    ring: Arc<EventRing<TaskWrapper>>,
    metrics: Arc<TaskQueueMetrics>,
    shutting_down: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncTaskQueue {
    /// Create a queue and start its dispatcher.
    pub async fn new(config: TaskQueueConfig) -> DispatchResult<Self> {
        config
            .validate()
            .map_err(|errors| DispatchError::InvalidConfig { errors })?;

        let ring = Arc::new(EventRing::new(config.capacity));
        let metrics = Arc::new(TaskQueueMetrics::new(config.logging_enabled));

        let dispatcher = tokio::spawn(Self::dispatch_loop(
            Arc::clone(&ring),
            Arc::clone(&metrics),
            config.max_retries,
            Arc::clone(&config.error_handler),
        ));

        tracing::info!(
            capacity = config.capacity,
            max_retries = config.max_retries,
            timeout = ?config.task_timeout,
            "task queue started"
        );

        Ok(Self {
            config,
            ring,
            metrics,
            shutting_down: AtomicBool::new(false),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Submit a fire-and-forget task.
    ///
    /// Equivalent to [`submit_with_result`](Self::submit_with_result) with
    /// a unit value; the returned handle may be dropped freely.
    pub async fn submit<F, Fut>(&self, action: F) -> DispatchResult<TaskHandle<()>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = DispatchResult<()>> + Send + 'static,
    {
        self.submit_with_result(action).await
    }

    /// Submit a task and obtain a handle to its first outcome.
    ///
    /// The action is a factory: the dispatcher calls it once per attempt,
    /// so retries run a fresh future each time. If the buffer is full this
    /// suspends until a slot frees up; it never rejects for capacity. The
    /// only submission error is [`DispatchError::QueueClosed`] once
    /// shutdown has begun.
    pub async fn submit_with_result<T, F, Fut>(&self, action: F) -> DispatchResult<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = DispatchResult<T>> + Send + 'static,
    {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(DispatchError::QueueClosed);
        }

        self.metrics.record_submitted();
        let (wrapper, handle) = TaskWrapper::new(action, self.config.task_timeout);

        let seq = self.ring.claim_blocking().await?;
        self.ring.publish(seq, wrapper);

        Ok(handle)
    }

    /// Stop accepting tasks and wait up to `grace` for the buffer to drain.
    ///
    /// Tasks already accepted are still processed, including their
    /// retries. If the dispatcher does not finish within `grace` it is
    /// aborted and [`DispatchError::ShutdownTimeout`] is returned. Calling
    /// shutdown again is a no-op.
    pub async fn shutdown(&self, grace: Duration) -> DispatchResult<()> {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!(grace = ?grace, "task queue shutting down");
        self.ring.close();

        let handle = self.dispatcher.lock().await.take();
        let Some(mut handle) = handle else {
            return Ok(());
        };

        match timeout(grace, &mut handle).await {
            Ok(join_result) => {
                if let Err(err) = join_result {
                    tracing::error!(error = %err, "task dispatcher ended abnormally");
                } else {
                    tracing::info!("task queue drained");
                }
                Ok(())
            }
            Err(_) => {
                handle.abort();
                tracing::warn!(grace = ?grace, "task queue did not drain in time");
                Err(DispatchError::ShutdownTimeout { grace })
            }
        }
    }

    /// Whether the queue still accepts submissions.
    pub fn is_running(&self) -> bool {
        !self.shutting_down.load(Ordering::Acquire)
    }

    /// Live counters for this queue.
    pub fn metrics(&self) -> &TaskQueueMetrics {
        &self.metrics
    }

    /// Capture a point-in-time view of the counters.
    pub fn snapshot(&self) -> TaskMetrics {
        self.metrics.snapshot()
    }

    /// Single consumer: takes wrappers in sequence order, runs each with
    /// its retry budget, and frees the slot only afterwards so capacity
    /// covers in-flight work.
    async fn dispatch_loop(
        ring: Arc<EventRing<TaskWrapper>>,
        metrics: Arc<TaskQueueMetrics>,
        max_retries: u32,
        error_handler: ErrorHandler,
    ) {
        while let Some((mut wrapper, seq)) = ring.next().await {
            Self::process_with_retries(&mut wrapper, &metrics, max_retries, &error_handler).await;
            ring.release(seq);
        }
        tracing::debug!("task dispatcher drained");
    }

    /// Run one task event to a terminal outcome.
    ///
    /// Failed attempts, timeouts included, retry immediately up to
    /// `max_retries` beyond the first attempt; every attempt runs under a
    /// fresh deadline. The handle was resolved by the first failing
    /// attempt; the error handler is the only place the terminal error
    /// still reaches.
    async fn process_with_retries(
        wrapper: &mut TaskWrapper,
        metrics: &TaskQueueMetrics,
        max_retries: u32,
        error_handler: &ErrorHandler,
    ) {
        let started = Instant::now();
        let mut attempts = 0u32;

        let terminal = loop {
            attempts += 1;
            match wrapper.execute().await {
                Ok(()) => {
                    metrics.record_completed(started.elapsed());
                    return;
                }
                Err(err) => {
                    if attempts > max_retries {
                        break DispatchError::RetryExhausted {
                            attempts,
                            source: Box::new(err),
                        };
                    }
                    tracing::debug!(attempt = attempts, error = %err, "task attempt failed, retrying");
                }
            }
        };

        metrics.record_failed();
        tracing::error!(attempts, error = %terminal, "task gave up");
        error_handler(&terminal);
    }
}

impl fmt::Debug for AsyncTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTaskQueue")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for AsyncTaskQueue {
    fn drop(&mut self) {
        if !self.shutting_down.load(Ordering::Acquire) {
            tracing::warn!(
                "task queue dropped without shutdown; call shutdown() for a graceful drain"
            );
        }
    }
}
