//! Task execution plumbing for the async task queue.
//!
//! A submitted action is erased into a [`TaskWrapper`] the dispatcher can
//! re-run on retry, plus a [`TaskHandle`] the submitter keeps. The handle
//! is single-assignment: the first attempt to finish (complete, fail, or
//! time out) decides the [`TaskOutcome`], later attempts cannot overwrite
//! it.

use crate::error::{DispatchError, DispatchResult};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

type TaskAction = Box<dyn FnMut() -> BoxFuture<'static, DispatchResult<()>> + Send>;

/// Final result of a submitted task.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// The task produced a value
    Completed(T),
    /// The task failed and its retries could not change that
    Failed(DispatchError),
    /// An attempt ran past the configured deadline
    TimedOut {
        /// The deadline that was exceeded
        limit: Duration,
    },
}

impl<T> TaskOutcome<T> {
    /// Whether the task produced a value.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Whether the task failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether the task hit its deadline.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Convert into a plain `Result`, mapping a timeout to
    /// [`DispatchError::TaskTimeout`].
    pub fn into_result(self) -> DispatchResult<T> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Failed(err) => Err(err),
            Self::TimedOut { limit } => Err(DispatchError::TaskTimeout { limit }),
        }
    }
}

/// Awaitable handle to a submitted task's outcome.
///
/// Resolves as soon as any attempt settles the task. If the queue is torn
/// down before the task ran, the handle yields
/// `Failed(DispatchError::QueueClosed)`.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<TaskOutcome<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task's outcome. Equivalent to awaiting the handle.
    pub async fn outcome(self) -> TaskOutcome<T> {
        self.await
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskOutcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(TaskOutcome::Failed(DispatchError::QueueClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}

/// Single-assignment completion cell feeding a [`TaskHandle`].
pub(crate) struct Completion<T> {
    tx: Mutex<Option<oneshot::Sender<TaskOutcome<T>>>>,
}

impl<T> Completion<T> {
    pub(crate) fn channel() -> (Arc<Self>, TaskHandle<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            TaskHandle { rx },
        )
    }

    /// Resolve the handle. Returns whether this call won the assignment;
    /// a dropped handle still counts as resolved.
    pub(crate) fn resolve(&self, outcome: TaskOutcome<T>) -> bool {
        let sender = {
            let mut guard = match self.tx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Type-erased view of a [`Completion`] for the failure paths the wrapper
/// drives itself. Success carries the typed value, so it is resolved inside
/// the erased action instead.
trait FailureSink: Send + Sync {
    fn resolve_failed(&self, error: DispatchError) -> bool;
    fn resolve_timed_out(&self, limit: Duration) -> bool;
}

impl<T: Send + 'static> FailureSink for Completion<T> {
    fn resolve_failed(&self, error: DispatchError) -> bool {
        self.resolve(TaskOutcome::Failed(error))
    }

    fn resolve_timed_out(&self, limit: Duration) -> bool {
        self.resolve(TaskOutcome::TimedOut { limit })
    }
}

/// The handle keeps a best-effort copy while the original error stays with
/// the dispatcher for retry accounting and the error handler.
fn outcome_copy(err: &DispatchError) -> DispatchError {
    match err {
        DispatchError::TaskFailed { message, .. } => DispatchError::task_failure(message.clone()),
        DispatchError::TaskTimeout { limit } => DispatchError::TaskTimeout { limit: *limit },
        DispatchError::QueueClosed => DispatchError::QueueClosed,
        other => DispatchError::task_failure(other.to_string()),
    }
}

/// Aborts the guarded attempt when dropped, so teardown reaches the
/// spawned future even when the dispatcher itself is cancelled mid-await.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A submitted task in dispatcher-executable form.
///
/// The wrapped action can be invoked again after a failure; every
/// invocation builds a fresh future.
pub(crate) struct TaskWrapper {
    action: TaskAction,
    sink: Arc<dyn FailureSink>,
    timeout: Option<Duration>,
}

impl TaskWrapper {
    /// Erase an action into a wrapper plus the handle for its outcome.
    pub(crate) fn new<T, F, Fut>(mut action: F, timeout: Option<Duration>) -> (Self, TaskHandle<T>)
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = DispatchResult<T>> + Send + 'static,
    {
        let (completion, handle) = Completion::channel();

        let action_completion = Arc::clone(&completion);
        let erased: TaskAction = Box::new(move || {
            let completion = Arc::clone(&action_completion);
            let fut = action();
            async move {
                match fut.await {
                    Ok(value) => {
                        completion.resolve(TaskOutcome::Completed(value));
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            .boxed()
        });

        let wrapper = Self {
            action: erased,
            sink: completion,
            timeout,
        };
        (wrapper, handle)
    }

    /// Run one attempt, applying the configured deadline.
    ///
    /// A deadline-bounded attempt runs in its own spawned task which is
    /// aborted when the deadline fires, and abort-on-drop if the caller is
    /// cancelled mid-await, so the attempt's execution context is torn
    /// down on every exit. Panics in the action are caught and reported
    /// as task failures. A settled failure or timeout also resolves the
    /// handle, subject to first-assignment-wins.
    pub(crate) async fn execute(&mut self) -> DispatchResult<()> {
        let result = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.action)())) {
            Err(panic) => Err(DispatchError::task_panic(panic)),
            Ok(fut) => match self.timeout {
                None => AssertUnwindSafe(fut)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(DispatchError::task_panic(panic))),
                Some(limit) => {
                    let mut attempt = tokio::spawn(fut);
                    let _teardown = AbortOnDrop(attempt.abort_handle());
                    match tokio::time::timeout(limit, &mut attempt).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(join_err)) => {
                            Err(DispatchError::task_failure_with("task panicked", join_err))
                        }
                        Err(_) => Err(DispatchError::TaskTimeout { limit }),
                    }
                }
            },
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                match &err {
                    DispatchError::TaskTimeout { limit } => {
                        self.sink.resolve_timed_out(*limit);
                    }
                    other => {
                        self.sink.resolve_failed(outcome_copy(other));
                    }
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let (completion, handle) = Completion::channel();

        assert!(completion.resolve(TaskOutcome::Completed(1)));
        assert!(!completion.resolve(TaskOutcome::Completed(2)));

        match handle.await {
            TaskOutcome::Completed(value) => assert_eq!(value, 1),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_completion_reads_as_closed() {
        let (completion, handle) = Completion::<u32>::channel();
        drop(completion);

        match handle.await {
            TaskOutcome::Failed(DispatchError::QueueClosed) => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_resolves_value() {
        let (mut wrapper, handle) = TaskWrapper::new(|| async { Ok(42u32) }, None);

        wrapper.execute().await.unwrap();

        match handle.await {
            TaskOutcome::Completed(value) => assert_eq!(value, 42),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_resolves_failure() {
        let (mut wrapper, handle) = TaskWrapper::new(
            || async { Err::<(), _>(DispatchError::task_failure("nope")) },
            None,
        );

        let err = wrapper.execute().await.unwrap_err();
        assert!(matches!(err, DispatchError::TaskFailed { .. }));

        match handle.await {
            TaskOutcome::Failed(DispatchError::TaskFailed { message, .. }) => {
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_cannot_overwrite_first_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_action = Arc::clone(&calls);

        let (mut wrapper, handle) = TaskWrapper::new(
            move || {
                let calls = Arc::clone(&calls_in_action);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(DispatchError::task_failure("first attempt"))
                    } else {
                        Ok(7u32)
                    }
                }
            },
            None,
        );

        assert!(wrapper.execute().await.is_err());
        assert!(wrapper.execute().await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The failing first attempt settled the handle
        match handle.await {
            TaskOutcome::Failed(DispatchError::TaskFailed { message, .. }) => {
                assert_eq!(message, "first attempt");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_action_reports_failure() {
        let (mut wrapper, handle) =
            TaskWrapper::new::<(), _, _>(|| async { panic!("boom") }, None);

        let err = wrapper.execute().await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        match handle.await {
            TaskOutcome::Failed(DispatchError::TaskFailed { message, .. }) => {
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_execute_tears_down_the_attempt() {
        let progressed = Arc::new(AtomicU32::new(0));
        let progressed_in_action = Arc::clone(&progressed);

        let (mut wrapper, _handle) = TaskWrapper::new(
            move || {
                let progressed = Arc::clone(&progressed_in_action);
                async move {
                    sleep(Duration::from_millis(100)).await;
                    progressed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            Some(Duration::from_secs(10)),
        );

        let driver = tokio::spawn(async move {
            let _ = wrapper.execute().await;
        });
        sleep(Duration::from_millis(20)).await;
        driver.abort();
        let _ = driver.await;

        // The attempt lost its driver and must not keep running detached
        sleep(Duration::from_millis(250)).await;
        assert_eq!(progressed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handle_debug_is_opaque() {
        struct Opaque;
        let (_completion, handle) = Completion::<Opaque>::channel();
        assert!(format!("{:?}", handle).contains("TaskHandle"));
    }

    #[tokio::test]
    async fn test_timeout_resolves_timed_out_and_aborts() {
        let progressed = Arc::new(AtomicU32::new(0));
        let progressed_in_action = Arc::clone(&progressed);

        let (mut wrapper, handle) = TaskWrapper::new(
            move || {
                let progressed = Arc::clone(&progressed_in_action);
                async move {
                    sleep(Duration::from_millis(200)).await;
                    progressed.fetch_add(1, Ordering::SeqCst);
                    Ok(1u32)
                }
            },
            Some(Duration::from_millis(30)),
        );

        let err = wrapper.execute().await.unwrap_err();
        assert!(err.is_timeout());

        match handle.await {
            TaskOutcome::TimedOut { limit } => assert_eq!(limit, Duration::from_millis(30)),
            other => panic!("unexpected outcome: {:?}", other),
        }

        // The aborted attempt never ran past its sleep
        sleep(Duration::from_millis(250)).await;
        assert_eq!(progressed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_outcome_into_result() {
        assert_eq!(TaskOutcome::Completed(5).into_result().unwrap(), 5);

        let failed: TaskOutcome<u32> = TaskOutcome::Failed(DispatchError::task_failure("x"));
        assert!(failed.into_result().is_err());

        let timed_out: TaskOutcome<u32> = TaskOutcome::TimedOut {
            limit: Duration::from_secs(1),
        };
        match timed_out.into_result().unwrap_err() {
            DispatchError::TaskTimeout { limit } => assert_eq!(limit, Duration::from_secs(1)),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
