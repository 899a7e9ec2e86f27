//! # dispatchq
//!
//! An in-process, high-throughput task dispatch engine for tokio
//! applications.
//!
//! ## Features
//!
//! - **Two submission policies**: [`JobQueue`](queue::JobQueue) backs off
//!   and rejects when the buffer stays full;
//!   [`AsyncTaskQueue`](queue::AsyncTaskQueue) suspends the submitter until
//!   a slot frees up
//! - **Strict ordering**: a fixed-capacity event buffer dispatches strictly
//!   in submission order
//! - **Result handles**: await a task's typed outcome without blocking the
//!   queue
//! - **Retries and timeouts**: submit-side backoff budgets, consumer-side
//!   immediate retries, per-task deadlines
//! - **Graceful shutdown**: drain within a grace period, abort on overrun
//! - **Observability**: structured logging via `tracing`, serializable
//!   metrics snapshots
//!
//! ## Quick Start
//!
//! Fire-and-forget jobs with bounded-retry submission:
//!
//! ```rust
//! use dispatchq::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> DispatchResult<()> {
//!     let queue = JobQueue::new(Config::default()).await?;
//!
//!     queue
//!         .submit(Job::new("send_email", "user@example.com", || {
//!             // job logic
//!             Ok(())
//!         }))
//!         .await?;
//!
//!     queue.shutdown(Duration::from_secs(5)).await
//! }
//! ```
//!
//! Async tasks with awaitable outcomes:
//!
//! ```rust
//! use dispatchq::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> DispatchResult<()> {
//!     let queue = AsyncTaskQueue::new(TaskQueueConfig::default()).await?;
//!
//!     let handle = queue
//!         .submit_with_result(|| async { Ok(6 * 7) })
//!         .await?;
//!
//!     assert_eq!(handle.outcome().await.into_result()?, 42);
//!
//!     queue.shutdown(Duration::from_secs(5)).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod ring;
pub mod task;
pub mod worker;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{DispatchError, DispatchResult};
    pub use crate::job::{Job, JobStatus};
    pub use crate::metrics::{
        JobMetrics, QueueMetrics, TaskMetrics, TaskQueueMetrics, WorkerMetrics,
    };
    pub use crate::queue::{AsyncTaskQueue, JobQueue};
    pub use crate::task::{TaskHandle, TaskOutcome};
    pub use crate::worker::Worker;
}

pub use crate::config::*;
pub use crate::error::{DispatchError, DispatchResult};
pub use crate::job::{Job, JobStatus};
pub use crate::metrics::{JobMetrics, QueueMetrics, TaskMetrics, TaskQueueMetrics, WorkerMetrics};
pub use crate::queue::{AsyncTaskQueue, JobQueue};
pub use crate::task::{TaskHandle, TaskOutcome};
pub use crate::worker::Worker;
