//! Queue front-ends for dispatchq.
//!
//! Two submission policies share the same event buffer machinery:
//! - [`JobQueue`]: a full buffer makes `submit` retry with exponential
//!   backoff and reject once its budget is spent. Results are observed
//!   through metrics captures.
//! - [`AsyncTaskQueue`]: a full buffer makes `submit` wait for space; every
//!   submission returns a [`TaskHandle`](crate::task::TaskHandle)
//!   immediately, and failed tasks are retried at execution time.

pub mod jobs;
pub mod tasks;

pub use jobs::JobQueue;
pub use tasks::AsyncTaskQueue;
