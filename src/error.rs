//! Error types for dispatchq operations.

use std::time::Duration;
use thiserror::Error;

/// Result type used throughout dispatchq.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Main error type for dispatchq operations.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The event buffer has no free slot for a new claim
    #[error("event buffer at capacity ({capacity} slots)")]
    CapacityExceeded {
        /// Configured buffer capacity
        capacity: usize,
    },

    /// Submission gave up after exhausting its capacity-retry budget
    #[error("submission of job '{job_key}' rejected after {retries} capacity retries")]
    SubmissionRejected {
        /// Key of the job that was turned away
        job_key: String,
        /// Capacity retries performed before giving up
        retries: u32,
    },

    /// A job's work returned an error while a worker was processing it
    #[error("job '{job_key}' failed during processing")]
    JobProcessingFailure {
        /// Key of the failed job
        job_key: String,
        /// Underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Task execution failed
    #[error("task failed: {message}")]
    TaskFailed {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Task ran past its configured deadline
    #[error("task timed out after {limit:?}")]
    TaskTimeout {
        /// The deadline that was exceeded
        limit: Duration,
    },

    /// Every attempt of a task failed
    #[error("task failed after {attempts} attempts")]
    RetryExhausted {
        /// Total attempts made (first run plus retries)
        attempts: u32,
        /// Error from the final attempt
        #[source]
        source: Box<DispatchError>,
    },

    /// Queue did not drain within the shutdown grace period
    #[error("shutdown timed out after {grace:?}")]
    ShutdownTimeout {
        /// The grace period that elapsed
        grace: Duration,
    },

    /// Queue is shut down and no longer accepts work
    #[error("queue is closed")]
    QueueClosed,

    /// Configuration error
    #[error("invalid configuration: {}", .errors.join("; "))]
    InvalidConfig {
        /// Individual validation failures
        errors: Vec<String>,
    },
}

impl DispatchError {
    /// Create a task failure from a message alone.
    pub fn task_failure(message: impl Into<String>) -> Self {
        Self::TaskFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a task failure wrapping an underlying error.
    pub fn task_failure_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TaskFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a task failure from a caught panic, keeping the panic
    /// message when the payload carries one.
    pub(crate) fn task_panic(panic: Box<dyn std::any::Any + Send>) -> Self {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned());
        match message {
            Some(message) => Self::task_failure(format!("task panicked: {message}")),
            None => Self::task_failure("task panicked"),
        }
    }

    /// Create a job processing failure wrapping an underlying error.
    pub fn job_failure<E>(job_key: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::JobProcessingFailure {
            job_key: job_key.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error is the transient buffer-full condition.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// Whether this error is a task deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TaskTimeout { .. })
    }
}
