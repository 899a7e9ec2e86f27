//! Configuration types for dispatchq.
//!
//! This module contains the settings for both queue front-ends: [`Config`]
//! for the job queue with its bounded submission retries, and
//! [`TaskQueueConfig`] for the async task queue with per-task timeout and
//! error-handler hooks.

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with errors that have no other propagation path.
pub type ErrorHandler = Arc<dyn Fn(&DispatchError) + Send + Sync>;

/// Configuration for [`JobQueue`](crate::queue::JobQueue).
///
/// Immutable once the queue is built; share it by cloning.
///
/// # Examples
///
/// ```rust
/// use dispatchq::config::Config;
/// use std::time::Duration;
///
/// // Use default configuration
/// let config = Config::default();
///
/// // Custom configuration
/// let config = Config::new(2048, 4, 5, Duration::from_millis(50));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of slots in the event buffer
    pub capacity: usize,

    /// Number of workers jobs are distributed across
    pub workers: usize,

    /// Capacity retries allowed before a submission is rejected
    pub max_retries: u32,

    /// Initial backoff between claim attempts (doubles each retry)
    pub backoff_base: Duration,
}

impl Config {
    /// Create a configuration with every setting explicit.
    pub fn new(capacity: usize, workers: usize, max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            capacity,
            workers,
            max_retries,
            backoff_base,
        }
    }

    /// Set the buffer capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the submission retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial submission backoff.
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.capacity == 0 {
            errors.push("Buffer capacity must be greater than 0".to_string());
        }

        if self.workers == 0 {
            errors.push("Number of workers must be greater than 0".to_string());
        }

        if self.max_retries > 0 && self.backoff_base.is_zero() {
            errors.push("Backoff base must be greater than 0 when retries are enabled".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: num_cpus::get().max(1),
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
        }
    }
}

/// Configuration for [`AsyncTaskQueue`](crate::queue::AsyncTaskQueue).
///
/// Built through [`TaskQueueConfig::builder`]; every setting has a default
/// so `TaskQueueConfig::default()` is a working configuration.
#[derive(Clone)]
pub struct TaskQueueConfig {
    /// Additional execution attempts after a failed first run
    pub max_retries: u32,

    /// Emit per-event trace logs
    pub logging_enabled: bool,

    /// Invoked with the final error once a task's retries are exhausted
    pub error_handler: ErrorHandler,

    /// Deadline applied to each execution attempt (None = unbounded)
    pub task_timeout: Option<Duration>,

    /// Number of slots in the event buffer
    pub capacity: usize,
}

impl TaskQueueConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> TaskQueueConfigBuilder {
        TaskQueueConfigBuilder {
            config: Self::default(),
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.capacity == 0 {
            errors.push("Buffer capacity must be greater than 0".to_string());
        }

        if let Some(timeout) = self.task_timeout {
            if timeout.is_zero() {
                errors.push("Task timeout must be greater than 0 when set".to_string());
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            logging_enabled: false,
            error_handler: Arc::new(|_| {}),
            task_timeout: None,
            capacity: 1024,
        }
    }
}

impl std::fmt::Debug for TaskQueueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueueConfig")
            .field("max_retries", &self.max_retries)
            .field("logging_enabled", &self.logging_enabled)
            .field("task_timeout", &self.task_timeout)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TaskQueueConfig`].
pub struct TaskQueueConfigBuilder {
    config: TaskQueueConfig,
}

impl TaskQueueConfigBuilder {
    /// Set the retry budget applied after a failed first attempt.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Enable or disable per-event trace logging.
    pub fn logging_enabled(mut self, enabled: bool) -> Self {
        self.config.logging_enabled = enabled;
        self
    }

    /// Install the error handler invoked when a task exhausts its retries.
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&DispatchError) + Send + Sync + 'static,
    {
        self.config.error_handler = Arc::new(handler);
        self
    }

    /// Set the per-attempt execution deadline.
    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.config.task_timeout = Some(timeout);
        self
    }

    /// Set the buffer capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Finish building the configuration.
    pub fn build(self) -> TaskQueueConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.capacity, 1024);
        assert!(config.workers > 0);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base, Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = Config::default()
            .with_capacity(64)
            .with_workers(2)
            .with_max_retries(5)
            .with_backoff_base(Duration::from_millis(10));

        assert_eq!(config.capacity, 64);
        assert_eq!(config.workers, 2);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff_base, Duration::from_millis(10));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.capacity = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("capacity")));

        config.capacity = 16;
        config.workers = 0;
        assert!(config.validate().is_err());

        config.workers = 1;
        config.backoff_base = Duration::ZERO;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("Backoff")));

        // Zero backoff is fine when retries are disabled
        config.max_retries = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_task_queue_config_defaults() {
        let config = TaskQueueConfig::default();
        assert_eq!(config.max_retries, 3);
        assert!(!config.logging_enabled);
        assert!(config.task_timeout.is_none());
        assert_eq!(config.capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_task_queue_config_builder() {
        let config = TaskQueueConfig::builder()
            .max_retries(1)
            .logging_enabled(true)
            .task_timeout(Duration::from_secs(2))
            .capacity(32)
            .error_handler(|_err| {})
            .build();

        assert_eq!(config.max_retries, 1);
        assert!(config.logging_enabled);
        assert_eq!(config.task_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.capacity, 32);
    }

    #[test]
    fn test_task_queue_config_validation() {
        let config = TaskQueueConfig::builder().capacity(0).build();
        assert!(config.validate().is_err());

        let config = TaskQueueConfig::builder()
            .task_timeout(Duration::ZERO)
            .build();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("timeout")));
    }

    #[test]
    fn test_debug_skips_handler() {
        let config = TaskQueueConfig::default();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("max_retries"));
        assert!(!rendered.contains("error_handler"));
    }
}
