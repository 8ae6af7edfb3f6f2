//! Configuration types for tasklib.
//!
//! A [`TasklibConfig`] is built once at process start (by hand, from a preset,
//! or deserialized from whatever format the host application uses) and then
//! shared read-only with the tracker, the registry facade and the workers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for tasklib.
///
/// # Examples
///
/// ```rust
/// use tasklib::config::{TasklibConfig, WorkerConfig};
///
/// // Use default configuration
/// let config = TasklibConfig::default();
///
/// // Custom configuration
/// let config = TasklibConfig {
///     workers: WorkerConfig::with_workers(8).with_poll_timeout(5),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasklibConfig {
    /// Backing store endpoint
    pub store: StoreConfig,

    /// Queue and status record settings
    pub queue: QueueConfig,

    /// Worker-related configuration
    pub workers: WorkerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Backing store endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store host name
    pub host: String,

    /// Store port
    pub port: u16,

    /// Optional password
    pub password: Option<String>,

    /// Database (namespace) number
    pub db: i64,

    /// How long to wait for the initial connection (in seconds)
    pub connect_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            connect_timeout_secs: 10,
        }
    }
}

impl StoreConfig {
    /// Connection URL assembled from the structured fields.
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Initial connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Queue and status record configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Key of the pending-work list
    pub queue_name: String,

    /// Prefix of the per-task status keys (`<prefix>:<task_id>`)
    pub status_prefix: String,

    /// Lifetime of a status record after its last mutation (in seconds)
    pub result_expiry_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: "work_queue".to_string(),
            status_prefix: "task_result".to_string(),
            result_expiry_secs: 3600,
        }
    }
}

impl QueueConfig {
    /// Status record time-to-live
    pub fn result_expiry(&self) -> Duration {
        Duration::from_secs(self.result_expiry_secs)
    }

    /// Set the queue key.
    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    /// Set the status key prefix.
    pub fn with_status_prefix(mut self, status_prefix: impl Into<String>) -> Self {
        self.status_prefix = status_prefix.into();
        self
    }

    /// Set the status record time-to-live.
    pub fn with_result_expiry(mut self, expiry_secs: u64) -> Self {
        self.result_expiry_secs = expiry_secs;
        self
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent worker units
    pub num_workers: usize,

    /// Use the store's blocking pop instead of polling
    pub blocking_pop: bool,

    /// How long a blocking pop waits before re-checking for shutdown (in seconds)
    pub poll_timeout_secs: u64,

    /// Upper bound of the idle sleep between empty polls (in milliseconds)
    pub idle_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get().max(1),
            blocking_pop: true,
            poll_timeout_secs: 10,
            idle_timeout_ms: 1000,
        }
    }
}

impl WorkerConfig {
    /// Create a new worker configuration with a specific number of workers.
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Set the blocking pop timeout.
    pub fn with_poll_timeout(mut self, timeout_secs: u64) -> Self {
        self.poll_timeout_secs = timeout_secs;
        self
    }

    /// Poll with non-blocking pops and an idle sleep instead.
    pub fn polling(mut self, idle_timeout_ms: u64) -> Self {
        self.blocking_pop = false;
        self.idle_timeout_ms = idle_timeout_ms;
        self
    }

    /// Blocking pop timeout
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: LogLevel,

    /// Enable colored output
    pub colored: bool,

    /// Include timestamps in logs
    pub include_timestamps: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            colored: true,
            include_timestamps: true,
            include_targets: false,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl TasklibConfig {
    /// Create a new configuration optimized for development.
    pub fn development() -> Self {
        Self {
            workers: WorkerConfig {
                num_workers: 2,
                poll_timeout_secs: 2,
                ..Default::default()
            },
            queue: QueueConfig {
                result_expiry_secs: 600,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                include_targets: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a new configuration optimized for production.
    pub fn production() -> Self {
        Self {
            workers: WorkerConfig {
                num_workers: num_cpus::get() * 2,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: LogLevel::Info,
                colored: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a configuration for testing.
    pub fn testing() -> Self {
        Self {
            workers: WorkerConfig {
                num_workers: 1,
                blocking_pop: true,
                poll_timeout_secs: 1,
                idle_timeout_ms: 50,
            },
            queue: QueueConfig {
                queue_name: "test_queue".to_string(),
                status_prefix: "test_result".to_string(),
                result_expiry_secs: 60,
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: false,
                include_timestamps: false,
                include_targets: true,
            },
            ..Default::default()
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.workers.num_workers == 0 {
            errors.push("Number of workers must be greater than 0".to_string());
        }

        if self.workers.num_workers > 1000 {
            errors.push("Number of workers should not exceed 1000".to_string());
        }

        if self.workers.blocking_pop && self.workers.poll_timeout_secs == 0 {
            errors.push("Blocking poll timeout must be greater than 0".to_string());
        }

        if !self.workers.blocking_pop && self.workers.idle_timeout_ms == 0 {
            errors.push("Idle timeout must be greater than 0".to_string());
        }

        if self.queue.queue_name.is_empty() {
            errors.push("Queue name must not be empty".to_string());
        }

        if self.queue.status_prefix.is_empty() {
            errors.push("Status prefix must not be empty".to_string());
        }

        if self.queue.queue_name.starts_with(&format!("{}:", self.queue.status_prefix)) {
            errors.push("Queue name must not live under the status prefix".to_string());
        }

        if self.queue.result_expiry_secs == 0 {
            errors.push("Result expiry must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
