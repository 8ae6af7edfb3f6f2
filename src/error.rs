//! Error types for tasklib operations.

use crate::task::Fault;
use thiserror::Error;

/// Result type used throughout tasklib.
pub type TasklibResult<T> = Result<T, TasklibError>;

/// Main error type for tasklib operations.
#[derive(Error, Debug)]
pub enum TasklibError {
    /// A function name could not be resolved in the registry
    #[error("Task '{name}' not found in registry")]
    UnknownTask {
        /// The name that wasn't found
        name: String,
    },

    /// A status value outside the fixed enumeration
    #[error("Invalid task status '{value}'")]
    InvalidStatus {
        /// The rejected value
        value: String,
    },

    /// The status record is absent, expired or undecodable
    #[error("Task {task_id} not found")]
    TaskNotFound {
        /// The task id that was looked up
        task_id: String,
    },

    /// A task body raised a fault during a direct call
    #[error("Task execution failed: {0}")]
    ExecutionFault(Fault),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Store backend error
    #[error("Store error: {message}")]
    StoreError {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out
    #[error("Operation timed out after {timeout_ms} ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message
        message: String,
    },

    /// The worker engine is already running
    #[error("Worker engine is already running")]
    AlreadyRunning,

    /// The worker engine is not running
    #[error("Worker engine is not running")]
    NotRunning,

    /// Redis connection error
    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl TasklibError {
    /// Create a new store error
    pub fn store<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::StoreError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a task-not-found error
    pub fn not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }
}
