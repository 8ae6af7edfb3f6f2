//! Task data model: status enumeration, envelopes, status records and faults.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::TasklibError;

/// Unique identifier for a task
pub type TaskId = String;

/// Positional arguments of an invocation
pub type Args = Vec<Value>;

/// Keyword arguments of an invocation
pub type Kwargs = Map<String, Value>;

/// Lifecycle status of a task.
///
/// The engine drives `Init -> Running -> {Success, Error}`. `Enqueued` and `Failed`
/// are part of the stored enumeration but never written by the worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Scheduled, waiting in the queue
    Init,
    /// Accepted by the queue
    Enqueued,
    /// Picked up by a worker
    Running,
    /// Finished with a result
    Success,
    /// Finished unsuccessfully
    Failed,
    /// The task body raised a fault
    Error,
}

impl TaskStatus {
    /// All valid statuses, in lifecycle order
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Init,
        TaskStatus::Enqueued,
        TaskStatus::Running,
        TaskStatus::Success,
        TaskStatus::Failed,
        TaskStatus::Error,
    ];

    /// Wire tag of this status
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Init => "INIT",
            TaskStatus::Enqueued => "ENQUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Error => "ERROR",
        }
    }

    /// Whether no further transition is expected
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Error
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TasklibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TasklibError::InvalidStatus {
                value: s.to_string(),
            })
    }
}

/// One pending invocation, as stored in the queue.
///
/// Carries everything a stateless worker needs to run the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique task identifier
    pub task_id: TaskId,
    /// Registered name of the function to run
    pub func_name: String,
    /// Positional arguments
    pub args: Args,
    /// Keyword arguments
    pub kwargs: Kwargs,
}

impl Envelope {
    /// Build an envelope with a freshly allocated task id
    pub fn new(func_name: impl Into<String>, args: Args, kwargs: Kwargs) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            func_name: func_name.into(),
            args,
            kwargs,
        }
    }
}

/// Decoded view of a task's status record
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    /// Current lifecycle status
    pub status: TaskStatus,
    /// When the task was scheduled
    pub submitted: DateTime<Utc>,
    /// The envelope that was scheduled
    pub body: Envelope,
    /// Return value, once the task succeeded
    pub result: Option<Value>,
    /// Fault payload, once the task errored
    pub excinfo: Option<Fault>,
}

/// Structured description of a failure raised inside a task body.
///
/// Stored in the `excinfo` field of the status record. Any `std::error::Error`
/// converts into a `Fault`, so task bodies can use `?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Short classification, usually the error type name
    pub kind: String,
    /// Human readable message
    pub message: String,
    /// Optional trace text (source chain, panic location, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl Fault {
    /// Create a fault with the given kind and message
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            trace: None,
        }
    }

    /// Attach trace text
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Fault describing a panic inside a task body
    pub fn panic(message: impl Into<String>) -> Self {
        Self::new("panic", message)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl<E> From<E> for Fault
where
    E: std::error::Error,
{
    fn from(err: E) -> Self {
        let kind = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("error")
            .to_string();

        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        let fault = Fault::new(kind, err.to_string());
        if chain.is_empty() {
            fault
        } else {
            fault.with_trace(chain.join("\ncaused by: "))
        }
    }
}

/// Extract positional argument `index` as `T`.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, Fault> {
    let value = args.get(index).ok_or_else(|| {
        Fault::new(
            "MissingArgument",
            format!("missing positional argument {index}"),
        )
    })?;
    T::deserialize(value)
        .map_err(|e| Fault::new("BadArgument", format!("positional argument {index}: {e}")))
}

/// Extract keyword argument `name` as `T`, `None` when absent.
pub fn kwarg<T: DeserializeOwned>(kwargs: &Kwargs, name: &str) -> Result<Option<T>, Fault> {
    kwargs
        .get(name)
        .map(|value| {
            T::deserialize(value)
                .map_err(|e| Fault::new("BadArgument", format!("keyword argument '{name}': {e}")))
        })
        .transpose()
}

/// Build an [`Args`] list from serializable expressions.
///
/// ```rust
/// let args = tasklib::args![1, "two", 3.0];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::__serde_json::Value>::new()
    };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::__serde_json::json!($value)),+]
    };
}

/// Build a [`Kwargs`] map from `name => value` pairs.
///
/// ```rust
/// let kwargs = tasklib::kwargs! { "retries" => 2, "label" => "nightly" };
/// assert_eq!(kwargs.len(), 2);
/// ```
#[macro_export]
macro_rules! kwargs {
    () => {
        $crate::__serde_json::Map::<::std::string::String, $crate::__serde_json::Value>::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::__serde_json::Map::new();
        $(map.insert(::std::string::String::from($name), $crate::__serde_json::json!($value));)+
        map
    }};
}
