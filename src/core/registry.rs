//! Task registry: maps function names to their definitions.
//!
//! A [`TaskDefinition`] pairs a name with a [`Callable`] and its [`TaskOptions`].
//! Workers receive only the name inside an envelope and resolve it here, so every
//! process that runs workers must register the same names.
//!
//! Registration is first-wins: registering a name again leaves the original
//! definition in place and hands it back.
//!
//! # Examples
//!
//! ```rust
//! use tasklib::core::registry::{Callable, Registry, TaskOptions};
//! use tasklib::task::{Fault, arg};
//!
//! # async fn example() {
//! let registry = Registry::new();
//! let double = Callable::direct(|args, _kwargs| Ok::<_, Fault>(arg::<i64>(&args, 0)? * 2));
//! registry.register("double", double, TaskOptions::default()).await;
//!
//! assert!(registry.is_registered("double").await);
//! # }
//! ```

use crate::error::{TasklibError, TasklibResult};
use crate::task::{Args, Fault, Kwargs};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Boxed future produced by a suspendable task body
pub type TaskFuture = BoxFuture<'static, Result<Value, Fault>>;

/// Direct (run-to-completion) task body
pub type DirectFn = dyn Fn(Args, Kwargs) -> Result<Value, Fault> + Send + Sync;

/// Suspendable task body
pub type SuspendableFn = dyn Fn(Args, Kwargs) -> TaskFuture + Send + Sync;

/// The implementation behind a registered name.
#[derive(Clone)]
pub enum Callable {
    /// Plain function, run on the blocking pool by workers
    Direct(Arc<DirectFn>),
    /// Async function, driven on the runtime by workers
    Suspendable(Arc<SuspendableFn>),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Direct(_) => f.write_str("Callable::Direct"),
            Callable::Suspendable(_) => f.write_str("Callable::Suspendable"),
        }
    }
}

impl Callable {
    /// Wrap a plain function.
    ///
    /// The return value is serialized into the stored result; any error type
    /// convertible into [`Fault`] can be returned.
    pub fn direct<F, T, E>(f: F) -> Self
    where
        F: Fn(Args, Kwargs) -> Result<T, E> + Send + Sync + 'static,
        T: Serialize,
        E: Into<Fault>,
    {
        Callable::Direct(Arc::new(move |args, kwargs| {
            let value = f(args, kwargs).map_err(Into::<Fault>::into)?;
            serde_json::to_value(value).map_err(Fault::from)
        }))
    }

    /// Wrap an async function.
    pub fn suspendable<F, Fut, T, E>(f: F) -> Self
    where
        F: Fn(Args, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize,
        E: Into<Fault>,
    {
        Callable::Suspendable(Arc::new(move |args, kwargs| {
            let fut = f(args, kwargs);
            async move {
                let value = fut.await.map_err(Into::<Fault>::into)?;
                serde_json::to_value(value).map_err(Fault::from)
            }
            .boxed()
        }))
    }

    /// Whether this body is suspendable
    pub fn is_async(&self) -> bool {
        matches!(self, Callable::Suspendable(_))
    }
}

/// Per-task options.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Human-readable description of what this task does
    pub description: Option<String>,
}

impl TaskOptions {
    /// Options carrying a description
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
        }
    }
}

/// A registered task.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    /// Unique registry key
    pub name: String,
    /// The implementation
    pub callable: Callable,
    /// Options recorded at registration
    pub options: TaskOptions,
}

impl TaskDefinition {
    /// Whether workers drive this body as a future rather than on the blocking pool
    pub fn is_async(&self) -> bool {
        self.callable.is_async()
    }
}

/// Execution of a task body.
///
/// `invoke` runs the body in the caller's task, which is what a direct call
/// wants. `execute` isolates the body the way workers need it: direct bodies
/// move to the blocking pool, suspendable bodies get their own runtime task, and
/// a panic in either comes back as a [`Fault`].
#[async_trait]
pub trait Invocable: Send + Sync {
    /// Run the body now, in place
    async fn invoke(&self, args: Args, kwargs: Kwargs) -> Result<Value, Fault>;

    /// Run the body isolated from the calling task
    async fn execute(&self, args: Args, kwargs: Kwargs) -> Result<Value, Fault>;
}

#[async_trait]
impl Invocable for TaskDefinition {
    async fn invoke(&self, args: Args, kwargs: Kwargs) -> Result<Value, Fault> {
        match &self.callable {
            Callable::Suspendable(f) => f(args, kwargs).await,
            Callable::Direct(f) => f(args, kwargs),
        }
    }

    async fn execute(&self, args: Args, kwargs: Kwargs) -> Result<Value, Fault> {
        let joined = match &self.callable {
            Callable::Suspendable(f) => tokio::spawn(f(args, kwargs)).await,
            Callable::Direct(f) => {
                let f = Arc::clone(f);
                tokio::task::spawn_blocking(move || f(args, kwargs)).await
            }
        };

        joined.unwrap_or_else(|err| Err(join_fault(err)))
    }
}

fn join_fault(err: tokio::task::JoinError) -> Fault {
    let payload = match err.try_into_panic() {
        Ok(payload) => payload,
        Err(_) => return Fault::new("Cancelled", "task body was cancelled"),
    };
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task body panicked".to_string());
    Fault::panic(message)
}

/// Name-keyed table of task definitions.
#[derive(Debug, Default)]
pub struct Registry {
    tasks: RwLock<HashMap<String, Arc<TaskDefinition>>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        tracing::debug!("Creating new task registry");
        Self::default()
    }

    /// Register `callable` under `name`, returning the stored definition.
    ///
    /// When `name` is already registered the existing definition is kept and
    /// returned unchanged.
    pub async fn register(
        &self,
        name: impl Into<String>,
        callable: Callable,
        options: TaskOptions,
    ) -> Arc<TaskDefinition> {
        let name = name.into();
        let mut tasks = self.tasks.write().await;

        if let Some(existing) = tasks.get(&name) {
            tracing::debug!("Task '{}' already registered, keeping the first definition", name);
            return Arc::clone(existing);
        }

        let definition = Arc::new(TaskDefinition {
            name: name.clone(),
            callable,
            options,
        });
        tasks.insert(name.clone(), Arc::clone(&definition));

        tracing::info!(
            "Registered task: {} ({})",
            name,
            if definition.is_async() { "async" } else { "sync" }
        );
        definition
    }

    /// Resolve `name` to its definition.
    pub async fn lookup(&self, name: &str) -> TasklibResult<Arc<TaskDefinition>> {
        self.tasks
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| TasklibError::UnknownTask {
                name: name.to_string(),
            })
    }

    /// Check if a name is registered
    pub async fn is_registered(&self, name: &str) -> bool {
        self.tasks.read().await.contains_key(name)
    }

    /// All registered names, sorted
    pub async fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tasks
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether nothing is registered
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::task::{arg, kwarg};
    use serde_json::json;
    use std::time::Duration;

    fn add() -> Callable {
        Callable::direct(|args, _| {
            Ok::<_, Fault>(arg::<i64>(&args, 0)? + arg::<i64>(&args, 1)?)
        })
    }

    #[tokio::test]
    async fn test_first_registration_wins() {
        let registry = Registry::new();
        let first = registry
            .register("f", add(), TaskOptions::described("adds"))
            .await;
        let second = registry
            .register(
                "f",
                Callable::direct(|_, _| Ok::<_, Fault>("replaced")),
                TaskOptions::default(),
            )
            .await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);

        let stored = registry.lookup("f").await.unwrap();
        assert_eq!(stored.options.description.as_deref(), Some("adds"));
        assert_eq!(stored.invoke(args![2, 3], Kwargs::new()).await, Ok(json!(5)));
    }

    #[tokio::test]
    async fn test_lookup_unknown() {
        let registry = Registry::new();
        assert!(registry.is_empty().await);
        let err = registry.lookup("missing").await.unwrap_err();
        assert!(matches!(err, TasklibError::UnknownTask { name } if name == "missing"));
    }

    #[tokio::test]
    async fn test_registered_names_sorted() {
        let registry = Registry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(name, add(), TaskOptions::default()).await;
        }
        assert_eq!(registry.registered_names().await, vec!["alpha", "mid", "zeta"]);
        assert!(registry.is_registered("mid").await);
        assert!(!registry.is_registered("other").await);
    }

    #[tokio::test]
    async fn test_strategy_follows_callable() {
        let registry = Registry::new();
        let sleepy = Callable::suspendable(|args: Args, kwargs: Kwargs| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let scale = kwarg::<i64>(&kwargs, "scale")?.unwrap_or(1);
            Ok::<_, Fault>(arg::<i64>(&args, 0)? * scale)
        });

        let definition = registry
            .register("sleepy", sleepy, TaskOptions::default())
            .await;
        assert!(definition.is_async());
        assert!(!registry.register("add", add(), TaskOptions::default()).await.is_async());

        let kwargs = crate::kwargs! { "scale" => 3 };
        assert_eq!(definition.invoke(args![4], kwargs.clone()).await, Ok(json!(12)));
        assert_eq!(definition.execute(args![4], kwargs).await, Ok(json!(12)));
    }

    #[tokio::test]
    async fn test_execute_captures_panics() {
        let registry = Registry::new();
        let boom = Callable::direct(|_, _| -> Result<Value, Fault> { panic!("kaboom") });
        let definition = registry.register("boom", boom, TaskOptions::default()).await;

        let fault = definition.execute(Args::new(), Kwargs::new()).await.unwrap_err();
        assert_eq!(fault.kind, "panic");
        assert_eq!(fault.message, "kaboom");
    }

    #[tokio::test]
    async fn test_errors_become_faults() {
        let parse = Callable::direct(|args, _| {
            let text = arg::<String>(&args, 0)?;
            text.parse::<i64>().map_err(Fault::from)
        });
        let registry = Registry::new();
        let definition = registry.register("parse", parse, TaskOptions::default()).await;

        let fault = definition
            .execute(args!["nope"], Kwargs::new())
            .await
            .unwrap_err();
        assert_eq!(fault.kind, "ParseIntError");

        let fault = definition
            .execute(Args::new(), Kwargs::new())
            .await
            .unwrap_err();
        assert_eq!(fault.kind, "MissingArgument");
    }
}
