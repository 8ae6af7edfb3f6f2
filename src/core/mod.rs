//! The task application facade, plus the registry, handles and workers it ties together.

use crate::config::TasklibConfig;
use crate::error::{TasklibError, TasklibResult};
use crate::task::{Args, Fault, Kwargs, TaskId};
use crate::tracker::{InMemoryTracker, Tracker};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

pub mod engine;
pub mod handle;
pub mod registry;
pub mod worker;

pub use engine::WorkerEngine;
pub use handle::TaskHandle;
pub use registry::{Callable, Invocable, Registry, TaskDefinition, TaskOptions};
pub use worker::{Outcome, Worker, WorkerStats};

/// The main entry point of tasklib.
///
/// Bundles the configuration, the tracker and the registry. Producers use it to
/// register functions and enqueue calls; worker processes build the same app,
/// register the same names and run a [`WorkerEngine`].
///
/// # Examples
///
/// ```rust
/// use tasklib::prelude::*;
///
/// #[tokio::main]
/// async fn main() -> TasklibResult<()> {
///     let app = TaskApp::in_memory(TasklibConfig::testing())?;
///     let add3 = app
///         .task("add3", |args, _| {
///             Ok::<_, Fault>(arg::<i64>(&args, 0)? + arg::<i64>(&args, 1)? + arg::<i64>(&args, 2)?)
///         })
///         .await;
///
///     let handle = add3.enqueue(args![2, 3, 4], kwargs! {}).await?;
///     app.worker().run_once().await?;
///
///     let done = app.get(handle.task_id().unwrap()).await?;
///     assert_eq!(done.status(), Some(TaskStatus::Success));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TaskApp {
    config: Arc<TasklibConfig>,
    tracker: Arc<dyn Tracker>,
    registry: Arc<Registry>,
}

impl TaskApp {
    /// Create an app backed by an in-memory tracker.
    pub fn in_memory(config: TasklibConfig) -> TasklibResult<Self> {
        let tracker = Arc::new(InMemoryTracker::new(&config.queue));
        Self::with_tracker(config, tracker)
    }

    /// Create an app over a custom tracker backend.
    pub fn with_tracker(config: TasklibConfig, tracker: Arc<dyn Tracker>) -> TasklibResult<Self> {
        config
            .validate()
            .map_err(|errors| TasklibError::config(errors.join("; ")))?;

        Ok(Self {
            config: Arc::new(config),
            tracker,
            registry: Arc::new(Registry::new()),
        })
    }

    /// Create an app backed by Redis.
    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    pub async fn with_redis(config: TasklibConfig) -> TasklibResult<Self> {
        config
            .validate()
            .map_err(|errors| TasklibError::config(errors.join("; ")))?;
        let tracker = crate::tracker::RedisTracker::connect(&config).await?;
        Self::with_tracker(config, Arc::new(tracker))
    }

    /// Register `callable` under `name` and return its handle.
    ///
    /// The first registration of a name wins; later ones return a handle on
    /// the original definition.
    pub async fn register(
        &self,
        name: impl Into<String>,
        callable: Callable,
        options: TaskOptions,
    ) -> TaskHandle {
        let definition = self.registry.register(name, callable, options).await;
        TaskHandle::unbound(definition, Arc::clone(&self.tracker))
    }

    /// Register a plain function.
    pub async fn task<F, T, E>(&self, name: impl Into<String>, f: F) -> TaskHandle
    where
        F: Fn(Args, Kwargs) -> Result<T, E> + Send + Sync + 'static,
        T: Serialize,
        E: Into<Fault>,
    {
        self.register(name, Callable::direct(f), TaskOptions::default())
            .await
    }

    /// Register an async function.
    pub async fn async_task<F, Fut, T, E>(&self, name: impl Into<String>, f: F) -> TaskHandle
    where
        F: Fn(Args, Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Serialize,
        E: Into<Fault>,
    {
        self.register(name, Callable::suspendable(f), TaskOptions::default())
            .await
    }

    /// Handle on an already registered name
    pub async fn handle(&self, name: &str) -> TasklibResult<TaskHandle> {
        let definition = self.registry.lookup(name).await?;
        Ok(TaskHandle::unbound(definition, Arc::clone(&self.tracker)))
    }

    /// Look up a task by id.
    pub async fn get(&self, task_id: &TaskId) -> TasklibResult<TaskHandle> {
        TaskHandle::get(&self.tracker, &self.registry, task_id).await
    }

    /// A worker over this app's tracker and registry
    pub fn worker(&self) -> Worker {
        Worker::new(
            Arc::clone(&self.tracker),
            Arc::clone(&self.registry),
            self.config.workers.clone(),
        )
    }

    /// A worker engine sized from the configuration
    pub fn engine(&self) -> WorkerEngine {
        WorkerEngine::new(self.worker(), self.config.workers.num_workers)
    }

    /// Get the current configuration
    pub fn config(&self) -> &TasklibConfig {
        &self.config
    }

    /// The tracker backend
    pub fn tracker(&self) -> &Arc<dyn Tracker> {
        &self.tracker
    }

    /// The task registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
