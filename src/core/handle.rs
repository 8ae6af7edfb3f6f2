//! Client-facing view of one task.
//!
//! A handle is obtained from registration (unbound, no task id) or from
//! [`TaskHandle::enqueue`] / [`TaskHandle::get`] (bound to an id). It is a
//! snapshot of the status record, never the source of truth: call
//! [`TaskHandle::refresh`] to pick up what the workers wrote since.

use crate::core::registry::{Invocable, Registry, TaskDefinition};
use crate::error::{TasklibError, TasklibResult};
use crate::task::{Args, Envelope, Fault, Kwargs, StatusRecord, TaskId, TaskStatus};
use crate::tracker::Tracker;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Handle on a registered task, optionally bound to one invocation.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    definition: Arc<TaskDefinition>,
    tracker: Arc<dyn Tracker>,
    task_id: Option<TaskId>,
    status: Option<TaskStatus>,
    args: Args,
    kwargs: Kwargs,
    result: Option<Value>,
    excinfo: Option<Fault>,
    submitted: Option<DateTime<Utc>>,
}

impl TaskHandle {
    pub(crate) fn unbound(definition: Arc<TaskDefinition>, tracker: Arc<dyn Tracker>) -> Self {
        Self {
            definition,
            tracker,
            task_id: None,
            status: None,
            args: Args::new(),
            kwargs: Kwargs::new(),
            result: None,
            excinfo: None,
            submitted: None,
        }
    }

    /// Run the task body right now, bypassing the queue.
    ///
    /// Suspendable bodies are driven to completion in the calling task. A
    /// fault raised by the body is returned as [`TasklibError::ExecutionFault`].
    pub async fn call(&self, args: Args, kwargs: Kwargs) -> TasklibResult<Value> {
        self.definition
            .invoke(args, kwargs)
            .await
            .map_err(TasklibError::ExecutionFault)
    }

    /// Schedule an invocation for a worker and return a handle bound to it.
    pub async fn enqueue(&self, args: Args, kwargs: Kwargs) -> TasklibResult<TaskHandle> {
        let envelope = Envelope::new(self.definition.name.clone(), args, kwargs);
        self.tracker.schedule(&envelope).await?;

        tracing::debug!("Enqueued {} as {}", envelope.func_name, envelope.task_id);

        Ok(Self {
            definition: Arc::clone(&self.definition),
            tracker: Arc::clone(&self.tracker),
            task_id: Some(envelope.task_id),
            status: Some(TaskStatus::Init),
            args: envelope.args,
            kwargs: envelope.kwargs,
            result: None,
            excinfo: None,
            submitted: Some(Utc::now()),
        })
    }

    /// Rebuild a handle from the stored status record of `task_id`.
    ///
    /// Fails with [`TasklibError::TaskNotFound`] when the record is absent,
    /// expired or malformed, and with [`TasklibError::UnknownTask`] when the
    /// recorded function name is not registered here.
    pub async fn get(
        tracker: &Arc<dyn Tracker>,
        registry: &Registry,
        task_id: &TaskId,
    ) -> TasklibResult<TaskHandle> {
        let record = tracker.get_record(task_id).await?;
        let definition = registry.lookup(&record.body.func_name).await?;

        let mut handle = Self::unbound(definition, Arc::clone(tracker));
        handle.task_id = Some(task_id.clone());
        handle.apply(record);
        Ok(handle)
    }

    /// Re-read the status record into this handle.
    ///
    /// An unbound handle has nothing to read and reports `TaskNotFound`.
    pub async fn refresh(&mut self) -> TasklibResult<()> {
        let task_id = self
            .task_id
            .clone()
            .ok_or_else(|| TasklibError::not_found(""))?;
        let record = self.tracker.get_record(&task_id).await?;
        self.apply(record);
        Ok(())
    }

    /// Poll the record every `poll_interval` until the task finishes.
    ///
    /// Returns the final status, or [`TasklibError::Timeout`] once `timeout`
    /// has elapsed.
    pub async fn wait(
        &mut self,
        poll_interval: Duration,
        timeout: Duration,
    ) -> TasklibResult<TaskStatus> {
        tokio::time::timeout(timeout, self.poll_until_finished(poll_interval))
            .await
            .map_err(|_| TasklibError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    async fn poll_until_finished(&mut self, poll_interval: Duration) -> TasklibResult<TaskStatus> {
        loop {
            self.refresh().await?;
            match self.status {
                Some(status) if self.is_finished() => return Ok(status),
                _ => tokio::time::sleep(poll_interval).await,
            }
        }
    }

    /// Whether the last known status is SUCCESS or ERROR
    pub fn is_finished(&self) -> bool {
        matches!(self.status, Some(TaskStatus::Success | TaskStatus::Error))
    }

    fn apply(&mut self, record: StatusRecord) {
        self.status = Some(record.status);
        self.submitted = Some(record.submitted);
        self.args = record.body.args;
        self.kwargs = record.body.kwargs;
        self.result = record.result;
        self.excinfo = record.excinfo;
    }

    /// Registered name of the task
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The registered definition
    pub fn definition(&self) -> &Arc<TaskDefinition> {
        &self.definition
    }

    /// Bound task id, `None` for a registration handle
    pub fn task_id(&self) -> Option<&TaskId> {
        self.task_id.as_ref()
    }

    /// Last known status
    pub fn status(&self) -> Option<TaskStatus> {
        self.status
    }

    /// Positional arguments of the bound invocation
    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Keyword arguments of the bound invocation
    pub fn kwargs(&self) -> &Kwargs {
        &self.kwargs
    }

    /// Return value, once known
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Fault payload, once known
    pub fn excinfo(&self) -> Option<&Fault> {
        self.excinfo.as_ref()
    }

    /// When the invocation was scheduled
    pub fn submitted(&self) -> Option<DateTime<Utc>> {
        self.submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::core::registry::{Callable, TaskOptions};
    use crate::task::arg;
    use crate::tracker::{Completion, InMemoryTracker};
    use serde_json::json;
    use tokio_test::assert_ok;

    async fn setup() -> (Arc<dyn Tracker>, Registry, TaskHandle) {
        let tracker: Arc<dyn Tracker> = Arc::new(InMemoryTracker::default());
        let registry = Registry::new();
        let definition = registry
            .register(
                "square",
                Callable::direct(|args, _| {
                    let x = arg::<i64>(&args, 0)?;
                    Ok::<_, Fault>(x * x)
                }),
                TaskOptions::default(),
            )
            .await;
        let handle = TaskHandle::unbound(definition, Arc::clone(&tracker));
        (tracker, registry, handle)
    }

    #[tokio::test]
    async fn test_call_bypasses_queue() {
        let (tracker, _, handle) = setup().await;
        assert_eq!(handle.call(args![7], Kwargs::new()).await.unwrap(), json!(49));
        assert!(tracker.empty().await.unwrap());

        let err = handle.call(args!["x"], Kwargs::new()).await.unwrap_err();
        assert!(matches!(err, TasklibError::ExecutionFault(fault) if fault.kind == "BadArgument"));
    }

    #[tokio::test]
    async fn test_enqueue_binds_handle() {
        let (tracker, registry, handle) = setup().await;
        let bound = handle.enqueue(args![3], Kwargs::new()).await.unwrap();

        assert!(handle.task_id().is_none());
        let task_id = bound.task_id().cloned().unwrap();
        assert_eq!(bound.status(), Some(TaskStatus::Init));
        assert_eq!(bound.args(), &args![3]);
        assert!(!tracker.empty().await.unwrap());

        let fetched = TaskHandle::get(&tracker, &registry, &task_id).await.unwrap();
        assert_eq!(fetched.name(), "square");
        assert_eq!(fetched.status(), Some(TaskStatus::Init));
        assert_eq!(fetched.args(), &args![3]);
        assert!(fetched.result().is_none());
    }

    #[tokio::test]
    async fn test_get_missing_and_unknown() {
        let (tracker, registry, _) = setup().await;
        let missing = TaskHandle::get(&tracker, &registry, &"nope".to_string()).await;
        assert!(matches!(missing, Err(TasklibError::TaskNotFound { .. })));

        let stray = Envelope::new("not_registered", args![], Kwargs::new());
        tracker.schedule(&stray).await.unwrap();
        let unknown = TaskHandle::get(&tracker, &registry, &stray.task_id).await;
        assert!(matches!(unknown, Err(TasklibError::UnknownTask { .. })));
    }

    #[tokio::test]
    async fn test_refresh_and_wait() {
        let (tracker, _, handle) = setup().await;
        let mut bound = handle.enqueue(args![4], Kwargs::new()).await.unwrap();
        let task_id = bound.task_id().cloned().unwrap();

        tracker
            .complete(&task_id, Completion::success(json!(16)))
            .await
            .unwrap();
        assert!(!bound.is_finished());

        assert_ok!(bound.refresh().await);
        assert!(bound.is_finished());
        assert_eq!(bound.result(), Some(&json!(16)));

        let status = bound
            .wait(Duration::from_millis(5), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(status, TaskStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let (_, _, handle) = setup().await;
        let mut bound = handle.enqueue(args![4], Kwargs::new()).await.unwrap();

        let err = bound
            .wait(Duration::from_millis(100), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, TasklibError::Timeout { timeout_ms: 2000 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_wait_reports_millis() {
        let (_, _, handle) = setup().await;
        let mut bound = handle.enqueue(args![4], Kwargs::new()).await.unwrap();

        let err = bound
            .wait(Duration::from_millis(50), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, TasklibError::Timeout { timeout_ms: 250 }));
        assert_eq!(err.to_string(), "Operation timed out after 250 ms");
    }

    #[tokio::test]
    async fn test_refresh_unbound() {
        let (_, _, mut handle) = setup().await;
        assert!(matches!(
            handle.refresh().await,
            Err(TasklibError::TaskNotFound { .. })
        ));
    }
}
