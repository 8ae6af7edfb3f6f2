//! Worker implementation for tasklib.
//!
//! A worker pulls envelopes from the tracker, resolves the function name through
//! the registry, runs the body and records the outcome. It holds no state of its
//! own beyond counters, so any number of workers (in any number of processes)
//! can share one tracker.

use crate::config::WorkerConfig;
use crate::core::registry::{Invocable, Registry};
use crate::error::{TasklibError, TasklibResult};
use crate::task::{Envelope, Fault, TaskStatus};
use crate::tracker::{Completion, Tracker};
use crate::utils::calculate_backoff;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// What happened to one envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The body returned a value, recorded as SUCCESS
    Succeeded(Value),
    /// The body raised a fault, recorded as ERROR
    Failed(Fault),
    /// The function name is not registered; the envelope was discarded
    Dropped,
}

/// Counters shared by every unit built from the same worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl WorkerStats {
    /// Envelopes taken off the queue and handled (including dropped ones)
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Invocations recorded as SUCCESS
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Invocations recorded as ERROR
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Envelopes discarded (unknown name or undecodable entry)
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: &Outcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::Succeeded(_) => &self.succeeded,
            Outcome::Failed(_) => &self.failed,
            Outcome::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Executes queued invocations
#[derive(Debug, Clone)]
pub struct Worker {
    tracker: Arc<dyn Tracker>,
    registry: Arc<Registry>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl Worker {
    /// Create a new worker over `tracker` and `registry`
    pub fn new(tracker: Arc<dyn Tracker>, registry: Arc<Registry>, config: WorkerConfig) -> Self {
        Self {
            tracker,
            registry,
            config,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Counters for this worker and its clones
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Worker configuration
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Handle one envelope: mark it RUNNING, run the body, record the outcome.
    ///
    /// An unregistered function name is logged and the envelope dropped; its
    /// status stays RUNNING until the record expires. Store failures are
    /// returned to the caller.
    pub async fn process_item(&self, envelope: Envelope) -> TasklibResult<Outcome> {
        let task_id = envelope.task_id;
        self.tracker
            .mark_status(&task_id, TaskStatus::Running)
            .await?;

        let definition = match self.registry.lookup(&envelope.func_name).await {
            Ok(definition) => definition,
            Err(TasklibError::UnknownTask { name }) => {
                tracing::warn!("Dropping task {}: '{}' is not registered", task_id, name);
                self.stats.record(&Outcome::Dropped);
                return Ok(Outcome::Dropped);
            }
            Err(e) => return Err(e),
        };

        tracing::debug!("Running task {} ({})", task_id, definition.name);
        let started = Instant::now();
        let outcome = match definition.execute(envelope.args, envelope.kwargs).await {
            Ok(value) => {
                self.tracker
                    .complete(&task_id, Completion::success(value.clone()))
                    .await?;
                tracing::info!(
                    "Task {} ({}) succeeded in {:?}",
                    task_id,
                    definition.name,
                    started.elapsed()
                );
                Outcome::Succeeded(value)
            }
            Err(fault) => {
                self.tracker
                    .complete(&task_id, Completion::error(fault.clone()))
                    .await?;
                tracing::info!(
                    "Task {} ({}) raised {} after {:?}",
                    task_id,
                    definition.name,
                    fault,
                    started.elapsed()
                );
                Outcome::Failed(fault)
            }
        };

        self.stats.record(&outcome);
        Ok(outcome)
    }

    /// Inline mode: take at most one envelope without blocking and process it.
    ///
    /// Returns `None` when the queue was empty.
    pub async fn run_once(&self) -> TasklibResult<Option<Outcome>> {
        match self.tracker.pop().await? {
            Some(envelope) => Ok(Some(self.process_item(envelope).await?)),
            None => Ok(None),
        }
    }

    /// Worker unit loop; runs until `shutdown` is cancelled or the store fails.
    ///
    /// Cancellation is checked between iterations only, so a running body and
    /// an in-flight pop always finish first.
    pub async fn run(&self, unit_id: usize, shutdown: CancellationToken) -> TasklibResult<()> {
        tracing::info!("Worker unit {} started", unit_id);
        let mut empty_polls = 0u32;

        while !shutdown.is_cancelled() {
            let popped = if self.config.blocking_pop {
                self.tracker.pop_blocking(self.config.poll_timeout()).await
            } else {
                self.tracker.pop().await
            };

            match popped {
                Ok(Some(envelope)) => {
                    empty_polls = 0;
                    if let Err(e) = self.process_item(envelope).await {
                        tracing::error!("Worker unit {} stopping: {}", unit_id, e);
                        return Err(e);
                    }
                }
                Ok(None) if self.config.blocking_pop => {}
                Ok(None) => {
                    empty_polls = empty_polls.saturating_add(1);
                    let backoff_ms =
                        calculate_backoff(empty_polls, unit_id as u64, self.config.idle_timeout_ms);
                    tracing::trace!("Worker unit {} idle, backing off {}ms", unit_id, backoff_ms);

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(Duration::from_millis(backoff_ms)) => {}
                    }
                }
                Err(TasklibError::SerializationError(e)) => {
                    tracing::warn!("Worker unit {} skipping malformed queue entry: {}", unit_id, e);
                    self.stats.processed.fetch_add(1, Ordering::Relaxed);
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::error!("Worker unit {} stopping: {}", unit_id, e);
                    return Err(e);
                }
            }
        }

        tracing::info!("Worker unit {} stopped", unit_id);
        Ok(())
    }
}
