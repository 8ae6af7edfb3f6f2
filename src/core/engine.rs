//! The worker engine: runs a pool of worker units with cooperative shutdown.
//!
//! Every unit is a clone of one [`Worker`] spawned on a [`JoinSet`]. Units
//! share the tracker, the registry and the counters. Shutdown cancels a
//! [`CancellationToken`] that each unit checks between iterations, so a body
//! that is already running always finishes and gets its outcome recorded.
//!
//! If any unit fails on the store, the engine logs it, cancels the siblings and
//! surfaces the error from [`WorkerEngine::wait`] or [`WorkerEngine::stop`].

use crate::core::worker::{Worker, WorkerStats};
use crate::error::{TasklibError, TasklibResult};
use crate::task::Fault;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Pool of worker units
#[derive(Debug)]
pub struct WorkerEngine {
    worker: Worker,
    num_workers: usize,
    shutdown: CancellationToken,
    units: Option<JoinSet<TasklibResult<()>>>,
}

impl WorkerEngine {
    /// Create an engine that will run `num_workers` copies of `worker`
    pub fn new(worker: Worker, num_workers: usize) -> Self {
        Self {
            worker,
            num_workers,
            shutdown: CancellationToken::new(),
            units: None,
        }
    }

    /// Spawn the worker units.
    pub fn start(&mut self) -> TasklibResult<()> {
        if self.units.is_some() {
            return Err(TasklibError::AlreadyRunning);
        }

        tracing::info!("Starting worker engine with {} units", self.num_workers);

        // A cancelled token stays cancelled; each run gets a fresh one.
        self.shutdown = CancellationToken::new();
        let mut units = JoinSet::new();
        for unit_id in 0..self.num_workers {
            let worker = self.worker.clone();
            let shutdown = self.shutdown.clone();
            units.spawn(async move { worker.run(unit_id, shutdown).await });
        }
        self.units = Some(units);

        Ok(())
    }

    /// Ask every unit to stop after its current iteration and wait for them.
    pub async fn stop(&mut self) -> TasklibResult<()> {
        let units = self.units.take().ok_or(TasklibError::NotRunning)?;

        tracing::info!("Shutting down worker engine...");
        self.shutdown.cancel();
        let result = self.join(units).await;

        tracing::info!("Worker engine shutdown complete");
        result
    }

    /// Wait for the units to finish on their own.
    ///
    /// Units only finish once shutdown was requested through
    /// [`WorkerEngine::shutdown_token`] or one of them failed.
    pub async fn wait(&mut self) -> TasklibResult<()> {
        let units = self.units.take().ok_or(TasklibError::NotRunning)?;
        self.join(units).await
    }

    /// Run until Ctrl-C, then shut down gracefully.
    pub async fn run_until_ctrl_c(&mut self) -> TasklibResult<()> {
        self.start()?;
        let shutdown = self.shutdown.clone();

        let mut units = self.units.take().ok_or(TasklibError::NotRunning)?;
        let first = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
                    Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
                }
                None
            }
            joined = units.join_next() => joined,
        };
        shutdown.cancel();

        let first = first.map(unit_result).unwrap_or(Ok(()));
        let rest = self.join(units).await;
        first.and(rest)
    }

    /// Token that stops every unit when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Whether units have been started and not yet joined
    pub fn is_running(&self) -> bool {
        self.units.is_some()
    }

    /// Number of units per run
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Counters shared by all units
    pub fn stats(&self) -> &WorkerStats {
        self.worker.stats()
    }

    async fn join(&self, mut units: JoinSet<TasklibResult<()>>) -> TasklibResult<()> {
        let mut first_error = None;

        while let Some(joined) = units.join_next().await {
            if let Err(e) = unit_result(joined) {
                if first_error.is_none() {
                    tracing::error!("Worker unit failed, stopping the others: {}", e);
                    self.shutdown.cancel();
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn unit_result(
    joined: Result<TasklibResult<()>, tokio::task::JoinError>,
) -> TasklibResult<()> {
    joined.unwrap_or_else(|e| Err(TasklibError::ExecutionFault(Fault::from(e))))
}
