//! # tasklib
//!
//! A lightweight background-job queue for Rust applications.
//!
//! Register named functions, enqueue calls to them, let workers execute those
//! calls in the background, and look up each call's status and result later
//! by its task id.
//!
//! ## Features
//!
//! - **Named dispatch**: workers resolve functions by name from a [`Registry`](core::Registry)
//! - **Direct and async bodies**: plain functions run on the blocking pool, async ones on the runtime
//! - **Status tracking**: every call gets an expiring status record (`INIT -> RUNNING -> SUCCESS/ERROR`)
//! - **Pluggable stores**: in-memory by default, Redis with the `redis-queue` feature
//! - **Graceful shutdown**: worker units stop between iterations, never mid-task
//!
//! ## Quick Start
//!
//! ```rust
//! use tasklib::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> TasklibResult<()> {
//!     let app = TaskApp::in_memory(TasklibConfig::testing())?;
//!
//!     let multiply = app
//!         .task("multiply", |args, _kwargs| {
//!             Ok::<_, Fault>(arg::<i64>(&args, 0)? * arg::<i64>(&args, 1)?)
//!         })
//!         .await;
//!
//!     // Run it right here...
//!     assert_eq!(multiply.call(args![6, 7], kwargs! {}).await?, serde_json::json!(42));
//!
//!     // ...or in the background
//!     let mut handle = multiply.enqueue(args![6, 7], kwargs! {}).await?;
//!     let mut engine = app.engine();
//!     engine.start()?;
//!     handle
//!         .wait(std::time::Duration::from_millis(10), std::time::Duration::from_secs(5))
//!         .await?;
//!     engine.stop().await?;
//!
//!     assert_eq!(handle.result(), Some(&serde_json::json!(42)));
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod task;
pub mod tracker;
pub mod utils;

#[doc(hidden)]
pub use serde_json as __serde_json;

pub mod prelude {
    pub use crate::codec::{Codec, JsonCodec};
    pub use crate::config::*;
    pub use crate::core::{
        Callable, Outcome, TaskApp, TaskHandle, TaskOptions, Worker, WorkerEngine,
    };
    pub use crate::error::{TasklibError, TasklibResult};
    pub use crate::task::{Args, Envelope, Fault, Kwargs, TaskId, TaskStatus, arg, kwarg};
    pub use crate::tracker::{InMemoryTracker, Tracker};
    pub use crate::{args, kwargs};

    #[cfg(feature = "redis-queue")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
    pub use crate::tracker::RedisTracker;
}

pub use crate::config::*;
pub use crate::core::TaskApp;
pub use crate::error::{TasklibError, TasklibResult};
pub use crate::task::{Args, Fault, Kwargs, TaskId, TaskStatus};
pub use crate::tracker::Tracker;
