//! Trackers own the pending-work queue and the per-task status records.
//!
//! Both backends implement the same storage schema:
//! - **Queue**: a list at `<queue_name>`; producers append at the tail, workers
//!   remove from the head (strict FIFO).
//! - **Status**: a hash at `<status_prefix>:<task_id>` with the fields
//!   `status`, `submitted`, `body`, `result` and `excinfo`. Every write re-applies
//!   the time-to-live.
//!
//! Backends:
//! - **In-Memory**: single process, development and tests
//! - **Redis**: shared between processes and machines (requires `redis-queue`)
//!
//! # Examples
//!
//! ```rust,no_run
//! use tasklib::prelude::*;
//!
//! # async fn example() -> TasklibResult<()> {
//! let config = TasklibConfig::default();
//!
//! // In-memory tracker
//! let tracker = InMemoryTracker::new(&config.queue);
//!
//! // Redis tracker (requires redis-queue feature)
//! # #[cfg(feature = "redis-queue")]
//! let tracker = tasklib::tracker::RedisTracker::connect(&config).await?;
//! # Ok(())
//! # }
//! ```

use crate::codec::{Codec, decode_as, encode_as};
use crate::error::{TasklibError, TasklibResult};
use crate::task::{Envelope, Fault, StatusRecord, TaskId, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub mod memory;
pub use memory::InMemoryTracker;

#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
pub mod redis;

#[cfg(feature = "redis-queue")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-queue")))]
pub use redis::RedisTracker;

/// Raw status record fields, as stored
pub type RawRecord = HashMap<String, Vec<u8>>;

/// Field names of a status record
pub mod fields {
    /// Lifecycle status tag
    pub const STATUS: &str = "status";
    /// Scheduling timestamp
    pub const SUBMITTED: &str = "submitted";
    /// The encoded envelope
    pub const BODY: &str = "body";
    /// Return value
    pub const RESULT: &str = "result";
    /// Fault payload
    pub const EXCINFO: &str = "excinfo";
}

/// Outcome written by [`Tracker::complete`].
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Terminal status to record
    pub status: TaskStatus,
    /// Return value, if any
    pub result: Option<Value>,
    /// Fault payload, if any
    pub excinfo: Option<Fault>,
}

impl Default for Completion {
    fn default() -> Self {
        Self {
            status: TaskStatus::Success,
            result: None,
            excinfo: None,
        }
    }
}

impl Completion {
    /// Successful completion carrying `result`
    pub fn success(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Default::default()
        }
    }

    /// Errored completion carrying `fault`
    pub fn error(fault: Fault) -> Self {
        Self {
            status: TaskStatus::Error,
            result: None,
            excinfo: Some(fault),
        }
    }
}

/// Trait that all tracker backends must implement
#[async_trait]
pub trait Tracker: Send + Sync + std::fmt::Debug {
    /// Codec used for queue entries and record fields
    fn codec(&self) -> &dyn Codec;

    /// Push `envelope` to the queue tail and create its INIT status record,
    /// both in one atomic unit.
    async fn schedule(&self, envelope: &Envelope) -> TasklibResult<()>;

    /// Update the status field and reset the time-to-live.
    async fn mark_status(&self, task_id: &TaskId, new_status: TaskStatus) -> TasklibResult<()>;

    /// Write the terminal status plus whichever of result/excinfo is present.
    async fn complete(&self, task_id: &TaskId, completion: Completion) -> TasklibResult<()>;

    /// Remove and return the oldest pending envelope, `None` if the queue is empty.
    async fn pop(&self) -> TasklibResult<Option<Envelope>>;

    /// Like [`Tracker::pop`], but wait up to `timeout` for an envelope to arrive.
    async fn pop_blocking(&self, timeout: Duration) -> TasklibResult<Option<Envelope>>;

    /// Number of pending envelopes
    async fn pending(&self) -> TasklibResult<u64>;

    /// Raw status record fields; empty when the record is absent or expired.
    async fn get_task_by_uuid(&self, task_id: &TaskId) -> TasklibResult<RawRecord>;

    /// Drop the queue and every status record under the prefix (dangerous operation)
    async fn purge(&self) -> TasklibResult<u64>;

    /// Health check for the store
    async fn health_check(&self) -> TasklibResult<()>;

    /// Whether no envelopes are pending
    async fn empty(&self) -> TasklibResult<bool> {
        Ok(self.pending().await? == 0)
    }

    /// Parse a wire status tag and apply it.
    ///
    /// Fails with [`TasklibError::InvalidStatus`] without touching the record
    /// when `tag` is outside the status enumeration.
    async fn mark_status_tag(&self, task_id: &TaskId, tag: &str) -> TasklibResult<()> {
        let status = tag.parse::<TaskStatus>()?;
        self.mark_status(task_id, status).await
    }

    /// Read and decode a task's status record.
    async fn get_record(&self, task_id: &TaskId) -> TasklibResult<StatusRecord> {
        let raw = self.get_task_by_uuid(task_id).await?;
        decode_record(self.codec(), task_id, &raw)
    }
}

/// Key of the status record for `task_id`
pub fn status_key(prefix: &str, task_id: &str) -> String {
    format!("{}:{}", prefix, task_id)
}

/// Encoded envelope plus the fields of a fresh INIT record.
pub(crate) fn scheduled_fields(
    codec: &dyn Codec,
    envelope: &Envelope,
    now: DateTime<Utc>,
) -> TasklibResult<(Vec<u8>, Vec<(&'static str, Vec<u8>)>)> {
    let body = encode_as(codec, envelope)?;
    let record = vec![
        (fields::STATUS, encode_as(codec, &TaskStatus::Init)?),
        (fields::SUBMITTED, encode_as(codec, &now)?),
        (fields::RESULT, codec.encode(&Value::Null)?),
        (fields::BODY, body.clone()),
    ];
    Ok((body, record))
}

pub(crate) fn status_field(codec: &dyn Codec, status: TaskStatus) -> TasklibResult<Vec<u8>> {
    encode_as(codec, &status)
}

pub(crate) fn completion_fields(
    codec: &dyn Codec,
    completion: &Completion,
) -> TasklibResult<Vec<(&'static str, Vec<u8>)>> {
    let mut record = vec![(fields::STATUS, encode_as(codec, &completion.status)?)];
    if let Some(result) = &completion.result {
        record.push((fields::RESULT, codec.encode(result)?));
    }
    if let Some(excinfo) = &completion.excinfo {
        record.push((fields::EXCINFO, encode_as(codec, excinfo)?));
    }
    Ok(record)
}

pub(crate) fn decode_envelope(codec: &dyn Codec, bytes: &[u8]) -> TasklibResult<Envelope> {
    decode_as(codec, bytes)
}

/// Decode raw record fields; absent or malformed records are `TaskNotFound`.
pub fn decode_record(
    codec: &dyn Codec,
    task_id: &str,
    raw: &RawRecord,
) -> TasklibResult<StatusRecord> {
    let malformed = |field: &str| {
        tracing::debug!("Status record for {} has unusable field {}", task_id, field);
        TasklibError::not_found(task_id)
    };

    let field = |name: &'static str| raw.get(name).ok_or_else(|| malformed(name));

    let status: TaskStatus =
        decode_as(codec, field(fields::STATUS)?).map_err(|_| malformed(fields::STATUS))?;
    let submitted: DateTime<Utc> =
        decode_as(codec, field(fields::SUBMITTED)?).map_err(|_| malformed(fields::SUBMITTED))?;
    let body = decode_envelope(codec, field(fields::BODY)?).map_err(|_| malformed(fields::BODY))?;

    let result = match raw.get(fields::RESULT) {
        Some(bytes) => match codec.decode(bytes).map_err(|_| malformed(fields::RESULT))? {
            Value::Null => None,
            value => Some(value),
        },
        None => None,
    };

    let excinfo = raw
        .get(fields::EXCINFO)
        .map(|bytes| decode_as::<Fault>(codec, bytes))
        .transpose()
        .map_err(|_| malformed(fields::EXCINFO))?;

    Ok(StatusRecord {
        status,
        submitted,
        body,
        result,
        excinfo,
    })
}
