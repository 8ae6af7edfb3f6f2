//! Redis tracker implementation.
//!
//! Shares the queue and status records between every process pointed at the
//! same Redis database.
//!
//! # Layout
//!
//! - `<queue_name>`: list of encoded envelopes (`RPUSH` to schedule, `LPOP`/`BLPOP` to take)
//! - `<status_prefix>:<task_id>`: hash holding the status record, with `EXPIRE` reapplied on every write

use super::{
    Completion, RawRecord, Tracker, completion_fields, decode_envelope, scheduled_fields,
    status_field, status_key,
};
use crate::codec::{Codec, JsonCodec};
use crate::config::{QueueConfig, TasklibConfig};
use crate::error::{TasklibError, TasklibResult};
use crate::task::{Envelope, TaskId, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Redis tracker backend implementation
pub struct RedisTracker {
    client: Client,
    /// Shared connection for every non-blocking command
    conn: ConnectionManager,
    /// Idle connections reserved for `BLPOP`, one per concurrent waiter
    blocking: Mutex<Vec<MultiplexedConnection>>,
    queue_config: QueueConfig,
    codec: Arc<dyn Codec>,
}

impl std::fmt::Debug for RedisTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTracker")
            .field("queue_config", &self.queue_config)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl RedisTracker {
    /// Connect using the store endpoint and queue layout from `config`
    pub async fn connect(config: &TasklibConfig) -> TasklibResult<Self> {
        Self::connect_with_codec(config, Arc::new(JsonCodec)).await
    }

    /// Connect with a custom codec
    pub async fn connect_with_codec(
        config: &TasklibConfig,
        codec: Arc<dyn Codec>,
    ) -> TasklibResult<Self> {
        let client = Client::open(config.store.connection_url())
            .map_err(|e| TasklibError::store(format!("Failed to create Redis client: {}", e), e))?;

        let conn = timeout(config.store.connect_timeout(), client.get_connection_manager())
            .await
            .map_err(|e| TasklibError::store("Timed out connecting to Redis", e))?
            .map_err(|e| {
                TasklibError::store(format!("Failed to create Redis connection manager: {}", e), e)
            })?;

        info!(
            "Connected to Redis at {}:{} (queue '{}')",
            config.store.host, config.store.port, config.queue.queue_name
        );

        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(Vec::new()),
            queue_config: config.queue.clone(),
            codec,
        })
    }

    fn queue_key(&self) -> &str {
        &self.queue_config.queue_name
    }

    fn key_name(&self, task_id: &str) -> String {
        status_key(&self.queue_config.status_prefix, task_id)
    }

    fn expiry_secs(&self) -> i64 {
        self.queue_config.result_expiry_secs as i64
    }

    /// Take an idle blocking connection, opening a new one when none is left
    async fn checkout_blocking(&self) -> TasklibResult<MultiplexedConnection> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TasklibError::store(format!("Failed to open blocking connection: {}", e), e))
    }

    /// Write `fields` to a status hash and reset its time-to-live
    async fn write_fields(
        &self,
        task_id: &TaskId,
        fields: Vec<(&'static str, Vec<u8>)>,
    ) -> TasklibResult<()> {
        let mut conn = self.conn.clone();
        let key = self.key_name(task_id);

        redis::pipe()
            .atomic()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .expire(&key, self.expiry_secs())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| TasklibError::store(format!("Failed to update task {}: {}", task_id, e), e))
    }
}

#[async_trait]
impl Tracker for RedisTracker {
    fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    async fn schedule(&self, envelope: &Envelope) -> TasklibResult<()> {
        let (body, fields) = scheduled_fields(self.codec(), envelope, Utc::now())?;
        let key = self.key_name(&envelope.task_id);
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .rpush(self.queue_key(), body)
            .ignore()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .expire(&key, self.expiry_secs())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| TasklibError::store(format!("Failed to schedule task: {}", e), e))?;

        debug!("Scheduled task: {} ({})", envelope.task_id, envelope.func_name);
        Ok(())
    }

    async fn mark_status(&self, task_id: &TaskId, new_status: TaskStatus) -> TasklibResult<()> {
        let value = status_field(self.codec(), new_status)?;
        self.write_fields(task_id, vec![(super::fields::STATUS, value)])
            .await?;

        debug!("{} changed status to {}", task_id, new_status);
        Ok(())
    }

    async fn complete(&self, task_id: &TaskId, completion: Completion) -> TasklibResult<()> {
        let fields = completion_fields(self.codec(), &completion)?;
        self.write_fields(task_id, fields).await?;

        debug!("Completed task {} with {}", task_id, completion.status);
        Ok(())
    }

    async fn pop(&self) -> TasklibResult<Option<Envelope>> {
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn
            .lpop(self.queue_key(), None)
            .await
            .map_err(|e| TasklibError::store(format!("Failed to pop from queue: {}", e), e))?;

        bytes
            .map(|bytes| decode_envelope(self.codec(), &bytes))
            .transpose()
    }

    async fn pop_blocking(&self, timeout: Duration) -> TasklibResult<Option<Envelope>> {
        // BLPOP treats 0 as "wait forever"
        if timeout.is_zero() {
            return self.pop().await;
        }

        let mut conn = self.checkout_blocking().await?;
        let popped: Option<(String, Vec<u8>)> = conn
            .blpop(self.queue_key(), timeout.as_secs_f64())
            .await
            .map_err(|e| TasklibError::store(format!("Failed to pop from queue: {}", e), e))?;
        self.blocking.lock().await.push(conn);

        popped
            .map(|(_, bytes)| decode_envelope(self.codec(), &bytes))
            .transpose()
    }

    async fn pending(&self) -> TasklibResult<u64> {
        let mut conn = self.conn.clone();
        conn.llen(self.queue_key())
            .await
            .map_err(|e| TasklibError::store(format!("Failed to read queue length: {}", e), e))
    }

    async fn get_task_by_uuid(&self, task_id: &TaskId) -> TasklibResult<RawRecord> {
        let mut conn = self.conn.clone();
        conn.hgetall(self.key_name(task_id))
            .await
            .map_err(|e| TasklibError::store(format!("Failed to read task {}: {}", task_id, e), e))
    }

    async fn purge(&self) -> TasklibResult<u64> {
        let mut conn = self.conn.clone();

        let pending: u64 = conn
            .llen(self.queue_key())
            .await
            .map_err(|e| TasklibError::store(format!("Failed to read queue length: {}", e), e))?;
        let mut keys: Vec<String> = conn
            .keys(format!("{}:*", self.queue_config.status_prefix))
            .await
            .map_err(|e| TasklibError::store(format!("Failed to list status records: {}", e), e))?;
        let records = keys.len() as u64;
        keys.push(self.queue_key().to_string());

        redis::pipe()
            .atomic()
            .del(&keys)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| TasklibError::store(format!("Failed to purge tracker: {}", e), e))?;

        warn!("Purged {} entries from Redis tracker", pending + records);
        Ok(pending + records)
    }

    async fn health_check(&self) -> TasklibResult<()> {
        let mut conn = self.conn.clone();

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| TasklibError::store(format!("Redis health check failed: {}", e), e))?;

        if pong != "PONG" {
            return Err(TasklibError::StoreError {
                message: "Redis health check failed: unexpected response".to_string(),
                source: None,
            });
        }

        debug!("Redis tracker health check passed");
        Ok(())
    }
}
