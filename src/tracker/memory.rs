//! In-memory tracker implementation.
//!
//! Keeps the queue and the status records behind a single lock, so `schedule`
//! is atomic with respect to every reader. Records expire on the tokio clock,
//! which lets tests fast-forward time with `tokio::time::pause`.
//!
//! Reads evict an expired record on sight. Writes additionally sweep the whole
//! table at most once per expiry period, so records nobody reads again are
//! still dropped.

use super::{
    Completion, RawRecord, Tracker, completion_fields, decode_envelope, scheduled_fields,
    status_field, status_key,
};
use crate::codec::{Codec, JsonCodec};
use crate::config::QueueConfig;
use crate::error::TasklibResult;
use crate::task::{Envelope, TaskId, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// In-memory tracker backend implementation
#[derive(Debug)]
pub struct InMemoryTracker {
    /// Queue and records, guarded together
    state: Mutex<StoreState>,
    /// Wakes blocked poppers when an envelope arrives
    arrivals: Notify,
    /// Prefix of the status record keys
    status_prefix: String,
    /// Record time-to-live
    expiry: Duration,
    codec: Arc<dyn Codec>,
}

#[derive(Debug, Default)]
struct StoreState {
    queue: VecDeque<Vec<u8>>,
    records: HashMap<String, StoredRecord>,
    /// Earliest instant the next full sweep may run
    next_sweep: Option<Instant>,
}

#[derive(Debug)]
struct StoredRecord {
    fields: RawRecord,
    expires_at: Instant,
}

impl StoreState {
    /// Live record at `key`, evicting it first if it has expired
    fn live_record(&mut self, key: &str, now: Instant) -> Option<&mut StoredRecord> {
        if self
            .records
            .get(key)
            .is_some_and(|record| record.expires_at <= now)
        {
            self.records.remove(key);
        }
        self.records.get_mut(key)
    }

    /// Drop every expired record, at most once per `expiry`
    fn sweep_expired(&mut self, now: Instant, expiry: Duration) {
        if self.next_sweep.is_some_and(|at| now < at) {
            return;
        }
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        self.next_sweep = Some(now + expiry);

        let evicted = before - self.records.len();
        if evicted > 0 {
            tracing::debug!("Evicted {} expired status records", evicted);
        }
    }

    /// Write `fields` into the record at `key` and reset its time-to-live
    fn write(
        &mut self,
        key: String,
        fields: Vec<(&'static str, Vec<u8>)>,
        now: Instant,
        expiry: Duration,
    ) {
        self.sweep_expired(now, expiry);
        let expires_at = now + expiry;
        if let Some(record) = self.live_record(&key, now) {
            record.expires_at = expires_at;
            for (name, value) in fields {
                record.fields.insert(name.to_string(), value);
            }
            return;
        }

        let fields = fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        self.records.insert(key, StoredRecord { fields, expires_at });
    }
}

impl InMemoryTracker {
    /// Create a new in-memory tracker
    pub fn new(config: &QueueConfig) -> Self {
        Self::with_codec(config, Arc::new(JsonCodec))
    }

    /// Create a new in-memory tracker with a custom codec
    pub fn with_codec(config: &QueueConfig, codec: Arc<dyn Codec>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            arrivals: Notify::new(),
            status_prefix: config.status_prefix.clone(),
            expiry: config.result_expiry(),
            codec,
        }
    }

    fn key_name(&self, task_id: &str) -> String {
        status_key(&self.status_prefix, task_id)
    }

    async fn pop_raw(&self) -> Option<Vec<u8>> {
        self.state.lock().await.queue.pop_front()
    }
}

impl Default for InMemoryTracker {
    fn default() -> Self {
        Self::new(&QueueConfig::default())
    }
}

#[async_trait]
impl Tracker for InMemoryTracker {
    fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    async fn schedule(&self, envelope: &Envelope) -> TasklibResult<()> {
        let (body, fields) = scheduled_fields(self.codec(), envelope, Utc::now())?;
        let key = self.key_name(&envelope.task_id);

        {
            let mut state = self.state.lock().await;
            state.queue.push_back(body);
            state.write(key, fields, Instant::now(), self.expiry);
        }
        self.arrivals.notify_one();

        tracing::debug!("Scheduled task: {} ({})", envelope.task_id, envelope.func_name);
        Ok(())
    }

    async fn mark_status(&self, task_id: &TaskId, new_status: TaskStatus) -> TasklibResult<()> {
        let value = status_field(self.codec(), new_status)?;
        let key = self.key_name(task_id);

        let mut state = self.state.lock().await;
        state.write(
            key,
            vec![(super::fields::STATUS, value)],
            Instant::now(),
            self.expiry,
        );

        tracing::debug!("{} changed status to {}", task_id, new_status);
        Ok(())
    }

    async fn complete(&self, task_id: &TaskId, completion: Completion) -> TasklibResult<()> {
        let fields = completion_fields(self.codec(), &completion)?;
        let key = self.key_name(task_id);

        let mut state = self.state.lock().await;
        state.write(key, fields, Instant::now(), self.expiry);

        tracing::debug!("Completed task {} with {}", task_id, completion.status);
        Ok(())
    }

    async fn pop(&self) -> TasklibResult<Option<Envelope>> {
        match self.pop_raw().await {
            Some(bytes) => Ok(Some(decode_envelope(self.codec(), &bytes)?)),
            None => Ok(None),
        }
    }

    async fn pop_blocking(&self, timeout: Duration) -> TasklibResult<Option<Envelope>> {
        let deadline = Instant::now() + timeout;

        loop {
            let arrival = self.arrivals.notified();
            if let Some(bytes) = self.pop_raw().await {
                return Ok(Some(decode_envelope(self.codec(), &bytes)?));
            }
            if tokio::time::timeout_at(deadline, arrival).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn pending(&self) -> TasklibResult<u64> {
        Ok(self.state.lock().await.queue.len() as u64)
    }

    async fn get_task_by_uuid(&self, task_id: &TaskId) -> TasklibResult<RawRecord> {
        let key = self.key_name(task_id);
        let mut state = self.state.lock().await;
        Ok(state
            .live_record(&key, Instant::now())
            .map(|record| record.fields.clone())
            .unwrap_or_default())
    }

    async fn purge(&self) -> TasklibResult<u64> {
        let mut state = self.state.lock().await;
        let prefix = format!("{}:", self.status_prefix);
        let before = state.records.len();
        state.records.retain(|key, _| !key.starts_with(&prefix));
        let purged = (before - state.records.len()) as u64 + state.queue.len() as u64;
        state.queue.clear();

        tracing::warn!("Purged {} entries from in-memory tracker", purged);
        Ok(purged)
    }

    async fn health_check(&self) -> TasklibResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::error::TasklibError;
    use crate::task::{Fault, Kwargs};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn tracker() -> InMemoryTracker {
        InMemoryTracker::new(&QueueConfig::default())
    }

    fn envelope(name: &str) -> Envelope {
        Envelope::new(name, args![1, 2], Kwargs::new())
    }

    #[tokio::test]
    async fn test_schedule_creates_init_record() {
        let tracker = tracker();
        let envelope = envelope("add");

        assert!(tracker.empty().await.unwrap());
        assert_ok!(tracker.schedule(&envelope).await);
        assert!(!tracker.empty().await.unwrap());

        let raw = tracker.get_task_by_uuid(&envelope.task_id).await.unwrap();
        let mut names: Vec<_> = raw.keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["body", "result", "status", "submitted"]);

        let record = tracker.get_record(&envelope.task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Init);
        assert_eq!(record.result, None);
        assert_eq!(record.body, envelope);
    }

    #[tokio::test]
    async fn test_pop_is_fifo() {
        let tracker = tracker();
        let first = envelope("first");
        let second = envelope("second");
        let third = envelope("third");
        for item in [&first, &second, &third] {
            tracker.schedule(item).await.unwrap();
        }

        assert_eq!(tracker.pending().await.unwrap(), 3);
        assert_eq!(tracker.pop().await.unwrap(), Some(first));
        assert_eq!(tracker.pop().await.unwrap(), Some(second));
        assert_eq!(tracker.pop().await.unwrap(), Some(third));
        assert_eq!(tracker.pop().await.unwrap(), None);
        assert!(tracker.empty().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_blocking_times_out() {
        let tracker = tracker();
        let started = Instant::now();
        let popped = tracker.pop_blocking(Duration::from_secs(5)).await.unwrap();
        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_pop_blocking_wakes_on_schedule() {
        let tracker = Arc::new(tracker());
        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.pop_blocking(Duration::from_secs(30)).await })
        };

        tokio::task::yield_now().await;
        let item = envelope("late");
        tracker.schedule(&item).await.unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped, Some(item));
        assert!(tracker.empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_each_envelope_delivered_once() {
        let tracker = Arc::new(tracker());
        for i in 0..50 {
            tracker.schedule(&envelope(&format!("job-{i}"))).await.unwrap();
        }

        let mut poppers = Vec::new();
        for _ in 0..4 {
            let tracker = Arc::clone(&tracker);
            poppers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = tracker.pop().await.unwrap() {
                    seen.push(item.task_id);
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for popper in poppers {
            all.extend(popper.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 50);
    }

    #[tokio::test]
    async fn test_mark_status_and_complete() {
        let tracker = tracker();
        let item = envelope("add");
        tracker.schedule(&item).await.unwrap();

        tracker
            .mark_status(&item.task_id, TaskStatus::Running)
            .await
            .unwrap();
        let record = tracker.get_record(&item.task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Running);

        tracker
            .complete(&item.task_id, Completion::success(json!(3)))
            .await
            .unwrap();
        let record = tracker.get_record(&item.task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Success);
        assert_eq!(record.result, Some(json!(3)));
        assert_eq!(record.excinfo, None);
    }

    #[tokio::test]
    async fn test_complete_with_error_keeps_result_empty() {
        let tracker = tracker();
        let item = envelope("explode");
        tracker.schedule(&item).await.unwrap();

        let fault = Fault::new("ValueError", "nope");
        tracker
            .complete(&item.task_id, Completion::error(fault.clone()))
            .await
            .unwrap();

        let record = tracker.get_record(&item.task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Error);
        assert_eq!(record.result, None);
        assert_eq!(record.excinfo, Some(fault));
    }

    #[tokio::test]
    async fn test_invalid_status_tag_leaves_record_untouched() {
        let tracker = tracker();
        let item = envelope("add");
        tracker.schedule(&item).await.unwrap();

        let err = assert_err!(tracker.mark_status_tag(&item.task_id, "FINISHED").await);
        assert!(matches!(err, TasklibError::InvalidStatus { .. }));

        let record = tracker.get_record(&item.task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Init);

        assert_ok!(tracker.mark_status_tag(&item.task_id, "RUNNING").await);
        let record = tracker.get_record(&item.task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_expire_without_mutation() {
        let config = QueueConfig::default().with_result_expiry(60);
        let tracker = InMemoryTracker::new(&config);
        let item = envelope("add");
        tracker.schedule(&item).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(tracker.get_record(&item.task_id).await.is_ok());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(tracker.get_task_by_uuid(&item.task_id).await.unwrap().is_empty());
        assert!(matches!(
            tracker.get_record(&item.task_id).await,
            Err(TasklibError::TaskNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_mutation_resets_ttl() {
        let config = QueueConfig::default().with_result_expiry(60);
        let tracker = InMemoryTracker::new(&config);
        let item = envelope("add");
        tracker.schedule(&item).await.unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        tracker
            .mark_status(&item.task_id, TaskStatus::Running)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        tracker
            .complete(&item.task_id, Completion::success(json!("ok")))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        let record = tracker.get_record(&item.task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Success);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(tracker.get_record(&item.task_id).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_expired_records_are_swept() {
        let config = QueueConfig::default().with_result_expiry(60);
        let tracker = InMemoryTracker::new(&config);
        for i in 0..1000 {
            tracker.schedule(&envelope(&format!("job-{i}"))).await.unwrap();
            tracker.pop().await.unwrap();
        }
        assert_eq!(tracker.state.lock().await.records.len(), 1000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        let last = envelope("last");
        tracker.schedule(&last).await.unwrap();

        let state = tracker.state.lock().await;
        assert_eq!(state.records.len(), 1);
        assert!(state.records.contains_key(&tracker.key_name(&last.task_id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_live_records() {
        let config = QueueConfig::default().with_result_expiry(60);
        let tracker = InMemoryTracker::new(&config);
        let old = envelope("old");
        tracker.schedule(&old).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        let fresh = envelope("fresh");
        tracker.schedule(&fresh).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        let newer = envelope("newer");
        tracker.schedule(&newer).await.unwrap();

        assert_eq!(tracker.state.lock().await.records.len(), 2);
        assert!(tracker.get_record(&fresh.task_id).await.is_ok());
        assert!(tracker.get_record(&newer.task_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_purge() {
        let tracker = tracker();
        tracker.schedule(&envelope("a")).await.unwrap();
        tracker.schedule(&envelope("b")).await.unwrap();

        assert_eq!(tracker.purge().await.unwrap(), 4);
        assert!(tracker.empty().await.unwrap());
        assert_ok!(tracker.health_check().await);
    }
}
