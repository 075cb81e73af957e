// src/transport/log.rs — SQLite-backed partitioned log

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use super::{partition_for, LogRecord, PartitionedLog, RecordPosition};
use crate::infra::errors::PipelineError;
use crate::storage::StoreHandle;

/// A log topic stored in the `log_records` table, reached through the store
/// actor. Appends wake consumers parked in `wait_for_records`.
#[derive(Clone)]
pub struct SqliteLog {
    store: StoreHandle,
    topic: String,
    partitions: u32,
    notify: Arc<Notify>,
}

impl SqliteLog {
    pub fn new(store: StoreHandle, topic: impl Into<String>, partitions: u32) -> Self {
        Self {
            store,
            topic: topic.into(),
            partitions: partitions.max(1),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl PartitionedLog for SqliteLog {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn append(&self, key: &str, payload: String) -> Result<RecordPosition, PipelineError> {
        let partition = partition_for(key, self.partitions);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let offset = self
            .store
            .append_record(self.topic.clone(), partition, key.to_string(), payload, now_ms)
            .await?;

        tracing::debug!("Appended {}[{}]@{} key={}", self.topic, partition, offset, key);
        self.notify.notify_waiters();
        Ok(RecordPosition { partition, offset })
    }

    async fn poll(
        &self,
        group: &str,
        partitions: &[u32],
        max: usize,
    ) -> Result<Vec<LogRecord>, PipelineError> {
        Ok(self
            .store
            .poll_records(group.to_string(), self.topic.clone(), partitions.to_vec(), max)
            .await?)
    }

    async fn commit(&self, group: &str, partition: u32, next_offset: u64) -> Result<(), PipelineError> {
        Ok(self
            .store
            .commit_offset(group.to_string(), self.topic.clone(), partition, next_offset)
            .await?)
    }

    async fn committed(&self, group: &str, partition: u32) -> Result<u64, PipelineError> {
        Ok(self
            .store
            .committed_offset(group.to_string(), self.topic.clone(), partition)
            .await?)
    }

    async fn end_offset(&self, partition: u32) -> Result<u64, PipelineError> {
        Ok(self.store.end_offset(self.topic.clone(), partition).await?)
    }

    async fn wait_for_records(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{self, spawn_store_server};
    use crate::transport::consumer_lag;

    fn test_log(partitions: u32) -> SqliteLog {
        let (handle, _join) = spawn_store_server(storage::in_memory().unwrap());
        SqliteLog::new(handle, "code_events", partitions)
    }

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let log = test_log(4);
        let mut positions = Vec::new();
        for i in 0..5 {
            positions.push(log.append("sess-a", format!("{{\"n\":{i}}}")).await.unwrap());
        }
        let partition = positions[0].partition;
        assert!(positions.iter().all(|p| p.partition == partition));
        let offsets: Vec<u64> = positions.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);

        let records = log.poll("g", &[partition], 10).await.unwrap();
        let payloads: Vec<&str> = records.iter().map(|r| r.payload.as_str()).collect();
        assert_eq!(
            payloads,
            vec!["{\"n\":0}", "{\"n\":1}", "{\"n\":2}", "{\"n\":3}", "{\"n\":4}"]
        );
    }

    #[tokio::test]
    async fn test_groups_track_offsets_independently() {
        let log = test_log(1);
        for i in 0..3 {
            log.append("k", format!("{i}")).await.unwrap();
        }

        log.commit("fast", 0, 3).await.unwrap();
        assert!(log.poll("fast", &[0], 10).await.unwrap().is_empty());
        assert_eq!(log.poll("slow", &[0], 10).await.unwrap().len(), 3);

        log.commit("slow", 0, 1).await.unwrap();
        let slow = log.poll("slow", &[0], 10).await.unwrap();
        assert_eq!(slow[0].offset, 1);
    }

    #[tokio::test]
    async fn test_commit_never_moves_backwards() {
        let log = test_log(1);
        log.commit("g", 0, 5).await.unwrap();
        log.commit("g", 0, 2).await.unwrap();
        assert_eq!(log.committed("g", 0).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_consumer_lag() {
        let log = test_log(1);
        for _ in 0..4 {
            log.append("k", "{}".into()).await.unwrap();
        }
        log.commit("g", 0, 1).await.unwrap();
        let lag = consumer_lag(&log, "g").await.unwrap();
        assert_eq!(lag.len(), 1);
        assert_eq!(lag[0].end, 4);
        assert_eq!(lag[0].lag, 3);
    }

    #[tokio::test]
    async fn test_append_wakes_waiter() {
        let log = test_log(1);
        let waiter = {
            let log = log.clone();
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                log.wait_for_records(Duration::from_secs(10)).await;
                started.elapsed()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        log.append("k", "{}".into()).await.unwrap();
        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(5));
    }
}
