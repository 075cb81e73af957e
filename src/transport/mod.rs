// src/transport/mod.rs — Durable partitioned log abstraction

pub mod consumer;
pub mod log;

pub use consumer::{assign_partitions, ConsumerSettings, ConsumerWorker, HandleOutcome, RecordHandler};
pub use log::SqliteLog;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::infra::errors::PipelineError;

/// One entry of a partition, as handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: String,
    pub appended_at_ms: i64,
}

/// Where an appended record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordPosition {
    pub partition: u32,
    pub offset: u64,
}

/// How far a consumer group trails the end of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionLag {
    pub partition: u32,
    pub committed: u64,
    pub end: u64,
    pub lag: u64,
}

/// Append-only, partitioned, replayable log with per-group offsets.
///
/// Records sharing a key always land on the same partition and are handed
/// out in append order within it.
#[async_trait]
pub trait PartitionedLog: Send + Sync {
    fn topic(&self) -> &str;

    fn partitions(&self) -> u32;

    async fn append(&self, key: &str, payload: String) -> Result<RecordPosition, PipelineError>;

    /// Records past the group's committed offsets on the given partitions.
    async fn poll(
        &self,
        group: &str,
        partitions: &[u32],
        max: usize,
    ) -> Result<Vec<LogRecord>, PipelineError>;

    /// Mark everything below `next_offset` on `partition` as handled.
    async fn commit(&self, group: &str, partition: u32, next_offset: u64) -> Result<(), PipelineError>;

    async fn committed(&self, group: &str, partition: u32) -> Result<u64, PipelineError>;

    async fn end_offset(&self, partition: u32) -> Result<u64, PipelineError>;

    /// Park until new records may be available or `timeout` elapses.
    async fn wait_for_records(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}

/// Stable partition for a key: SHA-256 of the key, first eight bytes, modulo
/// the partition count.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % u64::from(partitions)) as u32
}

/// Per-partition lag of a consumer group.
pub async fn consumer_lag(
    log: &dyn PartitionedLog,
    group: &str,
) -> Result<Vec<PartitionLag>, PipelineError> {
    let mut lags = Vec::with_capacity(log.partitions() as usize);
    for partition in 0..log.partitions() {
        let committed = log.committed(group, partition).await?;
        let end = log.end_offset(partition).await?;
        lags.push(PartitionLag {
            partition,
            committed,
            end,
            lag: end.saturating_sub(committed),
        });
    }
    Ok(lags)
}
