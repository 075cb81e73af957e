// src/transport/consumer.rs — Consumer-group worker loop

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::{LogRecord, PartitionedLog};
use crate::infra::errors::PipelineError;

/// What a handler did with one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Handled; the offset may be committed.
    Processed,
    /// Unusable record; commit past it and move on.
    Skipped(String),
    /// Transient failure; leave the offset and redeliver later.
    Retry(String),
}

#[async_trait]
pub trait RecordHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, record: &LogRecord) -> HandleOutcome;
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub group_id: String,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub retry_backoff: Duration,
}

/// Result of one poll-handle-commit pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub fetched: usize,
    pub processed: usize,
    pub skipped: usize,
    pub retry: Option<String>,
}

/// Partitions owned by worker `index` out of `workers`.
pub fn assign_partitions(partitions: u32, workers: u32, index: u32) -> Vec<u32> {
    let workers = workers.max(1);
    (0..partitions).filter(|p| p % workers == index).collect()
}

/// Drives one handler over a fixed set of partitions for one consumer group.
pub struct ConsumerWorker {
    log: Arc<dyn PartitionedLog>,
    handler: Arc<dyn RecordHandler>,
    settings: ConsumerSettings,
    partitions: Vec<u32>,
    /// Index of the partition polled first on the next pass.
    next_start: AtomicUsize,
}

impl ConsumerWorker {
    pub fn new(
        log: Arc<dyn PartitionedLog>,
        handler: Arc<dyn RecordHandler>,
        settings: ConsumerSettings,
        partitions: Vec<u32>,
    ) -> Self {
        Self {
            log,
            handler,
            settings,
            partitions,
            next_start: AtomicUsize::new(0),
        }
    }

    pub fn partitions(&self) -> &[u32] {
        &self.partitions
    }

    /// Owned partitions, rotated one step per call so that no partition is
    /// always last in line for the batch.
    fn poll_order(&self) -> Vec<u32> {
        if self.partitions.is_empty() {
            return Vec::new();
        }
        let start = self.next_start.fetch_add(1, Ordering::Relaxed) % self.partitions.len();
        let mut order = self.partitions[start..].to_vec();
        order.extend_from_slice(&self.partitions[..start]);
        order
    }

    /// Poll, hand each record to the handler, then commit per partition.
    ///
    /// A record answered with `Retry` stops its partition for this pass: the
    /// offset stays at that record so it is delivered again.
    pub async fn poll_once(&self) -> Result<BatchSummary, PipelineError> {
        let records = self
            .log
            .poll(&self.settings.group_id, &self.poll_order(), self.settings.batch_size)
            .await?;

        let mut summary = BatchSummary {
            fetched: records.len(),
            ..BatchSummary::default()
        };
        let mut next_offsets: BTreeMap<u32, u64> = BTreeMap::new();
        let mut blocked: BTreeSet<u32> = BTreeSet::new();

        for record in &records {
            if blocked.contains(&record.partition) {
                continue;
            }
            match self.handler.handle(record).await {
                HandleOutcome::Processed => {
                    summary.processed += 1;
                    next_offsets.insert(record.partition, record.offset + 1);
                }
                HandleOutcome::Skipped(reason) => {
                    tracing::warn!(
                        "[{}] skipping record {}@{}: {}",
                        self.handler.name(),
                        record.partition,
                        record.offset,
                        reason
                    );
                    summary.skipped += 1;
                    next_offsets.insert(record.partition, record.offset + 1);
                }
                HandleOutcome::Retry(reason) => {
                    tracing::warn!(
                        "[{}] record {}@{} will be redelivered: {}",
                        self.handler.name(),
                        record.partition,
                        record.offset,
                        reason
                    );
                    blocked.insert(record.partition);
                    summary.retry = Some(reason);
                }
            }
        }

        for (partition, next) in next_offsets {
            self.log
                .commit(&self.settings.group_id, partition, next)
                .await?;
        }

        Ok(summary)
    }

    /// Consume until shutdown is signalled. Errors are logged and never end
    /// the loop.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            "[{}] consumer started (group {}, partitions {:?})",
            self.handler.name(),
            self.settings.group_id,
            self.partitions
        );

        loop {
            let pause = match self.poll_once().await {
                Ok(summary) if summary.retry.is_some() => Some(self.settings.retry_backoff),
                Ok(summary) if summary.fetched >= self.settings.batch_size => None,
                Ok(_) => Some(self.settings.poll_interval),
                Err(e) => {
                    tracing::warn!("[{}] poll failed: {}", self.handler.name(), e);
                    Some(self.settings.retry_backoff)
                }
            };

            match pause {
                // A full batch means there is likely more; go again unless stopping.
                None => match shutdown.try_recv() {
                    Err(broadcast::error::TryRecvError::Empty) => continue,
                    _ => break,
                },
                Some(pause) => {
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => break,
                        _ = self.log.wait_for_records(pause) => {}
                    }
                }
            }
        }

        tracing::info!("[{}] consumer stopped", self.handler.name());
    }
}
