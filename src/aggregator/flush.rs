// src/aggregator/flush.rs — Scheduled snapshot and merge-upsert

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use super::aggregate::SessionAggregate;
use super::stats::AggregatorStats;
use super::working_set::SessionWorkingSet;
use crate::infra::errors::PipelineError;
use crate::model::{SessionAnalytics, UpsertOutcome};
use crate::storage::StoreHandle;

/// Durable per-session analytics, keyed uniquely by session id.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Insert the partial, or merge it into the existing record.
    async fn merge_upsert(&self, partial: SessionAnalytics) -> Result<UpsertOutcome, PipelineError>;

    async fn get(&self, session_id: &str) -> Result<Option<SessionAnalytics>, PipelineError>;

    async fn list(&self, limit: u32) -> Result<Vec<SessionAnalytics>, PipelineError>;
}

#[async_trait]
impl AggregateStore for StoreHandle {
    async fn merge_upsert(&self, partial: SessionAnalytics) -> Result<UpsertOutcome, PipelineError> {
        Ok(self.merge_session_analytics(partial, Utc::now()).await?)
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionAnalytics>, PipelineError> {
        Ok(self.get_session_analytics(session_id.to_string()).await?)
    }

    async fn list(&self, limit: u32) -> Result<Vec<SessionAnalytics>, PipelineError> {
        Ok(self.list_session_analytics(limit).await?)
    }
}

/// Result of merging one captured session.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Inserted,
    Merged,
    /// Aggregate held no events; nothing was written.
    Empty,
    Failed(String),
    /// The deadline passed before the store answered. The store may still
    /// have committed the merge, so this is not counted as a failure.
    TimedOut(String),
}

/// Summary of one flush cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub captured: usize,
    pub inserted: usize,
    pub merged: usize,
    pub failed: usize,
    /// (session id, reason) for each failed merge.
    pub failures: Vec<(String, String)>,
    /// Sessions whose merge outcome is unknown because the deadline passed.
    pub timed_out: Vec<String>,
    pub elapsed_ms: u64,
}

impl FlushReport {
    fn start(cycle: u64) -> Self {
        Self {
            cycle,
            started_at: Utc::now(),
            captured: 0,
            inserted: 0,
            merged: 0,
            failed: 0,
            failures: Vec::new(),
            timed_out: Vec::new(),
            elapsed_ms: 0,
        }
    }
}

/// Moves the working set into the aggregate store, one cycle at a time.
pub struct Flusher {
    working_set: Arc<SessionWorkingSet>,
    store: Arc<dyn AggregateStore>,
    stats: Arc<AggregatorStats>,
    merge_timeout: Option<Duration>,
    cycles: AtomicU64,
}

impl Flusher {
    pub fn new(
        working_set: Arc<SessionWorkingSet>,
        store: Arc<dyn AggregateStore>,
        stats: Arc<AggregatorStats>,
        merge_timeout: Option<Duration>,
    ) -> Self {
        Self {
            working_set,
            store,
            stats,
            merge_timeout,
            cycles: AtomicU64::new(0),
        }
    }

    /// Snapshot the working set and merge every captured session, in order.
    /// A failing session is logged and counted; the rest still go through.
    pub async fn flush_cycle(&self) -> FlushReport {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        let mut report = FlushReport::start(cycle);

        let captured = self.working_set.snapshot_and_clear();
        report.captured = captured.len();

        if captured.is_empty() {
            tracing::debug!("Flush #{}: no active sessions", cycle);
        }

        for aggregate in &captured {
            match self.merge_one(aggregate).await {
                MergeOutcome::Inserted => report.inserted += 1,
                MergeOutcome::Merged => report.merged += 1,
                MergeOutcome::Empty => {}
                MergeOutcome::Failed(reason) => {
                    tracing::error!(
                        "Flush #{}: merge failed for session {}: {}",
                        cycle,
                        aggregate.session_id,
                        reason
                    );
                    report.failed += 1;
                    report.failures.push((aggregate.session_id.clone(), reason));
                }
                MergeOutcome::TimedOut(reason) => {
                    tracing::warn!(
                        "Flush #{}: outcome unknown for session {}: {}",
                        cycle,
                        aggregate.session_id,
                        reason
                    );
                    report.timed_out.push(aggregate.session_id.clone());
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        if report.captured > 0 {
            tracing::info!(
                "Flush #{}: {} sessions ({} inserted, {} merged, {} failed, {} timed out) in {}ms",
                cycle,
                report.captured,
                report.inserted,
                report.merged,
                report.failed,
                report.timed_out.len(),
                report.elapsed_ms
            );
        }
        self.stats.record_flush(&report);
        report
    }

    async fn merge_one(&self, aggregate: &SessionAggregate) -> MergeOutcome {
        let Some(partial) = SessionAnalytics::from_aggregate(aggregate, Utc::now()) else {
            return MergeOutcome::Empty;
        };

        let call = self.store.merge_upsert(partial);
        let result = match self.merge_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout {
                    session_id: aggregate.session_id.clone(),
                    secs: limit.as_secs(),
                }),
            },
            None => call.await,
        };

        match result {
            Ok(UpsertOutcome::Inserted) => MergeOutcome::Inserted,
            Ok(UpsertOutcome::Merged) => MergeOutcome::Merged,
            Err(e @ PipelineError::Timeout { .. }) => MergeOutcome::TimedOut(e.to_string()),
            Err(e) => MergeOutcome::Failed(e.to_string()),
        }
    }

    /// Flush on a fixed period until shutdown. The final flush on shutdown is
    /// the caller's job, once consumers have stopped folding.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the first immediate tick
        ticker.tick().await;

        tracing::info!("Flush worker started ({}s interval)", period.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_cycle().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Flush worker stopping");
                    break;
                }
            }
        }
    }
}
