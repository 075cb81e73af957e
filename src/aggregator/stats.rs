// src/aggregator/stats.rs — Cumulative aggregator counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::flush::FlushReport;

#[derive(Debug, Default)]
pub struct AggregatorStats {
    records_folded: AtomicU64,
    records_skipped: AtomicU64,
    fold_panics: AtomicU64,
    flush_cycles: AtomicU64,
    sessions_inserted: AtomicU64,
    sessions_merged: AtomicU64,
    merge_failures: AtomicU64,
    merge_timeouts: AtomicU64,
    last_flush: Mutex<Option<FlushReport>>,
}

/// Point-in-time copy of the counters, for observability endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStatsSnapshot {
    pub records_folded: u64,
    pub records_skipped: u64,
    pub fold_panics: u64,
    pub flush_cycles: u64,
    pub sessions_inserted: u64,
    pub sessions_merged: u64,
    pub merge_failures: u64,
    /// Merges abandoned at the deadline; the store may still have applied them.
    pub merge_timeouts: u64,
    pub active_sessions: usize,
    pub last_flush: Option<FlushReport>,
}

impl AggregatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_folded(&self) {
        self.records_folded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fold_panic(&self) {
        self.fold_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a finished cycle into the totals and keep it as the latest report.
    pub fn record_flush(&self, report: &FlushReport) {
        self.flush_cycles.fetch_add(1, Ordering::Relaxed);
        self.sessions_inserted
            .fetch_add(report.inserted as u64, Ordering::Relaxed);
        self.sessions_merged
            .fetch_add(report.merged as u64, Ordering::Relaxed);
        self.merge_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.merge_timeouts
            .fetch_add(report.timed_out.len() as u64, Ordering::Relaxed);
        *self.last_flush.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
    }

    pub fn snapshot(&self, active_sessions: usize) -> AggregatorStatsSnapshot {
        AggregatorStatsSnapshot {
            records_folded: self.records_folded.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            fold_panics: self.fold_panics.load(Ordering::Relaxed),
            flush_cycles: self.flush_cycles.load(Ordering::Relaxed),
            sessions_inserted: self.sessions_inserted.load(Ordering::Relaxed),
            sessions_merged: self.sessions_merged.load(Ordering::Relaxed),
            merge_failures: self.merge_failures.load(Ordering::Relaxed),
            merge_timeouts: self.merge_timeouts.load(Ordering::Relaxed),
            active_sessions,
            last_flush: self
                .last_flush
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_record_flush_accumulates() {
        let stats = AggregatorStats::new();
        stats.record_folded();
        stats.record_folded();
        stats.record_skipped();

        let report = FlushReport {
            cycle: 1,
            started_at: Utc::now(),
            captured: 3,
            inserted: 2,
            merged: 0,
            failed: 1,
            failures: vec![("s3".into(), "store down".into())],
            timed_out: vec!["s4".into()],
            elapsed_ms: 4,
        };
        stats.record_flush(&report);
        stats.record_flush(&FlushReport {
            cycle: 2,
            merged: 2,
            inserted: 0,
            failed: 0,
            failures: Vec::new(),
            timed_out: Vec::new(),
            ..report.clone()
        });

        let snap = stats.snapshot(7);
        assert_eq!(snap.records_folded, 2);
        assert_eq!(snap.records_skipped, 1);
        assert_eq!(snap.flush_cycles, 2);
        assert_eq!(snap.sessions_inserted, 2);
        assert_eq!(snap.sessions_merged, 2);
        assert_eq!(snap.merge_failures, 1);
        assert_eq!(snap.merge_timeouts, 1);
        assert_eq!(snap.active_sessions, 7);
        assert_eq!(snap.last_flush.unwrap().cycle, 2);
    }
}
