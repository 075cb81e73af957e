// src/aggregator/consumer.rs — Aggregation consumer: decode and fold

use async_trait::async_trait;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::stats::AggregatorStats;
use super::working_set::SessionWorkingSet;
use crate::model::CodeEvent;
use crate::transport::{HandleOutcome, LogRecord, RecordHandler};

/// Folds each record into the working set. Never asks for redelivery:
/// bad records and failed folds are logged and skipped.
pub struct AggregationHandler {
    working_set: Arc<SessionWorkingSet>,
    stats: Arc<AggregatorStats>,
}

impl AggregationHandler {
    pub fn new(working_set: Arc<SessionWorkingSet>, stats: Arc<AggregatorStats>) -> Self {
        Self { working_set, stats }
    }
}

#[async_trait]
impl RecordHandler for AggregationHandler {
    fn name(&self) -> &str {
        "aggregation"
    }

    async fn handle(&self, record: &LogRecord) -> HandleOutcome {
        let event = match CodeEvent::from_json(&record.payload) {
            Ok(event) => event,
            Err(e) => {
                self.stats.record_skipped();
                return HandleOutcome::Skipped(e.to_string());
            }
        };

        match catch_unwind(AssertUnwindSafe(|| self.working_set.fold(&event))) {
            Ok(Ok(())) => {
                self.stats.record_folded();
                tracing::debug!(
                    "Folded {}@{} into session {}",
                    record.partition,
                    record.offset,
                    event.session_id
                );
                HandleOutcome::Processed
            }
            Ok(Err(e)) => {
                self.stats.record_skipped();
                HandleOutcome::Skipped(e.to_string())
            }
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                tracing::error!(
                    "Fold panicked for session {}: {}",
                    event.session_id,
                    msg
                );
                self.stats.record_fold_panic();
                HandleOutcome::Skipped(format!("fold panicked: {msg}"))
            }
        }
    }
}
