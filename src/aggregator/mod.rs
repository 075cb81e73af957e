// src/aggregator/mod.rs — Session aggregation: working set, flush, stats

pub mod aggregate;
pub mod consumer;
pub mod flush;
pub mod metrics;
pub mod stats;
pub mod working_set;

pub use aggregate::SessionAggregate;
pub use consumer::AggregationHandler;
pub use flush::{AggregateStore, FlushReport, Flusher, MergeOutcome};
pub use stats::{AggregatorStats, AggregatorStatsSnapshot};
pub use working_set::SessionWorkingSet;

use std::sync::Arc;
use std::time::Duration;

/// The shared pieces of the aggregation consumer, wired together.
#[derive(Clone)]
pub struct Aggregator {
    working_set: Arc<SessionWorkingSet>,
    stats: Arc<AggregatorStats>,
    flusher: Arc<Flusher>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn AggregateStore>, merge_timeout: Option<Duration>) -> Self {
        let working_set = Arc::new(SessionWorkingSet::new());
        let stats = Arc::new(AggregatorStats::new());
        let flusher = Arc::new(Flusher::new(
            working_set.clone(),
            store,
            stats.clone(),
            merge_timeout,
        ));
        Self {
            working_set,
            stats,
            flusher,
        }
    }

    /// A record handler folding into this aggregator's working set.
    pub fn handler(&self) -> Arc<AggregationHandler> {
        Arc::new(AggregationHandler::new(
            self.working_set.clone(),
            self.stats.clone(),
        ))
    }

    pub fn flusher(&self) -> Arc<Flusher> {
        self.flusher.clone()
    }

    pub fn working_set(&self) -> &Arc<SessionWorkingSet> {
        &self.working_set
    }

    pub fn peek(&self) -> Vec<SessionAggregate> {
        self.working_set.peek()
    }

    pub fn stats(&self) -> AggregatorStatsSnapshot {
        self.stats.snapshot(self.working_set.len())
    }
}
