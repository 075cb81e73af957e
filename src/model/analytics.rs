// src/model/analytics.rs — Durable per-session analytics and the merge policy
//
// A session spans many flush cycles. Each cycle produces a partial record from
// one in-memory aggregate; the store merges it into whatever is already
// persisted. Counts add, sets union, maps sum per key, start is fixed at first
// write, end only moves forward, and every derived figure is recomputed from
// the merged totals (rates are not additive).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::aggregator::aggregate::SessionAggregate;
use crate::aggregator::metrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalytics {
    pub session_id: String,

    pub session_start_ms: i64,
    pub session_end_ms: i64,
    pub last_updated: DateTime<Utc>,
    pub duration_seconds: i64,

    pub total_events: u64,
    pub total_lines: u64,

    pub files_modified: BTreeSet<String>,
    pub unique_files_count: u64,

    pub lines_per_minute: Option<f64>,
    pub events_per_minute: Option<f64>,
    pub average_inter_event_gap_ms: Option<f64>,

    pub lines_per_file: BTreeMap<String, u64>,
    pub most_edited_file: Option<String>,
    pub most_edited_file_lines: Option<u64>,

    pub events_by_source: BTreeMap<String, u64>,

    // Gap accumulators: keep the average exact across flush cycles.
    pub inter_event_gap_total_ms: i64,
    pub inter_event_gap_count: u64,
    pub first_observed_ms: i64,
    pub last_observed_ms: i64,
}

/// What a merge-upsert did to the durable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Merged,
}

impl SessionAnalytics {
    /// Build the partial record for one flushed aggregate. `None` when the
    /// aggregate never saw an event.
    pub fn from_aggregate(agg: &SessionAggregate, now: DateTime<Utc>) -> Option<Self> {
        let (start, end) = (agg.first_event_time?, agg.last_event_time?);
        let (gap_total, gap_count) = agg.gap_totals();
        let first_observed = agg.event_timestamps.first().copied().unwrap_or(start);
        let last_observed = agg.event_timestamps.last().copied().unwrap_or(end);

        let mut analytics = Self {
            session_id: agg.session_id.clone(),
            session_start_ms: start,
            session_end_ms: end,
            last_updated: now,
            duration_seconds: 0,
            total_events: agg.total_events,
            total_lines: agg.total_lines,
            files_modified: agg.files_modified.clone(),
            unique_files_count: 0,
            lines_per_minute: None,
            events_per_minute: None,
            average_inter_event_gap_ms: None,
            lines_per_file: agg.lines_per_file.clone(),
            most_edited_file: None,
            most_edited_file_lines: None,
            events_by_source: agg.events_by_source.clone(),
            inter_event_gap_total_ms: gap_total,
            inter_event_gap_count: gap_count,
            first_observed_ms: first_observed,
            last_observed_ms: last_observed,
        };
        analytics.recompute();
        Some(analytics)
    }

    /// Merge a newer partial into this persisted record.
    pub fn absorb(&mut self, newer: &SessionAnalytics, now: DateTime<Utc>) {
        self.session_end_ms = self.session_end_ms.max(newer.session_end_ms);
        self.last_updated = now;

        self.total_events = self.total_events.saturating_add(newer.total_events);
        self.total_lines = self.total_lines.saturating_add(newer.total_lines);

        self.files_modified
            .extend(newer.files_modified.iter().cloned());
        sum_into(&mut self.lines_per_file, &newer.lines_per_file);
        sum_into(&mut self.events_by_source, &newer.events_by_source);

        // The step from our last observed event to the partial's first one is
        // a gap neither side counted on its own.
        let bridge = newer.first_observed_ms.saturating_sub(self.last_observed_ms);
        self.inter_event_gap_total_ms = self
            .inter_event_gap_total_ms
            .saturating_add(bridge)
            .saturating_add(newer.inter_event_gap_total_ms);
        self.inter_event_gap_count = self
            .inter_event_gap_count
            .saturating_add(1)
            .saturating_add(newer.inter_event_gap_count);
        self.last_observed_ms = newer.last_observed_ms;

        self.recompute();
    }

    /// Refresh every derived field from the stored totals and bounds.
    fn recompute(&mut self) {
        let raw = metrics::raw_duration_seconds(self.session_start_ms, self.session_end_ms);
        self.duration_seconds = metrics::duration_seconds(self.session_start_ms, self.session_end_ms);
        self.lines_per_minute = metrics::per_minute(self.total_lines, raw);
        self.events_per_minute = metrics::per_minute(self.total_events, raw);
        self.average_inter_event_gap_ms =
            metrics::average_gap(self.inter_event_gap_total_ms, self.inter_event_gap_count);
        self.unique_files_count = self.files_modified.len() as u64;

        match metrics::most_edited(&self.lines_per_file) {
            Some((file, lines)) => {
                self.most_edited_file = Some(file);
                self.most_edited_file_lines = Some(lines);
            }
            None => {
                self.most_edited_file = None;
                self.most_edited_file_lines = None;
            }
        }
    }
}

fn sum_into(into: &mut BTreeMap<String, u64>, from: &BTreeMap<String, u64>) {
    for (key, count) in from {
        let slot = into.entry(key.clone()).or_insert(0);
        *slot = slot.saturating_add(*count);
    }
}
