// src/aggregator/aggregate.rs — Per-session running aggregate and fold

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::metrics::{self, SessionMetrics};
use crate::model::event::CodeEvent;

/// Running statistics for one session between two flushes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAggregate {
    pub session_id: String,
    pub first_event_time: Option<i64>,
    pub last_event_time: Option<i64>,
    pub total_events: u64,
    pub total_lines: u64,
    pub files_modified: BTreeSet<String>,
    pub lines_per_file: BTreeMap<String, u64>,
    pub events_by_source: BTreeMap<String, u64>,
    /// Client timestamps in consumption order; only used for gap statistics.
    #[serde(skip)]
    pub event_timestamps: Vec<i64>,
}

impl SessionAggregate {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            ..Self::default()
        }
    }

    /// Incorporate one event.
    pub fn fold(&mut self, event: &CodeEvent) {
        let ts = event.client_timestamp_ms;

        self.total_events = self.total_events.saturating_add(1);
        self.first_event_time = Some(self.first_event_time.map_or(ts, |t| t.min(ts)));
        self.last_event_time = Some(self.last_event_time.map_or(ts, |t| t.max(ts)));
        self.event_timestamps.push(ts);

        if let Some(file) = event.file_name() {
            if !self.files_modified.contains(file) {
                self.files_modified.insert(file.to_string());
            }
            bump(&mut self.lines_per_file, file);
            self.total_lines = self.total_lines.saturating_add(1);
        }

        if let Some(ref source) = event.source {
            bump(&mut self.events_by_source, source.as_str());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_events == 0
    }

    /// Derive duration, rates, gap average and the most edited file.
    pub fn metrics(&self) -> SessionMetrics {
        let (duration_seconds, lines_per_minute, events_per_minute) =
            match (self.first_event_time, self.last_event_time) {
                (Some(first), Some(last)) => {
                    let raw = metrics::raw_duration_seconds(first, last);
                    (
                        metrics::duration_seconds(first, last),
                        metrics::per_minute(self.total_lines, raw),
                        metrics::per_minute(self.total_events, raw),
                    )
                }
                _ => (0, None, None),
            };

        let (gap_total, gap_count) = self.gap_totals();
        let most = metrics::most_edited(&self.lines_per_file);

        SessionMetrics {
            duration_seconds,
            lines_per_minute,
            events_per_minute,
            average_inter_event_gap_ms: metrics::average_gap(gap_total, gap_count),
            most_edited_file: most.as_ref().map(|(f, _)| f.clone()),
            most_edited_file_lines: most.map(|(_, n)| n),
        }
    }

    pub fn gap_totals(&self) -> (i64, u64) {
        metrics::gap_totals(&self.event_timestamps)
    }
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
    match map.get_mut(key) {
        Some(count) => *count = count.saturating_add(1),
        None => {
            map.insert(key.to_string(), 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::Source;

    fn event(ts: i64, file: Option<&str>, source: Option<Source>) -> CodeEvent {
        CodeEvent {
            session_id: "S".into(),
            client_timestamp_ms: ts,
            file_uri: format!("file:///{}", file.unwrap_or("none")),
            file_name: file.map(String::from),
            line_number: 1,
            text_normalized: "x".into(),
            source,
            server_timestamp_ms: None,
        }
    }

    #[test]
    fn test_reference_session() {
        let mut agg = SessionAggregate::new("S");
        for ts in [1_000, 4_000, 7_000] {
            agg.fold(&event(ts, Some("A.java"), Some(Source::Manual)));
        }
        assert_eq!(agg.total_events, 3);
        assert_eq!(agg.total_lines, 3);

        let m = agg.metrics();
        assert_eq!(m.duration_seconds, 6);
        assert_eq!(m.lines_per_minute, Some(30.0));
        assert_eq!(m.events_per_minute, Some(30.0));
        assert_eq!(m.average_inter_event_gap_ms, Some(3_000.0));
        assert_eq!(m.most_edited_file.as_deref(), Some("A.java"));
        assert_eq!(m.most_edited_file_lines, Some(3));
    }

    #[test]
    fn test_missing_file_name_counts_event_not_line() {
        let mut agg = SessionAggregate::new("S");
        agg.fold(&event(1, Some("a.rs"), None));
        agg.fold(&event(2, None, None));
        agg.fold(&event(3, Some(""), None));
        assert_eq!(agg.total_events, 3);
        assert_eq!(agg.total_lines, 1);
        assert_eq!(agg.files_modified.len(), 1);
        assert_eq!(agg.lines_per_file.values().sum::<u64>(), agg.total_lines);
        assert!(agg.events_by_source.is_empty());
    }

    #[test]
    fn test_bounds_are_min_max_not_arrival_order() {
        let mut agg = SessionAggregate::new("S");
        agg.fold(&event(5_000, None, None));
        agg.fold(&event(2_000, None, None));
        agg.fold(&event(9_000, None, None));
        assert_eq!(agg.first_event_time, Some(2_000));
        assert_eq!(agg.last_event_time, Some(9_000));
        assert_eq!(agg.event_timestamps, vec![5_000, 2_000, 9_000]);
    }

    #[test]
    fn test_events_by_source_sums_to_total() {
        let mut agg = SessionAggregate::new("S");
        agg.fold(&event(1, Some("a"), Some(Source::Manual)));
        agg.fold(&event(2, Some("a"), Some(Source::Agent)));
        agg.fold(&event(3, Some("b"), Some(Source::Other("jmeter".into()))));
        agg.fold(&event(4, Some("b"), Some(Source::Manual)));
        assert_eq!(agg.events_by_source.values().sum::<u64>(), agg.total_events);
        assert_eq!(agg.events_by_source["manual"], 2);
        assert_eq!(agg.events_by_source["jmeter"], 1);
    }

    #[test]
    fn test_single_event_has_no_rates_or_gap() {
        let mut agg = SessionAggregate::new("S");
        agg.fold(&event(1_500, Some("a"), None));
        let m = agg.metrics();
        assert_eq!(m.duration_seconds, 1);
        assert!(m.lines_per_minute.is_none());
        assert!(m.events_per_minute.is_none());
        assert!(m.average_inter_event_gap_ms.is_none());
    }

    #[test]
    fn test_empty_aggregate_metrics() {
        let agg = SessionAggregate::new("S");
        assert!(agg.is_empty());
        let m = agg.metrics();
        assert_eq!(m.duration_seconds, 0);
        assert!(m.most_edited_file.is_none());
    }
}
