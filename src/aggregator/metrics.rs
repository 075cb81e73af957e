// src/aggregator/metrics.rs — Derived session metrics
//
// Shared by the in-memory aggregate and the persisted merge so both compute
// durations, rates and the most edited file the same way.

use serde::Serialize;
use std::collections::BTreeMap;

/// Metrics derived from a completed aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub duration_seconds: i64,
    pub lines_per_minute: Option<f64>,
    pub events_per_minute: Option<f64>,
    pub average_inter_event_gap_ms: Option<f64>,
    pub most_edited_file: Option<String>,
    pub most_edited_file_lines: Option<u64>,
}

/// Whole seconds between two millisecond timestamps, on epoch-second
/// boundaries (floor), before clamping.
pub fn raw_duration_seconds(start_ms: i64, end_ms: i64) -> i64 {
    end_ms.div_euclid(1000) - start_ms.div_euclid(1000)
}

/// Reported duration: never below one second.
pub fn duration_seconds(start_ms: i64, end_ms: i64) -> i64 {
    raw_duration_seconds(start_ms, end_ms).max(1)
}

/// Per-minute rate over the raw duration; absent when the duration is zero
/// or negative.
pub fn per_minute(count: u64, raw_seconds: i64) -> Option<f64> {
    if raw_seconds <= 0 {
        return None;
    }
    Some(count as f64 * 60.0 / raw_seconds as f64)
}

/// Mean gap from an accumulated gap sum and gap count.
pub fn average_gap(total_ms: i64, count: u64) -> Option<f64> {
    if count == 0 {
        return None;
    }
    Some(total_ms as f64 / count as f64)
}

/// Sum of consecutive differences and the number of differences.
pub fn gap_totals(sequence: &[i64]) -> (i64, u64) {
    let total = sequence
        .windows(2)
        .map(|pair| pair[1].saturating_sub(pair[0]))
        .fold(0i64, i64::saturating_add);
    (total, sequence.len().saturating_sub(1) as u64)
}

/// Entry with the highest count. Ties go to the lexicographically smallest
/// name, which `BTreeMap` iteration order gives us for free.
pub fn most_edited(lines_per_file: &BTreeMap<String, u64>) -> Option<(String, u64)> {
    let mut best: Option<(&String, u64)> = None;
    for (name, &count) in lines_per_file {
        match best {
            Some((_, top)) if count <= top => {}
            _ => best = Some((name, count)),
        }
    }
    best.map(|(name, count)| (name.clone(), count))
}
