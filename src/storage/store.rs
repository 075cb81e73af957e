// src/storage/store.rs — SQLite operations

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::model::{CodeEvent, SessionAnalytics, Source, StoredEvent, UpsertOutcome};
use crate::transport::LogRecord;

/// Low-level SQLite operations for all data types.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // -- Log --

    /// Append a record to the end of a partition and return its offset.
    pub fn append_record(
        &self,
        topic: &str,
        partition: u32,
        key: &str,
        payload: &str,
        now_ms: i64,
    ) -> anyhow::Result<u64> {
        let tx = self.conn.unchecked_transaction()?;
        let offset: i64 = tx.query_row(
            "SELECT COALESCE(MAX(record_offset) + 1, 0) FROM log_records
             WHERE topic = ?1 AND partition_id = ?2",
            params![topic, partition],
            |r| r.get(0),
        )?;
        tx.execute(
            "INSERT INTO log_records (topic, partition_id, record_offset, record_key, payload, appended_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![topic, partition, offset, key, payload, now_ms],
        )?;
        tx.commit()?;
        Ok(offset as u64)
    }

    /// Records of one partition starting at `from_offset`, in offset order.
    pub fn fetch_records(
        &self,
        topic: &str,
        partition: u32,
        from_offset: u64,
        max: usize,
    ) -> anyhow::Result<Vec<LogRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT partition_id, record_offset, record_key, payload, appended_at_ms
             FROM log_records
             WHERE topic = ?1 AND partition_id = ?2 AND record_offset >= ?3
             ORDER BY record_offset ASC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![topic, partition, from_offset as i64, max as i64],
            |row| {
                Ok(LogRecord {
                    partition: row.get::<_, i64>(0)? as u32,
                    offset: row.get::<_, i64>(1)? as u64,
                    key: row.get(2)?,
                    payload: row.get(3)?,
                    appended_at_ms: row.get(4)?,
                })
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Offset one past the last record of a partition.
    pub fn end_offset(&self, topic: &str, partition: u32) -> anyhow::Result<u64> {
        let end: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(record_offset) + 1, 0) FROM log_records
             WHERE topic = ?1 AND partition_id = ?2",
            params![topic, partition],
            |r| r.get(0),
        )?;
        Ok(end as u64)
    }

    /// Next offset a group will read from a partition. Zero if never committed.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> anyhow::Result<u64> {
        let offset: Option<i64> = self
            .conn
            .query_row(
                "SELECT next_offset FROM consumer_offsets
                 WHERE group_id = ?1 AND topic = ?2 AND partition_id = ?3",
                params![group, topic, partition],
                |r| r.get(0),
            )
            .optional()?;
        Ok(offset.unwrap_or(0) as u64)
    }

    /// Record that a group has handled everything below `next_offset`.
    /// Offsets never move backwards.
    pub fn commit_offset(
        &self,
        group: &str,
        topic: &str,
        partition: u32,
        next_offset: u64,
    ) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO consumer_offsets (group_id, topic, partition_id, next_offset, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(group_id, topic, partition_id) DO UPDATE SET
               next_offset = MAX(next_offset, excluded.next_offset),
               updated_at = excluded.updated_at",
            params![group, topic, partition, next_offset as i64, now],
        )?;
        Ok(())
    }

    /// Uncommitted records for a group across the given partitions, at most
    /// `max` in total, grouped by partition and in offset order within each.
    ///
    /// Each partition is first offered an equal share of `max`; whatever the
    /// quieter partitions leave unused goes to the busier ones, in the order
    /// given. A backlogged partition can therefore never crowd out the rest.
    pub fn poll_records(
        &self,
        group: &str,
        topic: &str,
        partitions: &[u32],
        max: usize,
    ) -> anyhow::Result<Vec<LogRecord>> {
        if partitions.is_empty() || max == 0 {
            return Ok(Vec::new());
        }

        let share = max.div_ceil(partitions.len());
        let mut per_partition = Vec::with_capacity(partitions.len());
        let mut total = 0;
        for &partition in partitions {
            let from = self.committed_offset(group, topic, partition)?;
            let want = share.min(max - total);
            let records = if want == 0 {
                Vec::new()
            } else {
                self.fetch_records(topic, partition, from, want)?
            };
            total += records.len();
            per_partition.push((partition, from, want, records));
        }

        for (partition, from, want, records) in per_partition.iter_mut() {
            if total >= max {
                break;
            }
            // A short read means the partition is drained.
            if records.len() < *want {
                continue;
            }
            let more = self.fetch_records(
                topic,
                *partition,
                *from + records.len() as u64,
                max - total,
            )?;
            total += more.len();
            records.extend(more);
        }

        Ok(per_partition
            .into_iter()
            .flat_map(|(_, _, _, records)| records)
            .collect())
    }

    // -- Raw events --

    /// Insert a raw event. Returns false when an event with the same natural
    /// identity is already stored.
    pub fn insert_event(&self, event: &StoredEvent) -> anyhow::Result<bool> {
        let e = &event.event;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO code_events
             (id, session_id, client_timestamp_ms, server_timestamp_ms, file_uri, file_name,
              line_number, text_normalized, source, saved_timestamp_ms, log_partition, log_offset)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                event.id,
                e.session_id,
                e.client_timestamp_ms,
                e.server_timestamp_ms,
                e.file_uri,
                e.file_name,
                e.line_number,
                e.text_normalized,
                e.source.as_ref().map(|s| s.as_str()),
                event.saved_timestamp_ms,
                event.partition,
                event.offset as i64,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Stored events of a session in client-timestamp order, optionally
    /// restricted to one file.
    pub fn query_events_by_session(
        &self,
        session_id: &str,
        file_uri: Option<&str>,
    ) -> anyhow::Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, client_timestamp_ms, server_timestamp_ms, file_uri, file_name,
                    line_number, text_normalized, source, saved_timestamp_ms, log_partition, log_offset
             FROM code_events
             WHERE session_id = ?1 AND (?2 IS NULL OR file_uri = ?2)
             ORDER BY client_timestamp_ms ASC, line_number ASC",
        )?;
        let rows = stmt.query_map(params![session_id, file_uri], stored_event_from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn count_events_by_session(&self, session_id: &str) -> anyhow::Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM code_events WHERE session_id = ?1",
            params![session_id],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    // -- Session analytics --

    /// Insert the partial if the session has no record yet, otherwise merge
    /// it into the stored one. Runs as a single transaction.
    pub fn merge_session_analytics(
        &self,
        partial: &SessionAnalytics,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UpsertOutcome> {
        let tx = self.conn.unchecked_transaction()?;
        let existing = tx
            .query_row(
                &format!("SELECT {ANALYTICS_COLUMNS} FROM session_analytics WHERE session_id = ?1"),
                params![partial.session_id],
                analytics_from_row,
            )
            .optional()?;

        let (record, outcome) = match existing {
            Some(mut stored) => {
                stored.absorb(partial, now);
                (stored, UpsertOutcome::Merged)
            }
            None => {
                let mut fresh = partial.clone();
                fresh.last_updated = now;
                (fresh, UpsertOutcome::Inserted)
            }
        };

        write_analytics(&tx, &record)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn get_session_analytics(&self, session_id: &str) -> anyhow::Result<Option<SessionAnalytics>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {ANALYTICS_COLUMNS} FROM session_analytics WHERE session_id = ?1"),
                params![session_id],
                analytics_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Most recently updated sessions first.
    pub fn list_session_analytics(&self, limit: u32) -> anyhow::Result<Vec<SessionAnalytics>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ANALYTICS_COLUMNS} FROM session_analytics
             ORDER BY last_updated DESC, session_id ASC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], analytics_from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

const ANALYTICS_COLUMNS: &str = "session_id, session_start_ms, session_end_ms, last_updated,
    duration_seconds, total_events, total_lines, files_modified, unique_files_count,
    lines_per_minute, events_per_minute, average_inter_event_gap_ms, lines_per_file,
    most_edited_file, most_edited_file_lines, events_by_source, inter_event_gap_total_ms,
    inter_event_gap_count, first_observed_ms, last_observed_ms";

fn write_analytics(conn: &Connection, a: &SessionAnalytics) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO session_analytics ({ANALYTICS_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                     ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
        ),
        params![
            a.session_id,
            a.session_start_ms,
            a.session_end_ms,
            // Fixed-width so ORDER BY last_updated sorts chronologically
            a.last_updated.to_rfc3339_opts(SecondsFormat::Millis, true),
            a.duration_seconds,
            a.total_events as i64,
            a.total_lines as i64,
            serde_json::to_string(&a.files_modified)?,
            a.unique_files_count as i64,
            a.lines_per_minute,
            a.events_per_minute,
            a.average_inter_event_gap_ms,
            serde_json::to_string(&a.lines_per_file)?,
            a.most_edited_file,
            a.most_edited_file_lines.map(|n| n as i64),
            serde_json::to_string(&a.events_by_source)?,
            a.inter_event_gap_total_ms,
            a.inter_event_gap_count as i64,
            a.first_observed_ms,
            a.last_observed_ms,
        ],
    )?;
    Ok(())
}

fn analytics_from_row(row: &Row<'_>) -> rusqlite::Result<SessionAnalytics> {
    let last_updated: String = row.get(3)?;
    let last_updated = DateTime::parse_from_rfc3339(&last_updated)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(SessionAnalytics {
        session_id: row.get(0)?,
        session_start_ms: row.get(1)?,
        session_end_ms: row.get(2)?,
        last_updated,
        duration_seconds: row.get(4)?,
        total_events: row.get::<_, i64>(5)? as u64,
        total_lines: row.get::<_, i64>(6)? as u64,
        files_modified: json_column(row, 7)?,
        unique_files_count: row.get::<_, i64>(8)? as u64,
        lines_per_minute: row.get(9)?,
        events_per_minute: row.get(10)?,
        average_inter_event_gap_ms: row.get(11)?,
        lines_per_file: json_column(row, 12)?,
        most_edited_file: row.get(13)?,
        most_edited_file_lines: row.get::<_, Option<i64>>(14)?.map(|n| n as u64),
        events_by_source: json_column(row, 15)?,
        inter_event_gap_total_ms: row.get(16)?,
        inter_event_gap_count: row.get::<_, i64>(17)? as u64,
        first_observed_ms: row.get(18)?,
        last_observed_ms: row.get(19)?,
    })
}

fn stored_event_from_row(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    Ok(StoredEvent {
        id: row.get(0)?,
        event: CodeEvent {
            session_id: row.get(1)?,
            client_timestamp_ms: row.get(2)?,
            server_timestamp_ms: row.get(3)?,
            file_uri: row.get(4)?,
            file_name: row.get(5)?,
            line_number: row.get(6)?,
            text_normalized: row.get(7)?,
            source: row.get::<_, Option<String>>(8)?.map(Source::from),
        },
        saved_timestamp_ms: row.get(9)?,
        partition: row.get::<_, i64>(10)? as u32,
        offset: row.get::<_, i64>(11)? as u64,
    })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
