// src/cli/report.rs — Read-only views over persisted analytics and events

use crate::aggregator::AggregateStore;
use crate::model::SessionAnalytics;
use crate::persistence::EventRepository;

const PREVIEW_CHARS: usize = 60;

/// `editstream sessions`
pub async fn list_sessions(store: &dyn AggregateStore, limit: u32) -> anyhow::Result<()> {
    let sessions = store.list(limit).await?;
    if sessions.is_empty() {
        println!("No session analytics yet.");
        return Ok(());
    }

    println!(
        "{:<38} {:>8} {:>8} {:>6} {:>9}  {}",
        "SESSION", "EVENTS", "LINES", "FILES", "DURATION", "UPDATED"
    );
    for s in &sessions {
        println!(
            "{:<38} {:>8} {:>8} {:>6} {:>8}s  {}",
            s.session_id,
            s.total_events,
            s.total_lines,
            s.unique_files_count,
            s.duration_seconds,
            s.last_updated.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// `editstream session <id>`
pub async fn show_session(store: &dyn AggregateStore, id: &str, json: bool) -> anyhow::Result<()> {
    let Some(s) = store.get(id).await? else {
        println!("No analytics for session {id}.");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&s)?);
    } else {
        print!("{}", render_session(&s));
    }
    Ok(())
}

fn rate(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
}

fn render_session(s: &SessionAnalytics) -> String {
    let mut out = String::new();
    out.push_str(&format!("Session {}\n", s.session_id));
    out.push_str(&format!(
        "  Span:        {} → {} ({}s)\n",
        s.session_start_ms, s.session_end_ms, s.duration_seconds
    ));
    out.push_str(&format!(
        "  Events:      {} ({} lines, {} files)\n",
        s.total_events, s.total_lines, s.unique_files_count
    ));
    out.push_str(&format!(
        "  Rates:       {} lines/min, {} events/min\n",
        rate(s.lines_per_minute),
        rate(s.events_per_minute)
    ));
    out.push_str(&format!(
        "  Avg gap:     {} ms\n",
        rate(s.average_inter_event_gap_ms)
    ));
    if let (Some(file), Some(lines)) = (&s.most_edited_file, s.most_edited_file_lines) {
        out.push_str(&format!("  Most edited: {file} ({lines} lines)\n"));
    }
    if !s.events_by_source.is_empty() {
        let sources: Vec<String> = s
            .events_by_source
            .iter()
            .map(|(source, n)| format!("{source}={n}"))
            .collect();
        out.push_str(&format!("  Sources:     {}\n", sources.join(", ")));
    }
    out.push_str(&format!("  Updated:     {}\n", s.last_updated.to_rfc3339()));
    out
}

/// `editstream events <session>`
pub async fn list_events(
    repository: &dyn EventRepository,
    session: &str,
    file_uri: Option<&str>,
) -> anyhow::Result<()> {
    let events = repository.find_by_session(session, file_uri).await?;
    if events.is_empty() {
        println!("No stored events for session {session}.");
        return Ok(());
    }

    for stored in &events {
        let e = &stored.event;
        let preview: String = e.text_normalized.chars().take(PREVIEW_CHARS).collect();
        println!(
            "{:>14}  {:<24} L{:<5} {:<8} {}",
            e.client_timestamp_ms,
            e.file_name().unwrap_or(&e.file_uri),
            e.line_number,
            e.source.as_ref().map(|s| s.as_str()).unwrap_or("-"),
            preview
        );
    }
    println!("{} events", events.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::SessionAggregate;
    use crate::model::{CodeEvent, Source};
    use chrono::Utc;

    #[test]
    fn test_render_session() {
        let mut agg = SessionAggregate::new("S");
        for ts in [1_000, 4_000, 7_000] {
            agg.fold(&CodeEvent {
                session_id: "S".into(),
                client_timestamp_ms: ts,
                file_uri: "file:///A.java".into(),
                file_name: Some("A.java".into()),
                line_number: 1,
                text_normalized: "x".into(),
                source: Some(Source::Manual),
                server_timestamp_ms: None,
            });
        }
        let s = SessionAnalytics::from_aggregate(&agg, Utc::now()).unwrap();
        let text = render_session(&s);
        assert!(text.contains("Session S"));
        assert!(text.contains("30.0 lines/min"));
        assert!(text.contains("Most edited: A.java (3 lines)"));
        assert!(text.contains("manual=3"));
    }

    #[test]
    fn test_rate_absent() {
        assert_eq!(rate(None), "-");
        assert_eq!(rate(Some(12.345)), "12.3");
    }
}
