// src/gateway/types.rs

use serde::{Deserialize, Serialize};

use crate::aggregator::{AggregatorStatsSnapshot, SessionAggregate};
use crate::infra::errors::PipelineError;
use crate::model::{CodeEvent, Source};
use crate::transport::PartitionLag;

/// Request body for POST /api/events. Every field is optional here so that
/// missing values surface as a field-level validation error instead of a
/// generic JSON rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub session_id: Option<String>,
    pub client_timestamp_ms: Option<i64>,
    pub file_uri: Option<String>,
    pub file_name: Option<String>,
    pub line_number: Option<i64>,
    pub text_normalized: Option<String>,
    pub source: Option<String>,
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, PipelineError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(PipelineError::invalid(field, "is required")),
    }
}

impl EventRequest {
    /// Check every field and build the event to append, stamped with the
    /// server receipt time.
    pub fn into_event(self, server_timestamp_ms: i64) -> Result<CodeEvent, PipelineError> {
        let session_id = required_text(self.session_id, "sessionId")?;
        let client_timestamp_ms = self
            .client_timestamp_ms
            .ok_or_else(|| PipelineError::invalid("clientTimestampMs", "is required"))?;
        let file_uri = required_text(self.file_uri, "fileUri")?;
        let file_name = required_text(self.file_name, "fileName")?;
        let line_number = self
            .line_number
            .ok_or_else(|| PipelineError::invalid("lineNumber", "is required"))?;
        let text_normalized = required_text(self.text_normalized, "textNormalized")?;
        let source = required_text(self.source, "source")?;

        Ok(CodeEvent {
            session_id,
            client_timestamp_ms,
            file_uri,
            file_name: Some(file_name),
            line_number,
            text_normalized,
            source: Some(Source::from(source)),
            server_timestamp_ms: Some(server_timestamp_ms),
        })
    }
}

/// Response for an accepted event.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAccepted {
    pub message: String,
    pub session_id: String,
    pub partition: u32,
    pub offset: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub file_uri: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCount {
    pub session_id: String,
    pub count: u64,
}

/// Working-set view for GET /api/aggregator/sessions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessions {
    pub count: usize,
    pub sessions: Vec<SessionAggregate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStatus {
    #[serde(flatten)]
    pub stats: AggregatorStatsSnapshot,
    pub lag: Vec<PartitionLag>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> EventRequest {
        EventRequest {
            session_id: Some("s".into()),
            client_timestamp_ms: Some(1),
            file_uri: Some("file:///a".into()),
            file_name: Some("a".into()),
            line_number: Some(0),
            text_normalized: Some("x".into()),
            source: Some("Agent".into()),
        }
    }

    #[test]
    fn test_into_event_stamps_server_time() {
        let event = full().into_event(99).unwrap();
        assert_eq!(event.server_timestamp_ms, Some(99));
        assert_eq!(event.source, Some(Source::Agent));
    }

    #[test]
    fn test_each_required_field_reported() {
        let cases: Vec<(&str, EventRequest)> = vec![
            ("sessionId", EventRequest { session_id: Some("  ".into()), ..full() }),
            ("clientTimestampMs", EventRequest { client_timestamp_ms: None, ..full() }),
            ("fileUri", EventRequest { file_uri: None, ..full() }),
            ("fileName", EventRequest { file_name: Some(String::new()), ..full() }),
            ("lineNumber", EventRequest { line_number: None, ..full() }),
            ("textNormalized", EventRequest { text_normalized: None, ..full() }),
            ("source", EventRequest { source: None, ..full() }),
        ];
        for (field, req) in cases {
            match req.into_event(0) {
                Err(PipelineError::InvalidEvent { field: got, .. }) => assert_eq!(got, field),
                other => panic!("expected {field} to be rejected, got {other:?}"),
            }
        }
    }
}
