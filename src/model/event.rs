// src/model/event.rs — The transport unit: one edited line

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::infra::errors::PipelineError;

/// Who produced an edit.
///
/// `manual` and `agent` are recognised case-insensitively; any other label a
/// producer sends is kept verbatim so it still gets its own bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
    Manual,
    Agent,
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Manual => "manual",
            Self::Agent => "agent",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for Source {
    fn from(label: String) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "manual" => Self::Manual,
            "agent" => Self::Agent,
            _ => Self::Other(label),
        }
    }
}

impl From<&str> for Source {
    fn from(label: &str) -> Self {
        Self::from(label.to_string())
    }
}

impl From<Source> for String {
    fn from(source: Source) -> Self {
        match source {
            Source::Other(label) => label,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single line-level code activity event as carried on the log.
///
/// Immutable once the gateway has stamped `server_timestamp_ms`. `file_name`
/// and `source` are optional here because records written by older producers
/// may lack them; the gateway itself requires both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeEvent {
    pub session_id: String,
    pub client_timestamp_ms: i64,
    pub file_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub line_number: i64,
    pub text_normalized: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp_ms: Option<i64>,
}

impl CodeEvent {
    /// The partition key: all events of one session land on one partition.
    pub fn partition_key(&self) -> &str {
        &self.session_id
    }

    /// File name with blank values treated as absent.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref().filter(|f| !f.trim().is_empty())
    }

    /// Check the fields every consumer relies on.
    pub fn validate_session(&self) -> Result<(), PipelineError> {
        if self.session_id.trim().is_empty() {
            return Err(PipelineError::invalid("sessionId", "must not be blank"));
        }
        Ok(())
    }

    pub fn from_json(payload: &str) -> Result<Self, PipelineError> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(self)?)
    }
}
