// src/infra/errors.rs — Error types for editstream

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    // Input errors (never retriable)
    #[error("Invalid event: field '{field}' {reason}")]
    InvalidEvent { field: &'static str, reason: String },

    #[error("Undecodable record: {0}")]
    Decode(#[from] serde_json::Error),

    // Infra (retriable)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store call for session '{session_id}' exceeded {secs}s")]
    Timeout { session_id: String, secs: u64 },

    // Setup
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        PipelineError::InvalidEvent {
            field,
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PipelineError::Database(_)
                | PipelineError::StoreUnavailable(_)
                | PipelineError::Timeout { .. }
                | PipelineError::Other(_)
        )
    }
}
