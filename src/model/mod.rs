// src/model/mod.rs — Data carried through the pipeline

pub mod analytics;
pub mod event;

pub use analytics::{SessionAnalytics, UpsertOutcome};
pub use event::{CodeEvent, Source};

/// A raw event as persisted by the persistence consumer.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub id: String,
    #[serde(flatten)]
    pub event: CodeEvent,
    pub saved_timestamp_ms: i64,
    pub partition: u32,
    pub offset: u64,
}
