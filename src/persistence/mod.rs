// src/persistence/mod.rs — Raw event persistence consumer

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::infra::errors::PipelineError;
use crate::model::{CodeEvent, StoredEvent};
use crate::storage::StoreHandle;
use crate::transport::{HandleOutcome, LogRecord, RecordHandler};

/// Store of immutable raw events, unique on
/// (sessionId, fileUri, lineNumber, clientTimestampMs).
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Returns false when the event was already stored.
    async fn save(&self, event: StoredEvent) -> Result<bool, PipelineError>;

    async fn find_by_session(
        &self,
        session_id: &str,
        file_uri: Option<&str>,
    ) -> Result<Vec<StoredEvent>, PipelineError>;

    async fn count_by_session(&self, session_id: &str) -> Result<u64, PipelineError>;
}

#[async_trait]
impl EventRepository for StoreHandle {
    async fn save(&self, event: StoredEvent) -> Result<bool, PipelineError> {
        Ok(self.insert_event(event).await?)
    }

    async fn find_by_session(
        &self,
        session_id: &str,
        file_uri: Option<&str>,
    ) -> Result<Vec<StoredEvent>, PipelineError> {
        Ok(self
            .query_events_by_session(session_id.to_string(), file_uri.map(String::from))
            .await?)
    }

    async fn count_by_session(&self, session_id: &str) -> Result<u64, PipelineError> {
        Ok(self.count_events_by_session(session_id.to_string()).await?)
    }
}

/// Writes every record as a [`StoredEvent`]. Retriable store failures ask
/// for redelivery; everything else is skipped.
pub struct PersistenceHandler {
    repository: Arc<dyn EventRepository>,
    saved: AtomicU64,
    duplicates: AtomicU64,
}

impl PersistenceHandler {
    pub fn new(repository: Arc<dyn EventRepository>) -> Self {
        Self {
            repository,
            saved: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    pub fn saved(&self) -> u64 {
        self.saved.load(Ordering::Relaxed)
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RecordHandler for PersistenceHandler {
    fn name(&self) -> &str {
        "persistence"
    }

    async fn handle(&self, record: &LogRecord) -> HandleOutcome {
        let event = match CodeEvent::from_json(&record.payload) {
            Ok(event) => event,
            Err(e) => return HandleOutcome::Skipped(e.to_string()),
        };
        if let Err(e) = event.validate_session() {
            return HandleOutcome::Skipped(e.to_string());
        }

        let stored = StoredEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            saved_timestamp_ms: chrono::Utc::now().timestamp_millis(),
            partition: record.partition,
            offset: record.offset,
        };

        match self.repository.save(stored).await {
            Ok(true) => {
                self.saved.fetch_add(1, Ordering::Relaxed);
                HandleOutcome::Processed
            }
            Ok(false) => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Duplicate event at {}@{} ignored",
                    record.partition,
                    record.offset
                );
                HandleOutcome::Processed
            }
            Err(e) if e.is_retriable() => HandleOutcome::Retry(e.to_string()),
            Err(e) => HandleOutcome::Skipped(e.to_string()),
        }
    }
}
