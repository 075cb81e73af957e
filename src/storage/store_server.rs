// src/storage/store_server.rs — Async message passing for Store

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::model::{SessionAnalytics, StoredEvent, UpsertOutcome};
use crate::storage::store::Store;
use crate::transport::LogRecord;

#[derive(Debug)]
pub enum StoreCommand {
    AppendRecord {
        topic: String,
        partition: u32,
        key: String,
        payload: String,
        now_ms: i64,
        resp: oneshot::Sender<anyhow::Result<u64>>,
    },
    PollRecords {
        group: String,
        topic: String,
        partitions: Vec<u32>,
        max: usize,
        resp: oneshot::Sender<anyhow::Result<Vec<LogRecord>>>,
    },
    CommitOffset {
        group: String,
        topic: String,
        partition: u32,
        next_offset: u64,
        resp: oneshot::Sender<anyhow::Result<()>>,
    },
    CommittedOffset {
        group: String,
        topic: String,
        partition: u32,
        resp: oneshot::Sender<anyhow::Result<u64>>,
    },
    EndOffset {
        topic: String,
        partition: u32,
        resp: oneshot::Sender<anyhow::Result<u64>>,
    },
    InsertEvent {
        event: Box<StoredEvent>,
        resp: oneshot::Sender<anyhow::Result<bool>>,
    },
    QueryEventsBySession {
        session_id: String,
        file_uri: Option<String>,
        resp: oneshot::Sender<anyhow::Result<Vec<StoredEvent>>>,
    },
    CountEventsBySession {
        session_id: String,
        resp: oneshot::Sender<anyhow::Result<u64>>,
    },
    MergeSessionAnalytics {
        partial: Box<SessionAnalytics>,
        now: DateTime<Utc>,
        resp: oneshot::Sender<anyhow::Result<UpsertOutcome>>,
    },
    GetSessionAnalytics {
        session_id: String,
        resp: oneshot::Sender<anyhow::Result<Option<SessionAnalytics>>>,
    },
    ListSessionAnalytics {
        limit: u32,
        resp: oneshot::Sender<anyhow::Result<Vec<SessionAnalytics>>>,
    },
}

/// A handle to the Store that uses message passing.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    pub fn new(tx: mpsc::Sender<StoreCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<anyhow::Result<T>>) -> StoreCommand,
    ) -> anyhow::Result<T> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(build(resp_tx))
            .await
            .map_err(|_| anyhow!("store server has shut down"))?;
        resp_rx
            .await
            .map_err(|_| anyhow!("store server dropped the request"))?
    }

    pub async fn append_record(
        &self,
        topic: String,
        partition: u32,
        key: String,
        payload: String,
        now_ms: i64,
    ) -> anyhow::Result<u64> {
        self.request(|resp| StoreCommand::AppendRecord {
            topic,
            partition,
            key,
            payload,
            now_ms,
            resp,
        })
        .await
    }

    pub async fn poll_records(
        &self,
        group: String,
        topic: String,
        partitions: Vec<u32>,
        max: usize,
    ) -> anyhow::Result<Vec<LogRecord>> {
        self.request(|resp| StoreCommand::PollRecords {
            group,
            topic,
            partitions,
            max,
            resp,
        })
        .await
    }

    pub async fn commit_offset(
        &self,
        group: String,
        topic: String,
        partition: u32,
        next_offset: u64,
    ) -> anyhow::Result<()> {
        self.request(|resp| StoreCommand::CommitOffset {
            group,
            topic,
            partition,
            next_offset,
            resp,
        })
        .await
    }

    pub async fn committed_offset(
        &self,
        group: String,
        topic: String,
        partition: u32,
    ) -> anyhow::Result<u64> {
        self.request(|resp| StoreCommand::CommittedOffset {
            group,
            topic,
            partition,
            resp,
        })
        .await
    }

    pub async fn end_offset(&self, topic: String, partition: u32) -> anyhow::Result<u64> {
        self.request(|resp| StoreCommand::EndOffset {
            topic,
            partition,
            resp,
        })
        .await
    }

    pub async fn insert_event(&self, event: StoredEvent) -> anyhow::Result<bool> {
        self.request(|resp| StoreCommand::InsertEvent {
            event: Box::new(event),
            resp,
        })
        .await
    }

    pub async fn query_events_by_session(
        &self,
        session_id: String,
        file_uri: Option<String>,
    ) -> anyhow::Result<Vec<StoredEvent>> {
        self.request(|resp| StoreCommand::QueryEventsBySession {
            session_id,
            file_uri,
            resp,
        })
        .await
    }

    pub async fn count_events_by_session(&self, session_id: String) -> anyhow::Result<u64> {
        self.request(|resp| StoreCommand::CountEventsBySession { session_id, resp })
            .await
    }

    pub async fn merge_session_analytics(
        &self,
        partial: SessionAnalytics,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UpsertOutcome> {
        self.request(|resp| StoreCommand::MergeSessionAnalytics {
            partial: Box::new(partial),
            now,
            resp,
        })
        .await
    }

    pub async fn get_session_analytics(
        &self,
        session_id: String,
    ) -> anyhow::Result<Option<SessionAnalytics>> {
        self.request(|resp| StoreCommand::GetSessionAnalytics { session_id, resp })
            .await
    }

    pub async fn list_session_analytics(&self, limit: u32) -> anyhow::Result<Vec<SessionAnalytics>> {
        self.request(|resp| StoreCommand::ListSessionAnalytics { limit, resp })
            .await
    }
}

/// Spawn the Store in a background task and return a handle to it.
pub fn spawn_store_server(store: Store) -> (StoreHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(256);
    let handle = StoreHandle::new(tx);
    let join_handle = tokio::spawn(run_store_server(store, rx));
    (handle, join_handle)
}

/// The background task that owns the Store. Exits once every handle is gone.
pub async fn run_store_server(store: Store, mut rx: mpsc::Receiver<StoreCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::AppendRecord {
                topic,
                partition,
                key,
                payload,
                now_ms,
                resp,
            } => {
                let res = store.append_record(&topic, partition, &key, &payload, now_ms);
                let _ = resp.send(res);
            }
            StoreCommand::PollRecords {
                group,
                topic,
                partitions,
                max,
                resp,
            } => {
                let res = store.poll_records(&group, &topic, &partitions, max);
                let _ = resp.send(res);
            }
            StoreCommand::CommitOffset {
                group,
                topic,
                partition,
                next_offset,
                resp,
            } => {
                let res = store.commit_offset(&group, &topic, partition, next_offset);
                let _ = resp.send(res);
            }
            StoreCommand::CommittedOffset {
                group,
                topic,
                partition,
                resp,
            } => {
                let res = store.committed_offset(&group, &topic, partition);
                let _ = resp.send(res);
            }
            StoreCommand::EndOffset {
                topic,
                partition,
                resp,
            } => {
                let res = store.end_offset(&topic, partition);
                let _ = resp.send(res);
            }
            StoreCommand::InsertEvent { event, resp } => {
                let res = store.insert_event(&event);
                let _ = resp.send(res);
            }
            StoreCommand::QueryEventsBySession {
                session_id,
                file_uri,
                resp,
            } => {
                let res = store.query_events_by_session(&session_id, file_uri.as_deref());
                let _ = resp.send(res);
            }
            StoreCommand::CountEventsBySession { session_id, resp } => {
                let res = store.count_events_by_session(&session_id);
                let _ = resp.send(res);
            }
            StoreCommand::MergeSessionAnalytics { partial, now, resp } => {
                let res = store.merge_session_analytics(&partial, now);
                let _ = resp.send(res);
            }
            StoreCommand::GetSessionAnalytics { session_id, resp } => {
                let res = store.get_session_analytics(&session_id);
                let _ = resp.send(res);
            }
            StoreCommand::ListSessionAnalytics { limit, resp } => {
                let res = store.list_session_analytics(limit);
                let _ = resp.send(res);
            }
        }
    }
}
