// src/pipeline.rs — Wires gateway, log, consumers and the flush worker

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::aggregator::{Aggregator, FlushReport};
use crate::gateway::{self, GatewayState};
use crate::infra::config::Config;
use crate::persistence::PersistenceHandler;
use crate::storage::{self, spawn_store_server, Store, StoreHandle};
use crate::transport::{
    assign_partitions, ConsumerSettings, ConsumerWorker, PartitionedLog, RecordHandler, SqliteLog,
};

/// A started pipeline. Dropping it without `shutdown` leaves tasks running
/// until the runtime exits.
pub struct RunningPipeline {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    aggregator: Option<Aggregator>,
    state: GatewayState,
}

impl RunningPipeline {
    pub fn aggregator(&self) -> Option<&Aggregator> {
        self.aggregator.as_ref()
    }

    pub fn log(&self) -> Arc<dyn PartitionedLog> {
        self.state.log.clone()
    }

    /// State the HTTP gateway serves from.
    pub fn gateway_state(&self) -> GatewayState {
        self.state.clone()
    }

    /// Stop the gateway and every worker, wait for them, then flush once
    /// more so nothing folded is left in memory.
    pub async fn shutdown(self) -> Option<FlushReport> {
        tracing::info!("Shutting down pipeline");
        let _ = self.shutdown_tx.send(());

        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::error!("Pipeline task ended abnormally: {}", e);
            }
        }

        match self.aggregator {
            Some(aggregator) => {
                let report = aggregator.flusher().flush_cycle().await;
                tracing::info!(
                    "Final flush: {} sessions ({} failed, {} timed out)",
                    report.captured,
                    report.failed,
                    report.timed_out.len()
                );
                Some(report)
            }
            None => None,
        }
    }
}

/// Start every enabled component against the given store.
pub fn start(config: &Config, store: Store) -> anyhow::Result<RunningPipeline> {
    config.validate()?;

    let (handle, _store_task) = spawn_store_server(store);
    let (shutdown_tx, _) = broadcast::channel(1);
    let mut tasks = Vec::new();

    let log: Arc<dyn PartitionedLog> = Arc::new(SqliteLog::new(
        handle.clone(),
        config.log.topic.clone(),
        config.log.partitions,
    ));

    let aggregator = Aggregator::new(
        Arc::new(handle.clone()),
        config.aggregation.merge_timeout(),
    );

    if config.aggregation.enabled {
        let settings = ConsumerSettings {
            group_id: config.aggregation.group_id.clone(),
            poll_interval: Duration::from_millis(config.log.poll_interval_ms),
            batch_size: config.log.batch_size as usize,
            retry_backoff: Duration::from_millis(config.persistence.retry_backoff_ms),
        };
        spawn_consumers(
            &log,
            aggregator.handler(),
            &settings,
            config.aggregation.workers,
            &shutdown_tx,
            &mut tasks,
        );

        let flusher = aggregator.flusher();
        tasks.push(tokio::spawn(flusher.run(
            config.aggregation.flush_interval(),
            shutdown_tx.subscribe(),
        )));
    }

    if config.persistence.enabled {
        let settings = ConsumerSettings {
            group_id: config.persistence.group_id.clone(),
            poll_interval: Duration::from_millis(config.log.poll_interval_ms),
            batch_size: config.log.batch_size as usize,
            retry_backoff: Duration::from_millis(config.persistence.retry_backoff_ms),
        };
        spawn_consumers(
            &log,
            Arc::new(PersistenceHandler::new(Arc::new(handle.clone()))),
            &settings,
            config.persistence.workers,
            &shutdown_tx,
            &mut tasks,
        );
    }

    let state = GatewayState {
        log: log.clone(),
        events: Arc::new(handle.clone()),
        analytics: Arc::new(handle),
        aggregator: aggregator.clone(),
        aggregation_group: config.aggregation.group_id.clone(),
        api_key: config.gateway.api_key.clone(),
    };

    if config.gateway.enabled {
        let gateway_config = config.gateway.clone();
        let gateway_state = state.clone();
        let shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = gateway::start_server(&gateway_config, gateway_state, shutdown).await {
                tracing::error!("Gateway stopped: {}", e);
            }
        }));
    }

    Ok(RunningPipeline {
        shutdown_tx,
        tasks,
        aggregator: config.aggregation.enabled.then_some(aggregator),
        state,
    })
}

fn spawn_consumers(
    log: &Arc<dyn PartitionedLog>,
    handler: Arc<dyn RecordHandler>,
    settings: &ConsumerSettings,
    workers: u32,
    shutdown_tx: &broadcast::Sender<()>,
    tasks: &mut Vec<JoinHandle<()>>,
) {
    for index in 0..workers {
        let partitions = assign_partitions(log.partitions(), workers, index);
        if partitions.is_empty() {
            tracing::warn!(
                "{} worker {} has no partitions to read; more workers than partitions",
                settings.group_id,
                index
            );
            continue;
        }
        let worker = ConsumerWorker::new(log.clone(), handler.clone(), settings.clone(), partitions);
        tasks.push(tokio::spawn(worker.run(shutdown_tx.subscribe())));
    }
}

/// Open the configured database, run until Ctrl+C, then shut down cleanly.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let db_path = config.storage.resolved_db_path();
    tracing::info!("Opening database at {}", db_path.display());
    let store = storage::open(&db_path)?;

    let pipeline = start(&config, store)?;
    println!("editstream running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    pipeline.shutdown().await;
    Ok(())
}

/// Store handle for one-off commands that don't start the pipeline.
pub fn open_store(config: &Config) -> anyhow::Result<(StoreHandle, JoinHandle<()>)> {
    let store = storage::open(&config.storage.resolved_db_path())?;
    Ok(spawn_store_server(store))
}
