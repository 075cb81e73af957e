// src/main.rs — editstream entry point

use clap::Parser;
use std::path::Path;

use editstream::cli::{self, Cli, Commands};
use editstream::infra::config::Config;
use editstream::infra::logger;
use editstream::pipeline;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(Path::new(path))?,
        None => Config::load()?,
    };

    // Initialize logging (respects EDITSTREAM_LOG / RUST_LOG)
    logger::init_logging(&config.logging.level);

    match cli.command {
        Commands::Serve { port, no_gateway } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if no_gateway {
                config.gateway.enabled = false;
            }
            pipeline::run(config).await
        }
        Commands::Sessions { limit } => {
            let (store, _server) = pipeline::open_store(&config)?;
            cli::report::list_sessions(&store, limit).await
        }
        Commands::Session { id, json } => {
            let (store, _server) = pipeline::open_store(&config)?;
            cli::report::show_session(&store, &id, json).await
        }
        Commands::Events { session, file_uri } => {
            let (store, _server) = pipeline::open_store(&config)?;
            cli::report::list_events(&store, &session, file_uri.as_deref()).await
        }
        Commands::Migrate { status, rollback } => {
            cli::migrate::run_migrate(&config.storage.resolved_db_path(), status, rollback).await
        }
        Commands::Config => cli::config::show_config(&config),
    }
}
