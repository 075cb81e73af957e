// src/cli/mod.rs — CLI definition (clap)

pub mod config;
pub mod migrate;
pub mod report;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "editstream",
    about = "Code activity ingestion and session analytics pipeline",
    version
)]
pub struct Cli {
    /// Config file path (default: ~/.editstream/config.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the gateway, consumers and flush worker until Ctrl+C
    Serve {
        /// Override the gateway port
        #[arg(short, long)]
        port: Option<u16>,
        /// Run consumers only, without the HTTP gateway
        #[arg(long)]
        no_gateway: bool,
    },
    /// List persisted session analytics, most recently updated first
    Sessions {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Show persisted analytics for one session
    Session {
        id: String,
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored raw events of a session
    Events {
        session: String,
        /// Only events for this file URI
        #[arg(long)]
        file_uri: Option<String>,
    },
    /// Run or inspect database migrations
    Migrate {
        /// Show migration status only
        #[arg(long)]
        status: bool,
        /// Roll back the most recent migration
        #[arg(long, conflicts_with = "status")]
        rollback: bool,
    },
    /// Print the effective configuration
    Config,
}
