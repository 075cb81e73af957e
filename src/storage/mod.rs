// src/storage/mod.rs — SQLite storage: log records, raw events, session analytics

pub mod schema;
pub mod store;
pub mod store_server;

pub use store::Store;
pub use store_server::{spawn_store_server, StoreHandle};

use rusqlite::Connection;
use std::path::Path;

/// Open (or create) the database at the given path and bring it up to date.
pub fn open(path: &Path) -> anyhow::Result<Store> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA busy_timeout=5000;")?;

    schema::run_migrations(&conn)?;
    Ok(Store::new(conn))
}

/// Create an in-memory database (for testing).
pub fn in_memory() -> anyhow::Result<Store> {
    let conn = Connection::open_in_memory()?;
    schema::run_migrations(&conn)?;
    Ok(Store::new(conn))
}
