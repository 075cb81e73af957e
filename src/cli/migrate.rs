// src/cli/migrate.rs — Database migration command
//
// Migrations run automatically whenever the pipeline opens the database.
// This command gives visibility and a manual rollback for development.

use std::path::Path;

use crate::storage::schema;

/// Show migration status, roll back one step, or run pending migrations.
pub async fn run_migrate(db_path: &Path, status_only: bool, rollback: bool) -> anyhow::Result<()> {
    if !db_path.exists() && (status_only || rollback) {
        println!("No database found at: {}", db_path.display());
        println!("Run `editstream migrate` or `editstream serve` to create it.");
        return Ok(());
    }

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(db_path)?;

    if status_only {
        return show_migration_status(&conn, db_path);
    }

    if rollback {
        match schema::rollback_last(&conn)? {
            Some(version) => println!("Rolled back migration v{version}."),
            None => println!("No migrations to roll back."),
        }
        return show_migration_status(&conn, db_path);
    }

    println!("Running database migrations...");
    schema::run_migrations(&conn)?;
    println!("Migrations complete.");
    show_migration_status(&conn, db_path)
}

fn show_migration_status(conn: &rusqlite::Connection, db_path: &Path) -> anyhow::Result<()> {
    let applied = schema::applied_migrations(conn)?;
    let latest = schema::MIGRATIONS.last().map(|m| m.version).unwrap_or(0);

    println!("Database: {}", db_path.display());
    println!(
        "Current schema version: {} (latest {})",
        schema::current_version(conn)?,
        latest
    );
    println!();

    if applied.is_empty() {
        println!("No migrations have been run yet.");
        return Ok(());
    }

    println!("Applied migrations:");
    for (version, name, applied_at) in applied {
        println!("  v{}: {} (applied {})", version, name, applied_at);
    }

    let pending: Vec<_> = schema::MIGRATIONS
        .iter()
        .filter(|m| m.version > schema::current_version(conn).unwrap_or(0))
        .collect();
    if !pending.is_empty() {
        println!("Pending:");
        for m in pending {
            println!("  v{}: {}", m.version, m.name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_creates_and_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("editstream.db");

        run_migrate(&db, true, false).await.unwrap();
        assert!(!db.exists());

        run_migrate(&db, false, false).await.unwrap();
        let conn = rusqlite::Connection::open(&db).unwrap();
        assert_eq!(schema::current_version(&conn).unwrap(), 2);

        run_migrate(&db, false, true).await.unwrap();
        assert_eq!(schema::current_version(&conn).unwrap(), 1);
    }
}
