// src/cli/migrate.rs — Database migration command
//
// Migrations run automatically whenever the database is opened; this
// command shows where the schema stands and can revert the latest step.

use std::path::Path;

use rusqlite::Connection;

use crate::store::schema;

pub fn run_migrate(db_path: &Path, status_only: bool, rollback: bool) -> anyhow::Result<()> {
    if !db_path.exists() && (status_only || rollback) {
        println!("No database found at: {}", db_path.display());
        return Ok(());
    }
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(db_path)?;

    if rollback {
        let current = schema::current_version(&conn)?;
        if current == 0 {
            println!("No migrations to roll back.");
            return Ok(());
        }
        println!("Rolling back migration v{current}. Its tables and data are dropped.");
        schema::rollback_to(&conn, current - 1)?;
    } else if !status_only {
        println!("Running database migrations...");
        schema::run_migrations(&conn)?;
        println!("Migrations complete.");
    }

    show_migration_status(db_path, &conn)
}

fn show_migration_status(db_path: &Path, conn: &Connection) -> anyhow::Result<()> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='_migrations'",
        [],
        |row| row.get(0),
    )?;
    if !table_exists {
        println!("No migrations have been run yet.");
        return Ok(());
    }

    println!("Database: {}", db_path.display());
    println!("Current schema version: {}", schema::current_version(conn)?);

    let mut stmt =
        conn.prepare("SELECT version, name, applied_at FROM _migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, u32>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    println!("Applied migrations:");
    for row in rows {
        let (version, name, applied_at) = row?;
        println!("  v{}: {} (applied {})", version, name, applied_at);
    }
    Ok(())
}
