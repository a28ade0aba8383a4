// src/store/mod.rs — Persistence for accounts, GPUs, sessions and the ledger

pub mod schema;
#[allow(clippy::module_inception)]
pub mod store;
pub mod store_server;

use rusqlite::Connection;
use std::path::Path;

use crate::infra::errors::Result;

pub use store::Store;
pub use store_server::{spawn_store_server, StoreHandle};

/// Open (or create) the database at the given path.
pub fn open(path: &Path) -> Result<Store> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    // WAL lets readers (CLI queries) run alongside the daemon's writer
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    schema::run_migrations(&conn)?;
    Ok(Store::new(conn))
}

/// Create an in-memory database (for testing).
pub fn in_memory() -> Result<Store> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    schema::run_migrations(&conn)?;
    Ok(Store::new(conn))
}
