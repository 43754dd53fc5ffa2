//! SQLite-backed implementations of the store contracts. All three
//! stores share one connection handle; an autoincrementing rowid on the
//! events table is the canonical source of `global_position`.

use std::{fs, path::Path, sync::Arc};

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::{ForgeError, Result};

mod checkpoint_store;
mod event_store;
mod projection_store;
mod schema;

pub use checkpoint_store::SqliteCheckpointStore;
pub use event_store::SqliteEventStore;
pub use projection_store::SqliteProjectionStore;
pub use schema::ensure_schema;

pub type Database = Arc<Mutex<Connection>>;

/// Open (or create) the database file and run the idempotent schema.
pub fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| {
                ForgeError::Storage(format!(
                    "failed to create database directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
    }
    let conn = Connection::open(path)
        .map_err(|err| ForgeError::Storage(format!("failed to open {}: {err}", path.display())))?;
    ensure_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory database with the full schema. Tests and experiments.
pub fn open_in_memory() -> Result<Database> {
    let conn = Connection::open_in_memory()?;
    ensure_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}
