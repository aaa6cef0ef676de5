//! SQLite persistence.
//!
//! - [`Database`] - Shared connection, schema, PRAGMAs
//! - [`entities`] - Destination entity rows (find / linked create / linked update)
//! - [`catalog`] - Characteristics, formulas and conversion config, plus seeding

pub mod catalog;
pub mod entities;

pub use catalog::{SeedData, SeedReport};
pub use entities::{EntityStore, LinkedRow, StoredEntity};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        TEXT NOT NULL,
    dofusdb_id  TEXT NOT NULL,
    parent_id   INTEGER REFERENCES entities(id) ON DELETE CASCADE,
    data        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (kind, dofusdb_id)
);

CREATE TABLE IF NOT EXISTS characteristics (
    characteristic_id TEXT NOT NULL,
    entity            TEXT NOT NULL,
    field             TEXT,
    required          INTEGER NOT NULL DEFAULT 0,
    min               REAL,
    max               REAL,
    value_available   TEXT,
    PRIMARY KEY (characteristic_id, entity)
);

CREATE TABLE IF NOT EXISTS conversion_formulas (
    characteristic_id  TEXT NOT NULL,
    entity             TEXT NOT NULL,
    formula_type       TEXT,
    parameters         TEXT NOT NULL DEFAULT '{}',
    conversion_formula TEXT,
    handler_name       TEXT,
    PRIMARY KEY (characteristic_id, entity)
);

CREATE TABLE IF NOT EXISTS conversion_config (
    id   INTEGER PRIMARY KEY CHECK (id = 1),
    data TEXT NOT NULL
);
"#;

/// Shared SQLite connection.
///
/// Cloning is cheap; every clone uses the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        tracing::debug!(path = %path.display(), "opening database");
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }
}

/// Current UTC timestamp, RFC 3339.
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
