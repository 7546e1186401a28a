//! SQLite connection setup and store bootstrap
//!
//! Every worker thread opens its own connections. Contention between them is
//! resolved by SQLite's file locks, so every connection is configured with a
//! busy timeout: a competing lock makes the caller wait instead of failing.

use crate::storage::schema::{initialize_schema, reset_schema, StoreKind};
use crate::storage::traits::StorageResult;
use chrono::{Local, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Locations of the three stores that make up one crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub status: PathBuf,
    pub data: PathBuf,
    pub log: PathBuf,
}

impl StorePaths {
    /// Derives `<name>-status.db`, `<name>-data.db` and `<name>-log.db` in `dir`
    pub fn for_name(dir: &Path, name: &str) -> Self {
        Self {
            status: dir.join(format!("{}-status.db", name)),
            data: dir.join(format!("{}-data.db", name)),
            log: dir.join(format!("{}-log.db", name)),
        }
    }

    /// Store set named after today's local date
    pub fn for_today(dir: &Path) -> Self {
        Self::for_name(dir, &default_store_name())
    }

    pub fn path(&self, kind: StoreKind) -> &Path {
        match kind {
            StoreKind::Status => &self.status,
            StoreKind::Data => &self.data,
            StoreKind::Log => &self.log,
        }
    }

    /// True when all three database files are present
    pub fn exist(&self) -> bool {
        self.status.exists() && self.data.exists() && self.log.exists()
    }
}

/// Default store name: the local date, e.g. "2024-05-01"
pub fn default_store_name() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Current time as stored in the `*_at` columns
///
/// Fixed-width UTC so stored timestamps compare correctly as text.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Opens a connection to one store
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
/// * `busy_timeout` - How long to wait on a lock held by another connection
///
/// # Returns
///
/// * `Ok(Connection)` - Configured connection
/// * `Err(StorageError)` - Failed to open or configure the database
pub fn open_connection(path: &Path, busy_timeout: Duration) -> StorageResult<Connection> {
    let conn = Connection::open(path)?;

    // Set before anything else so the pragmas below also wait on locks
    conn.busy_timeout(busy_timeout)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
    ",
    )?;

    Ok(conn)
}

/// Creates the three stores and their tables
///
/// With `fresh`, every table is dropped and recreated first. The category
/// reference table is (re)loaded by the caller through `RecordStore`.
pub fn bootstrap(paths: &StorePaths, fresh: bool, busy_timeout: Duration) -> StorageResult<()> {
    for kind in [StoreKind::Status, StoreKind::Data, StoreKind::Log] {
        let path = paths.path(kind);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = open_connection(path, busy_timeout)?;
        if fresh {
            tracing::info!("Resetting {:?} store at {}", kind, path.display());
            reset_schema(&conn, kind)?;
        } else {
            initialize_schema(&conn, kind)?;
        }
    }

    Ok(())
}

/// Records crawl parameters in the status store
///
/// Existing keys are overwritten.
pub fn write_meta(
    paths: &StorePaths,
    entries: &[(&str, String)],
    busy_timeout: Duration,
) -> StorageResult<()> {
    let mut conn = open_connection(&paths.status, busy_timeout)?;
    let tx = conn.transaction()?;
    for (key, value) in entries {
        tx.execute(
            "INSERT OR REPLACE INTO crawl_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Reads one crawl parameter from the status store
pub fn read_meta(paths: &StorePaths, key: &str, busy_timeout: Duration) -> StorageResult<Option<String>> {
    let conn = open_connection(&paths.status, busy_timeout)?;
    let value = conn
        .query_row(
            "SELECT value FROM crawl_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Reads every crawl parameter from the status store
pub fn read_all_meta(paths: &StorePaths, busy_timeout: Duration) -> StorageResult<HashMap<String, String>> {
    let conn = open_connection(&paths.status, busy_timeout)?;
    let mut stmt = conn.prepare("SELECT key, value FROM crawl_meta")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

    let mut meta = HashMap::new();
    for row in rows {
        let (key, value): (String, String) = row?;
        meta.insert(key, value);
    }
    Ok(meta)
}
