//! Append-only failure log
//!
//! Every failed remote request leaves one row: an HTTP error row for a non-2xx
//! response, or an exception row for a transport or decoding failure.

use crate::state::Phase;
use crate::storage::sqlite::{open_connection, timestamp_now};
use crate::storage::traits::{LogKey, StorageResult};
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Duration;

/// A logged non-2xx response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpErrorEntry {
    pub status_code: u16,
    pub message: String,
    pub logged_at: String,
}

fn tables(phase: Phase) -> (&'static str, &'static str, &'static str) {
    match phase {
        Phase::Restaurants => (
            "fetch_restaurant_log",
            "fetch_restaurant_exception",
            "geohash",
        ),
        Phase::Menus => ("fetch_menu_log", "fetch_menu_exception", "restaurant_id"),
    }
}

/// Handle to the log store
pub struct LogStore {
    conn: Connection,
}

impl LogStore {
    pub fn open(path: &Path, busy_timeout: Duration) -> StorageResult<Self> {
        Ok(Self {
            conn: open_connection(path, busy_timeout)?,
        })
    }

    /// Records a non-2xx response for `key`
    pub fn record_http_error(
        &self,
        key: &LogKey,
        status_code: u16,
        message: &str,
    ) -> StorageResult<()> {
        let (log_table, _, key_column) = tables(key.phase());
        self.conn.execute(
            &format!(
                "INSERT INTO {} ({}, http_status_code, error_message, logged_at)
                 VALUES (?1, ?2, ?3, ?4)",
                log_table, key_column
            ),
            params![key.to_value(), status_code, message, timestamp_now()],
        )?;
        Ok(())
    }

    /// Records a transport or decoding failure for `key`
    pub fn record_exception(&self, key: &LogKey, exception: &str) -> StorageResult<()> {
        let (_, exception_table, key_column) = tables(key.phase());
        self.conn.execute(
            &format!(
                "INSERT INTO {} ({}, exception, logged_at) VALUES (?1, ?2, ?3)",
                exception_table, key_column
            ),
            params![key.to_value(), exception, timestamp_now()],
        )?;
        Ok(())
    }

    pub fn count_http_errors(&self, phase: Phase) -> StorageResult<u64> {
        let (log_table, _, _) = tables(phase);
        self.count(&format!("SELECT COUNT(*) FROM {}", log_table))
    }

    pub fn count_exceptions(&self, phase: Phase) -> StorageResult<u64> {
        let (_, exception_table, _) = tables(phase);
        self.count(&format!("SELECT COUNT(*) FROM {}", exception_table))
    }

    /// HTTP errors logged for one unit, oldest first
    pub fn http_errors_for(&self, key: &LogKey) -> StorageResult<Vec<HttpErrorEntry>> {
        let (log_table, _, key_column) = tables(key.phase());
        let mut stmt = self.conn.prepare(&format!(
            "SELECT http_status_code, error_message, logged_at FROM {}
             WHERE {} = ?1 ORDER BY rowid",
            log_table, key_column
        ))?;

        let entries = stmt
            .query_map(params![key.to_value()], |row| {
                Ok(HttpErrorEntry {
                    status_code: row.get(0)?,
                    message: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    logged_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Exception texts logged for one unit, oldest first
    pub fn exceptions_for(&self, key: &LogKey) -> StorageResult<Vec<String>> {
        let (_, exception_table, key_column) = tables(key.phase());
        let mut stmt = self.conn.prepare(&format!(
            "SELECT exception FROM {} WHERE {} = ?1 ORDER BY rowid",
            exception_table, key_column
        ))?;

        let entries = stmt
            .query_map(params![key.to_value()], |row| {
                Ok(row.get::<_, Option<String>>(0)?.unwrap_or_default())
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn count(&self, sql: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
