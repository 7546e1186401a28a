//! Persistent work queue
//!
//! `TaskStore` is the only coordination point between workers. Claims and
//! finishes run inside exclusive SQLite transactions, so concurrent callers in
//! any thread or process sharing the status file are serialized by the file
//! lock. A caller that finds the lock held waits up to the busy timeout.

use crate::state::UnitStatus;
use crate::storage::sqlite::{open_connection, timestamp_now};
use crate::storage::traits::{StorageError, StorageResult, WorkUnit};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;

/// Queue of work units of kind `U` backed by the status store
pub struct TaskStore<U: WorkUnit> {
    conn: Connection,
    _unit: PhantomData<U>,
}

impl<U: WorkUnit> TaskStore<U> {
    /// Opens the queue in the status store at `path`
    ///
    /// The tables must already exist (see `bootstrap`).
    pub fn open(path: &Path, busy_timeout: Duration) -> StorageResult<Self> {
        Ok(Self {
            conn: open_connection(path, busy_timeout)?,
            _unit: PhantomData,
        })
    }

    /// Atomically claims any pending unit
    ///
    /// # Returns
    ///
    /// * `Ok(Some(unit))` - The unit is now `claimed` by the caller
    /// * `Ok(None)` - No pending unit is left
    /// * `Err(StorageError)` - The store could not be locked within the busy
    ///   timeout, or another database error occurred
    pub fn claim_next(&mut self) -> StorageResult<Option<U>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)?;

        let unit = tx
            .query_row(
                &format!(
                    "SELECT {key} FROM {table} WHERE status = ?1 LIMIT 1",
                    key = U::KEY_COLUMN,
                    table = U::TABLE
                ),
                params![UnitStatus::Pending.to_db_code()],
                |row| U::from_row(row, 0),
            )
            .optional()?;

        if let Some(unit) = &unit {
            tx.execute(
                &format!(
                    "UPDATE {table} SET status = ?1, claimed_at = ?2 WHERE {key} = ?3",
                    key = U::KEY_COLUMN,
                    table = U::TABLE
                ),
                params![
                    UnitStatus::Claimed.to_db_code(),
                    timestamp_now(),
                    unit.to_key()
                ],
            )?;
        }

        tx.commit()?;
        Ok(unit)
    }

    /// Moves a claimed unit to a terminal status and stamps the completion time
    ///
    /// # Arguments
    ///
    /// * `unit` - A unit previously returned by `claim_next`
    /// * `outcome` - `Done`, `NotFound` or `Failed`
    ///
    /// # Returns
    ///
    /// The number of units in a terminal status after this update, for
    /// progress reporting.
    pub fn finish(&mut self, unit: &U, outcome: UnitStatus) -> StorageResult<u64> {
        if !UnitStatus::Claimed.can_transition_to(outcome) {
            return Err(StorageError::InvalidTransition {
                unit: unit.to_string(),
                from: UnitStatus::Claimed,
                to: outcome,
            });
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)?;

        let changed = tx.execute(
            &format!(
                "UPDATE {table} SET status = ?1, committed_at = ?2 WHERE {key} = ?3 AND status = ?4",
                key = U::KEY_COLUMN,
                table = U::TABLE
            ),
            params![
                outcome.to_db_code(),
                timestamp_now(),
                unit.to_key(),
                UnitStatus::Claimed.to_db_code()
            ],
        )?;

        if changed == 0 {
            let code: Option<i64> = tx
                .query_row(
                    &format!(
                        "SELECT status FROM {table} WHERE {key} = ?1",
                        key = U::KEY_COLUMN,
                        table = U::TABLE
                    ),
                    params![unit.to_key()],
                    |row| row.get(0),
                )
                .optional()?;

            // Dropping the transaction rolls it back
            return Err(match code {
                None => StorageError::UnitNotFound(unit.to_string()),
                Some(code) => match UnitStatus::from_db_code(code) {
                    Some(from) => StorageError::InvalidTransition {
                        unit: unit.to_string(),
                        from,
                        to: outcome,
                    },
                    None => StorageError::UnknownStatus {
                        unit: unit.to_string(),
                        code,
                    },
                },
            });
        }

        let finished = count_terminal(&tx, U::TABLE)?;
        tx.commit()?;
        Ok(finished)
    }

    /// Inserts units as pending, skipping any already queued
    ///
    /// Runs in one transaction. Returns the number of newly queued units.
    pub fn seed<I>(&mut self, units: I) -> StorageResult<usize>
    where
        I: IntoIterator<Item = U>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {table} ({key}, status) VALUES (?1, ?2)",
                key = U::KEY_COLUMN,
                table = U::TABLE
            ))?;
            for unit in units {
                inserted += stmt.execute(params![unit.to_key(), UnitStatus::Pending.to_db_code()])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Returns expired claims to `pending`
    ///
    /// Units claimed more than `older_than` ago are assumed to belong to a
    /// worker that died. This undoes the claim, so only call it when no live
    /// worker can still be holding such a unit.
    pub fn reap_expired_claims(&mut self, older_than: Duration) -> StorageResult<usize> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| StorageError::Database(format!("lease timeout out of range: {}", e)))?;
        let cutoff = (chrono::Utc::now() - age)
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Exclusive)?;
        let reaped = tx.execute(
            &format!(
                "UPDATE {table} SET status = ?1, claimed_at = NULL
                 WHERE status = ?2 AND (claimed_at IS NULL OR claimed_at < ?3)",
                table = U::TABLE
            ),
            params![
                UnitStatus::Pending.to_db_code(),
                UnitStatus::Claimed.to_db_code(),
                cutoff
            ],
        )?;
        tx.commit()?;

        Ok(reaped)
    }

    /// Current status of a unit, or None if it was never queued
    pub fn status_of(&self, unit: &U) -> StorageResult<Option<UnitStatus>> {
        let code: Option<i64> = self
            .conn
            .query_row(
                &format!(
                    "SELECT status FROM {table} WHERE {key} = ?1",
                    key = U::KEY_COLUMN,
                    table = U::TABLE
                ),
                params![unit.to_key()],
                |row| row.get(0),
            )
            .optional()?;

        match code {
            None => Ok(None),
            Some(code) => UnitStatus::from_db_code(code)
                .map(Some)
                .ok_or_else(|| StorageError::UnknownStatus {
                    unit: unit.to_string(),
                    code,
                }),
        }
    }

    /// Counts units in one status
    pub fn count_by_status(&self, status: UnitStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE status = ?1", U::TABLE),
            params![status.to_db_code()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Counts units in any terminal status
    pub fn count_finished(&self) -> StorageResult<u64> {
        count_terminal(&self.conn, U::TABLE)
    }

    pub fn count_total(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", U::TABLE),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

/// Units that are neither pending nor claimed
fn count_terminal(conn: &Connection, table: &str) -> StorageResult<u64> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE status != ?1 AND status != ?2",
            table
        ),
        params![
            UnitStatus::Pending.to_db_code(),
            UnitStatus::Claimed.to_db_code()
        ],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}
