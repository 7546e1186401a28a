//! Storage traits and error types
//!
//! This module defines the error type shared by the three stores and the
//! `WorkUnit` trait that lets one task store implementation serve both the
//! grid-cell queue and the restaurant queue.

use crate::grid::Cell;
use crate::state::{Phase, UnitStatus};
use rusqlite::types::Value;
use rusqlite::Row;
use std::fmt;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Work unit not found: {0}")]
    UnitNotFound(String),

    #[error("Invalid transition for unit {unit}: {from} -> {to}")]
    InvalidTransition {
        unit: String,
        from: UnitStatus,
        to: UnitStatus,
    },

    #[error("Unknown status code {code} for unit {unit}")]
    UnknownStatus { unit: String, code: i64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Key under which remote failures are logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogKey {
    Cell(String),
    Restaurant(i64),
}

impl LogKey {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Cell(_) => Phase::Restaurants,
            Self::Restaurant(_) => Phase::Menus,
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Self::Cell(cell) => Value::Text(cell.clone()),
            Self::Restaurant(id) => Value::Integer(*id),
        }
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cell(cell) => write!(f, "cell {}", cell),
            Self::Restaurant(id) => write!(f, "restaurant {}", id),
        }
    }
}

/// Something that can be queued in a `TaskStore`
///
/// Each implementation names the status table that holds its queue and how
/// its identifier maps to that table's key column.
pub trait WorkUnit: Sized + Clone + fmt::Display + Send {
    /// Status table holding units of this kind
    const TABLE: &'static str;

    /// Primary key column of `TABLE`
    const KEY_COLUMN: &'static str;

    /// Identifier as a SQLite value
    fn to_key(&self) -> Value;

    /// Reads the identifier from column `idx` of a result row
    fn from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<Self>;

    /// Key used when logging failures for this unit
    fn log_key(&self) -> LogKey;
}

/// Identifier of a restaurant, assigned by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RestaurantId(pub i64);

impl fmt::Display for RestaurantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl WorkUnit for Cell {
    const TABLE: &'static str = "grid";
    const KEY_COLUMN: &'static str = "geohash";

    fn to_key(&self) -> Value {
        Value::Text(self.as_str().to_string())
    }

    fn from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<Self> {
        let hash: String = row.get(idx)?;
        Ok(Cell::from_trusted(hash))
    }

    fn log_key(&self) -> LogKey {
        LogKey::Cell(self.as_str().to_string())
    }
}

impl WorkUnit for RestaurantId {
    const TABLE: &'static str = "restaurants_status";
    const KEY_COLUMN: &'static str = "id";

    fn to_key(&self) -> Value {
        Value::Integer(self.0)
    }

    fn from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<Self> {
        Ok(RestaurantId(row.get(idx)?))
    }

    fn log_key(&self) -> LogKey {
        LogKey::Restaurant(self.0)
    }
}
