//! Storage module for persisting crawl state
//!
//! A crawl is backed by three SQLite files:
//! - the status store, holding the two work queues and crawl metadata
//! - the data store, holding restaurants, menus and category links
//! - the log store, holding remote failures keyed by work unit
//!
//! Every handle owns its own connection. Handles are opened per worker thread
//! and never shared.

mod log_store;
mod record_store;
mod schema;
mod sqlite;
mod task_store;
mod traits;

pub use log_store::{HttpErrorEntry, LogStore};
pub use record_store::{CategoryLink, MenuItem, RecordStore, Restaurant, RestaurantBatch};
pub use schema::StoreKind;
pub use sqlite::{
    bootstrap, default_store_name, open_connection, read_all_meta, read_meta, timestamp_now,
    write_meta, StorePaths,
};
pub use task_store::TaskStore;
pub use traits::{LogKey, RestaurantId, StorageError, StorageResult, WorkUnit};

use crate::grid::{Cell, GridPartitioner};
use std::time::Duration;

/// Queues every cell the partitioner produces
///
/// Cells already in the grid table keep their status. Returns the number of
/// newly queued cells.
pub fn seed_grid(
    paths: &StorePaths,
    partitioner: GridPartitioner,
    busy_timeout: Duration,
) -> StorageResult<usize> {
    let mut tasks: TaskStore<Cell> = TaskStore::open(&paths.status, busy_timeout)?;
    let inserted = tasks.seed(partitioner)?;
    tracing::debug!("Seeded {} grid cells", inserted);
    Ok(inserted)
}

/// Queues every restaurant in the data store for the menu phase
///
/// Restaurants already queued, including finished ones, are not re-queued.
pub fn seed_restaurants(paths: &StorePaths, busy_timeout: Duration) -> StorageResult<usize> {
    let records = RecordStore::open(&paths.data, busy_timeout)?;
    let ids = records.restaurant_ids()?;

    let mut tasks: TaskStore<RestaurantId> = TaskStore::open(&paths.status, busy_timeout)?;
    let inserted = tasks.seed(ids.into_iter().map(RestaurantId))?;
    tracing::debug!("Seeded {} restaurants", inserted);
    Ok(inserted)
}
