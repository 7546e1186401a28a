//! Statistics generation from the crawl stores
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the status, data and log stores.

use crate::grid::Cell;
use crate::state::{Phase, UnitStatus};
use crate::storage::{
    read_all_meta, LogStore, RecordStore, RestaurantId, StorePaths, TaskStore, WorkUnit,
};
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Queue state and failure counts for one phase
#[derive(Debug, Clone, Default)]
pub struct PhaseStatistics {
    /// Total number of units queued
    pub total_units: u64,

    /// Count of units by status
    pub units_by_status: HashMap<UnitStatus, u64>,

    /// Non-2xx responses logged
    pub http_errors: u64,

    /// Transport and decoding failures logged
    pub exceptions: u64,
}

impl PhaseStatistics {
    pub fn count(&self, status: UnitStatus) -> u64 {
        self.units_by_status.get(&status).copied().unwrap_or(0)
    }

    /// Units in a terminal status
    pub fn finished(&self) -> u64 {
        UnitStatus::all_states()
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| self.count(*s))
            .sum()
    }
}

/// Crawl statistics summary
#[derive(Debug, Clone, Default)]
pub struct HarvestStatistics {
    /// Crawl metadata recorded when the stores were prepared
    pub meta: BTreeMap<String, String>,

    pub restaurants_phase: PhaseStatistics,
    pub menus_phase: PhaseStatistics,

    pub restaurants: u64,
    pub menus: u64,
    pub category_links: u64,
}

/// Loads statistics from the three stores
///
/// # Arguments
///
/// * `paths` - The store set to query
/// * `busy_timeout` - Lock wait, in case a crawl is running against the stores
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(paths: &StorePaths, busy_timeout: Duration) -> Result<HarvestStatistics> {
    let records = RecordStore::open(&paths.data, busy_timeout)?;
    let logs = LogStore::open(&paths.log, busy_timeout)?;

    let grid: TaskStore<Cell> = TaskStore::open(&paths.status, busy_timeout)?;
    let restaurant_queue: TaskStore<RestaurantId> = TaskStore::open(&paths.status, busy_timeout)?;

    Ok(HarvestStatistics {
        meta: read_all_meta(paths, busy_timeout)?.into_iter().collect(),
        restaurants_phase: phase_statistics(&grid, &logs, Phase::Restaurants)?,
        menus_phase: phase_statistics(&restaurant_queue, &logs, Phase::Menus)?,
        restaurants: records.count_restaurants()?,
        menus: records.count_menus()?,
        category_links: records.count_category_links()?,
    })
}

fn phase_statistics<U: WorkUnit>(
    tasks: &TaskStore<U>,
    logs: &LogStore,
    phase: Phase,
) -> Result<PhaseStatistics> {
    let mut units_by_status = HashMap::new();
    for status in UnitStatus::all_states() {
        let count = tasks.count_by_status(status)?;
        if count > 0 {
            units_by_status.insert(status, count);
        }
    }

    Ok(PhaseStatistics {
        total_units: tasks.count_total()?,
        units_by_status,
        http_errors: logs.count_http_errors(phase)?,
        exceptions: logs.count_exceptions(phase)?,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    if !stats.meta.is_empty() {
        println!("Crawl:");
        for (key, value) in &stats.meta {
            println!("  {}: {}", key, value);
        }
        println!();
    }

    print_phase("Grid cells (restaurants phase)", &stats.restaurants_phase);
    print_phase("Restaurants (menus phase)", &stats.menus_phase);

    println!("Records:");
    println!("  Restaurants: {}", stats.restaurants);
    println!("  Category links: {}", stats.category_links);
    println!("  Menu items: {}", stats.menus);
}

fn print_phase(title: &str, phase: &PhaseStatistics) {
    println!("{}:", title);
    println!("  Total: {}", phase.total_units);

    for status in UnitStatus::all_states() {
        let count = phase.count(status);
        if count == 0 {
            continue;
        }
        let percentage = if phase.total_units > 0 {
            (count as f64 / phase.total_units as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }

    println!(
        "  Logged failures: {} HTTP errors, {} exceptions",
        phase.http_errors, phase.exceptions
    );
    println!();
}
