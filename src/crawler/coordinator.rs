//! Crawl coordinator - phase orchestration
//!
//! This module ties the pieces of a crawl together:
//! - Preparing the three stores and recording crawl metadata
//! - Seeding the grid queue from the partitioner
//! - Running the restaurant phase, seeding the menu queue, running the menu
//!   phase
//! - Building the per-group HTTP sources

use crate::config::Config;
use crate::crawler::fetcher::{CatalogSource, HttpCatalog};
use crate::crawler::pool::{PhaseSummary, WorkerPool};
use crate::crawler::retry::RetryPolicy;
use crate::crawler::worker::WorkerSettings;
use crate::grid::GridPartitioner;
use crate::state::Phase;
use crate::storage::{
    bootstrap, read_all_meta, seed_grid, seed_restaurants, write_meta, RecordStore, StorePaths,
};
use crate::taxonomy::Taxonomy;
use crate::{HarvestError, Result};
use std::sync::Arc;

/// Which phases a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSelection {
    /// Restaurants, then menus for every restaurant found
    All,
    Restaurants,
    Menus,
}

impl PhaseSelection {
    pub fn includes(&self, phase: Phase) -> bool {
        matches!(
            (self, phase),
            (Self::All, _)
                | (Self::Restaurants, Phase::Restaurants)
                | (Self::Menus, Phase::Menus)
        )
    }
}

/// What a harvest run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    pub seeded_cells: usize,
    pub seeded_restaurants: usize,
    pub restaurants: Option<PhaseSummary>,
    pub menus: Option<PhaseSummary>,
}

/// Worker settings derived from the configuration
pub fn worker_settings(config: &Config) -> WorkerSettings {
    WorkerSettings::new(Taxonomy::from_config(&config.taxonomy))
        .with_retry(RetryPolicy::from_config(&config.retry))
        .with_busy_timeout(config.pool.busy_timeout())
        .with_lease_timeout(config.pool.lease_timeout())
}

/// Store set named by the config, or by today's date
pub fn store_paths(config: &Config) -> StorePaths {
    let dir = std::path::Path::new(&config.storage.directory);
    match &config.storage.name {
        Some(name) => StorePaths::for_name(dir, name),
        None => StorePaths::for_today(dir),
    }
}

/// Creates (or with `fresh`, resets) the stores and records crawl metadata
///
/// The category table is loaded from the taxonomy. On resume, a mismatch
/// between the stored and configured crawl area is logged; the queue keeps
/// the cells it already holds.
pub fn prepare_stores(
    config: &Config,
    paths: &StorePaths,
    fresh: bool,
    config_hash: Option<&str>,
) -> Result<()> {
    let busy_timeout = config.pool.busy_timeout();
    bootstrap(paths, fresh, busy_timeout)?;

    let taxonomy = Taxonomy::from_config(&config.taxonomy);
    let mut records = RecordStore::open(&paths.data, busy_timeout)?;
    let loaded = records.load_categories(&taxonomy)?;
    tracing::debug!("Loaded {} categories", loaded);

    let existing = read_all_meta(paths, busy_timeout)?;
    let central = config.grid.central.to_ascii_lowercase();
    let depth = config.grid.depth.to_string();

    if let (Some(stored_central), Some(stored_depth)) =
        (existing.get("central"), existing.get("depth"))
    {
        if stored_central != &central || stored_depth != &depth {
            tracing::warn!(
                "Store was seeded with central {} depth {}, config asks for central {} depth {}",
                stored_central,
                stored_depth,
                central,
                depth
            );
        }
    }

    let mut entries = vec![("central", central), ("depth", depth)];
    if let Some(hash) = config_hash {
        entries.push(("config_hash", hash.to_string()));
    }
    if !existing.contains_key("created_at") {
        entries.push(("created_at", crate::storage::timestamp_now()));
    }
    write_meta(paths, &entries, busy_timeout)?;

    Ok(())
}

/// Returns a factory building one HTTP source per worker group
///
/// Each group gets its own multi-threaded runtime and client.
pub fn http_source_factory(config: &Config) -> impl Fn(usize) -> Result<HttpCatalog> + Sync + '_ {
    move |group| {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.pool.threads.clamp(1, 4))
            .thread_name(format!("harvest-io-g{}", group))
            .enable_all()
            .build()
            .map_err(|source| HarvestError::Runtime { group, source })?;

        HttpCatalog::new(Arc::new(runtime), &config.remote, &config.user_agent)
    }
}

/// Runs the selected phases against prepared stores
///
/// The grid queue is seeded from the configured central cell and depth; cells
/// already queued keep their status. The menu queue is seeded from every
/// restaurant in the data store before the menu phase.
pub fn run_harvest<S, F>(
    config: &Config,
    paths: &StorePaths,
    selection: PhaseSelection,
    make_source: F,
) -> Result<HarvestSummary>
where
    S: CatalogSource,
    F: Fn(usize) -> Result<S> + Sync,
{
    let settings = worker_settings(config);
    let pool = WorkerPool::from_config(&config.pool);
    let busy_timeout = settings.busy_timeout;
    let mut summary = HarvestSummary::default();

    if selection.includes(Phase::Restaurants) {
        let partitioner = GridPartitioner::new(&config.grid.central, config.grid.depth)?;
        summary.seeded_cells = seed_grid(paths, partitioner, busy_timeout)?;
        tracing::info!("Queued {} new grid cells", summary.seeded_cells);

        summary.restaurants = Some(pool.run(Phase::Restaurants, paths, &settings, &make_source)?);
    }

    if selection.includes(Phase::Menus) {
        summary.seeded_restaurants = seed_restaurants(paths, busy_timeout)?;
        tracing::info!("Queued {} new restaurants", summary.seeded_restaurants);

        summary.menus = Some(pool.run(Phase::Menus, paths, &settings, &make_source)?);
    }

    Ok(summary)
}

/// Prepares the stores and runs the selected phases over HTTP
pub fn run_crawl(
    config: &Config,
    paths: &StorePaths,
    selection: PhaseSelection,
    fresh: bool,
    config_hash: Option<&str>,
) -> Result<HarvestSummary> {
    prepare_stores(config, paths, fresh, config_hash)?;
    run_harvest(config, paths, selection, http_source_factory(config))
}
