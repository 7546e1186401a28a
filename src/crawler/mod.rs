//! Crawler module for fetching the catalog
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching and response classification
//! - JSON payload parsing
//! - The per-thread claim/fetch/flush/finish loop
//! - The two-level worker pool and phase orchestration

mod coordinator;
mod fetcher;
mod parser;
mod pool;
mod retry;
mod worker;

pub use coordinator::{
    http_source_factory, prepare_stores, run_crawl, run_harvest, store_paths, worker_settings,
    HarvestSummary, PhaseSelection,
};
pub use fetcher::{
    build_http_client, fetch_url, menu_url, parse_base_url, restaurants_url, CatalogSource,
    FetchResult, HttpCatalog,
};
pub use parser::{mean_price, parse_menu, parse_restaurants, SpecFood};
pub use pool::{PhaseSummary, WorkerPool};
pub use retry::RetryPolicy;
pub use worker::{FetchWorker, WorkerSettings, WorkerSummary};
