//! Grid-Harvester: a grid-partitioned catalog crawler
//!
//! This crate crawls a food-delivery platform's restaurant and menu catalog over
//! a geographic area. The area is split into geohash cells, the cells are queued
//! in a persistent task store, and a pool of worker threads claims, fetches and
//! commits each unit of work.

pub mod config;
pub mod crawler;
pub mod grid;
pub mod output;
pub mod state;
pub mod storage;
pub mod taxonomy;

use thiserror::Error;

/// Main error type for Grid-Harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Grid error: {0}")]
    Grid(#[from] grid::GridError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to build runtime for worker group {group}: {source}")]
    Runtime {
        group: usize,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker {worker} panicked")]
    WorkerPanicked { worker: String },

    #[error("{failed} of {total} workers stopped with an error; first: {first}")]
    WorkersFailed {
        failed: usize,
        total: usize,
        first: Box<HarvestError>,
    },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Grid-Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use grid::{Cell, GridPartitioner};
pub use state::UnitStatus;
pub use taxonomy::Taxonomy;
