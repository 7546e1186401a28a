//! Configuration module for Grid-Harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use grid_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Grid depth: {}", config.grid.depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, GridConfig, MajorCategoryEntry, MinorCategoryEntry, PoolConfig, RemoteConfig,
    RetryConfig, StorageConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
