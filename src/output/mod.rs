//! Output module for reporting crawl results
//!
//! This module handles:
//! - Loading queue, record and failure counts from the stores
//! - Printing them as a readable report

pub mod stats;

pub use stats::{load_statistics, print_statistics, HarvestStatistics, PhaseStatistics};
