//! State module for tracking work unit progress
//!
//! # Components
//!
//! - `UnitStatus`: Lifecycle of a work unit in the task store
//! - `Phase`: Which crawl phase a worker is running

mod unit_status;

// Re-export main types
pub use unit_status::{Phase, UnitStatus};
