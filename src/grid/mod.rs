//! Spatial grid generation
//!
//! A crawl area is described by a central geohash cell and an expansion depth.
//! This module turns that description into the full set of cells to crawl.
//!
//! # Components
//!
//! - `Cell`: A validated geohash string of fixed precision
//! - `GridPartitioner`: Breadth-first expansion of the central cell over the
//!   geohash neighbor relation

mod partitioner;

pub use partitioner::GridPartitioner;

use std::fmt;
use thiserror::Error;

/// Characters allowed in a geohash string
const GEOHASH_ALPHABET: &str = "0123456789bcdefghjkmnpqrstuvwxyz";

/// Longest geohash the partitioner accepts
pub const MAX_PRECISION: usize = 12;

/// Errors raised while building a grid
#[derive(Debug, Error)]
pub enum GridError {
    #[error("Invalid geohash cell '{cell}': {reason}")]
    InvalidCell { cell: String, reason: String },
}

/// A geohash cell identifying a small rectangular region
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell(String);

impl Cell {
    /// Parses and validates a geohash string
    ///
    /// The string must be 1 to 12 characters from the geohash base32 alphabet.
    /// Upper-case input is accepted and normalized to lower case.
    pub fn parse(hash: &str) -> Result<Self, GridError> {
        let normalized = hash.trim().to_ascii_lowercase();

        if normalized.is_empty() || normalized.len() > MAX_PRECISION {
            return Err(GridError::InvalidCell {
                cell: hash.to_string(),
                reason: format!("length must be between 1 and {}", MAX_PRECISION),
            });
        }

        if let Some(bad) = normalized.chars().find(|c| !GEOHASH_ALPHABET.contains(*c)) {
            return Err(GridError::InvalidCell {
                cell: hash.to_string(),
                reason: format!("character '{}' is not part of the geohash alphabet", bad),
            });
        }

        Ok(Self(normalized))
    }

    /// Wraps a string already known to be a valid geohash
    pub(crate) fn from_trusted(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of characters, i.e. the geohash precision
    pub fn precision(&self) -> usize {
        self.0.len()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
