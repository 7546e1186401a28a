//! Breadth-first grid partitioner
//!
//! Expands a central geohash cell ring by ring until the configured depth is
//! reached. Each call to `next()` emits one cell, so very large grids can be
//! streamed straight into the task store without being held in memory twice.

use crate::grid::{Cell, GridError};
use geohash::Direction;
use std::collections::HashSet;

/// Lazily produces every cell within `max_depth` neighbor hops of a central cell
///
/// The sequence is finite and not restartable; build a new partitioner to
/// regenerate it. Emission order is unspecified.
#[derive(Debug)]
pub struct GridPartitioner {
    /// Cells waiting to be emitted at the current depth
    frontier: HashSet<String>,

    /// Neighbors discovered while draining the current frontier
    next_frontier: HashSet<String>,

    /// Cells already emitted (and, below max depth, expanded)
    visited: HashSet<String>,

    max_depth: u32,
    current_depth: u32,
}

impl GridPartitioner {
    /// Creates a partitioner around `central`
    ///
    /// # Arguments
    ///
    /// * `central` - The geohash at the center of the crawl area
    /// * `max_depth` - Maximum number of neighbor hops from the center
    ///
    /// # Returns
    ///
    /// * `Ok(GridPartitioner)` - Ready to iterate
    /// * `Err(GridError)` - `central` is not a valid geohash
    pub fn new(central: &str, max_depth: u32) -> Result<Self, GridError> {
        let central = Cell::parse(central)?;

        geohash::decode(central.as_str()).map_err(|e| GridError::InvalidCell {
            cell: central.to_string(),
            reason: e.to_string(),
        })?;

        let mut frontier = HashSet::new();
        frontier.insert(central.into_string());

        Ok(Self {
            frontier,
            next_frontier: HashSet::new(),
            visited: HashSet::new(),
            max_depth,
            current_depth: 0,
        })
    }

    /// Depth of the ring currently being emitted
    pub fn current_depth(&self) -> u32 {
        self.current_depth
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Number of cells emitted so far
    pub fn emitted(&self) -> usize {
        self.visited.len()
    }

    /// Number of cells a full expansion yields on a regular grid
    ///
    /// Near the poles the real count can be lower because some neighbors do
    /// not exist.
    pub fn expected_cells(max_depth: u32) -> u64 {
        let side = 2 * max_depth as u64 + 1;
        side * side
    }

    /// Swaps the next ring in once the current one is drained
    ///
    /// Returns false when there is nothing left to expand into.
    fn advance_depth(&mut self) -> bool {
        if self.current_depth >= self.max_depth || self.next_frontier.is_empty() {
            return false;
        }

        self.frontier = std::mem::take(&mut self.next_frontier);
        self.current_depth += 1;
        tracing::debug!(
            "Grid expansion at depth {}/{} ({} cells in ring)",
            self.current_depth,
            self.max_depth,
            self.frontier.len()
        );
        true
    }

    /// Queues the unseen neighbors of `cell` for the next ring
    fn add_neighbors(&mut self, cell: &str) {
        let directions = [
            Direction::N,
            Direction::NE,
            Direction::E,
            Direction::SE,
            Direction::S,
            Direction::SW,
            Direction::W,
            Direction::NW,
        ];

        for direction in directions {
            // Cells past the poles have no neighbor in that direction
            let neighbor = match geohash::neighbor(cell, direction) {
                Ok(n) => n,
                Err(e) => {
                    tracing::trace!("No neighbor for {}: {}", cell, e);
                    continue;
                }
            };

            if self.visited.contains(&neighbor)
                || self.frontier.contains(&neighbor)
                || self.next_frontier.contains(&neighbor)
            {
                continue;
            }

            self.next_frontier.insert(neighbor);
        }
    }
}

impl Iterator for GridPartitioner {
    type Item = Cell;

    fn next(&mut self) -> Option<Cell> {
        loop {
            let cell = match self.frontier.iter().next() {
                Some(cell) => cell.clone(),
                None => {
                    if self.advance_depth() {
                        continue;
                    }
                    return None;
                }
            };
            self.frontier.remove(&cell);

            if self.visited.contains(&cell) {
                continue;
            }

            if self.current_depth < self.max_depth {
                self.add_neighbors(&cell);
            }
            self.visited.insert(cell.clone());

            return Some(Cell::from_trusted(cell));
        }
    }
}
