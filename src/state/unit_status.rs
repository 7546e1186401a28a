/// Work unit state definitions
///
/// A unit moves `Pending -> Claimed -> {Done, NotFound, Failed}` and never
/// moves backwards, except when the opt-in lease reaper returns an expired
/// claim to `Pending`.
use std::fmt;

/// Represents the current state of a work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitStatus {
    // ===== Active States =====
    /// Waiting to be claimed by a worker
    Pending,

    /// Claimed by a worker that has not finished it yet
    Claimed,

    // ===== Terminal States =====
    /// All remote fetches succeeded and the records were written
    Done,

    /// The remote service answered 404 for this restaurant
    NotFound,

    /// A bounded retry policy gave up on at least one request
    Failed,
}

impl UnitStatus {
    /// Returns true if no further processing is expected for this unit
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Claimed)
    }

    /// Returns true if `self -> next` is a legal transition
    pub fn can_transition_to(&self, next: UnitStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Claimed) => true,
            (Self::Claimed, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Integer code stored in the status tables
    pub fn to_db_code(&self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Claimed => 1,
            Self::Done => 2,
            Self::Failed => 3,
            Self::NotFound => 404,
        }
    }

    /// Parses a status code read back from the status tables
    ///
    /// Returns None if the code doesn't match any known status.
    pub fn from_db_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::Claimed),
            2 => Some(Self::Done),
            3 => Some(Self::Failed),
            404 => Some(Self::NotFound),
            _ => None,
        }
    }

    /// Returns all possible unit states
    pub fn all_states() -> [Self; 5] {
        [
            Self::Pending,
            Self::Claimed,
            Self::Done,
            Self::NotFound,
            Self::Failed,
        ]
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Done => "done",
            Self::NotFound => "not_found",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// The two crawl phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Grid cells: restaurant lists per (cell, category)
    Restaurants,

    /// Restaurant ids: one menu per restaurant
    Menus,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Restaurants => "restaurants",
            Self::Menus => "menus",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
