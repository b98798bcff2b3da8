//! Error types for routecast-repair.

use thiserror::Error;

/// Result type for routecast-repair operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for routecast-repair operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Received ranges violate the sorted/disjoint invariant.
    #[error("Invalid range list: {0}")]
    InvalidRanges(String),
}

impl Error {
    /// Create an invalid range list error.
    pub fn invalid_ranges(msg: impl Into<String>) -> Self {
        Self::InvalidRanges(msg.into())
    }
}
