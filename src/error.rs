//! Error types for routecast.

use std::io;
use thiserror::Error;

/// Result type for routecast operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for routecast operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Source URL is not a recognized broadcast scheme.
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The demultiplexer failed internally.
    #[error("Demux failure: {0}")]
    Demux(String),
}

impl Error {
    /// Create an invalid source error.
    pub fn invalid_source(msg: impl Into<String>) -> Self {
        Self::InvalidSource(msg.into())
    }

    /// Create an invalid config error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a demux failure error.
    pub fn demux(msg: impl Into<String>) -> Self {
        Self::Demux(msg.into())
    }
}
