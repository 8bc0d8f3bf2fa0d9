//! Error types for dispatch-rs.
//!
//! Queue operations never fail; these cover engine startup, configuration,
//! and plan loading.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
