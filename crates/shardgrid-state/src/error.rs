//! Error types for the shardgrid cluster state.

use thiserror::Error;

/// Result type alias for cluster state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur when reading or updating cluster state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("index not found: {0}")]
    UnknownIndex(String),

    #[error("shard not found: {0}")]
    UnknownShard(String),

    #[error("node not found: {0}")]
    UnknownNode(String),
}
