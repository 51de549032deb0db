//! Placement filter error types.

use thiserror::Error;

/// Errors raised while building or applying allocation filter settings.
///
/// Negative allocation decisions are not errors; they are returned as
/// [`Decision`](crate::Decision) values.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid IP address [{value}] for [{key}]")]
    InvalidIp { value: String, key: String },

    #[error("cluster state error: {0}")]
    State(#[from] shardgrid_state::StateError),
}

pub type FilterResult<T> = Result<T, FilterError>;
