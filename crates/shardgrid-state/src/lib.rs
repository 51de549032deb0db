//! Cluster state consumed by shard placement.
//!
//! Describes the read-only inputs of allocation deciders: node identity
//! and attributes, shard copies with their routing state and recovery
//! source, index metadata (settings, resize source, in-sync allocation
//! registry) and the routing table.
//!
//! Settings are kept raw (`Settings`): flat, fully-qualified keys with
//! string, list or null values. Interpretation of allocation settings
//! lives in `shardgrid-placement`.

pub mod error;
pub mod settings;
pub mod types;

pub use error::{StateError, StateResult};
pub use settings::{SettingValue, Settings, SettingsBuilder};
pub use types::*;
