//! Validated updates of index-scoped settings.
//!
//! Index settings live on the index metadata in the cluster state. Updates
//! are merged onto the current settings and the index filters are rebuilt
//! from the result before anything is written, so a rejected update leaves
//! the index's previous settings, and its previous filters, in force.

use tracing::{info, warn};

use shardgrid_state::{ClusterState, Settings};

use crate::error::FilterResult;
use crate::filters::{FilterRuleSet, FilterScope};

/// Merge `update` onto the settings of `index`. Null values remove keys.
///
/// Returns the filters now in force for the index.
pub fn update_index_settings(
    state: &mut ClusterState,
    index: &str,
    update: &Settings,
) -> FilterResult<FilterRuleSet> {
    let metadata = state.index_mut(index)?;
    let merged = metadata.settings.merge(update);
    let filters = FilterRuleSet::build(FilterScope::Index, &merged)
        .inspect_err(|err| warn!(index, error = %err, "rejected index settings update"))?;

    metadata.settings = merged;
    info!(index, rules = filters.rules().count(), "index settings applied");
    Ok(filters)
}
