use std::path::Path;

use shardgrid_placement::{FilterRuleSet, FilterScope};
use tracing::info;

use crate::scenario::load_settings;

/// Validate the allocation filters of both scopes in a settings file.
pub fn validate(path: &str) -> anyhow::Result<()> {
    let settings = load_settings(Path::new(path))?;
    let count = count_rules(&settings)?;
    info!(path, rules = count, "settings validated");
    println!("✓ {count} filter rules valid in {path}");
    Ok(())
}

fn count_rules(settings: &shardgrid_state::Settings) -> anyhow::Result<usize> {
    let mut count = 0;
    for scope in [FilterScope::Cluster, FilterScope::Index] {
        count += FilterRuleSet::build(scope, settings)?.rules().count();
    }
    Ok(count)
}
