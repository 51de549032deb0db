//! Cluster filter settings holder.
//!
//! Keeps the current cluster-scope [`FilterRuleSet`] behind an `ArcSwap`.
//! Readers take an `Arc` to the current snapshot without locking and keep
//! evaluating against it for as long as they hold it. Writers build a
//! complete new snapshot first and only then swap it in, so a reader sees
//! either the old rules or the new rules, never a mix. A rejected update
//! leaves the current snapshot in place.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tracing::{info, warn};

use shardgrid_state::Settings;

use crate::error::FilterResult;
use crate::filters::{FilterRuleSet, FilterScope};

/// Atomically swappable cluster filter rules.
pub struct ClusterFilterSettings {
    current: ArcSwap<FilterRuleSet>,
    /// Serializes writers so that read-modify-write updates do not race.
    write_lock: Mutex<()>,
}

impl ClusterFilterSettings {
    /// Start with no cluster filters.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(FilterRuleSet::empty(FilterScope::Cluster)),
            write_lock: Mutex::new(()),
        }
    }

    /// Start from the given cluster settings.
    pub fn from_settings(settings: &Settings) -> FilterResult<Self> {
        let rules = FilterRuleSet::build(FilterScope::Cluster, settings)?;
        Ok(Self {
            current: ArcSwap::from_pointee(rules),
            write_lock: Mutex::new(()),
        })
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<FilterRuleSet> {
        self.current.load_full()
    }

    /// Replace the cluster settings wholesale. Filters absent from
    /// `settings` are removed.
    pub fn apply_settings(&self, settings: &Settings) -> FilterResult<Arc<FilterRuleSet>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current.load();
        let next = FilterRuleSet::build(FilterScope::Cluster, settings)
            .inspect_err(|err| warn!(error = %err, "rejected cluster filter settings"))?;
        Ok(self.swap(next, current.version()))
    }

    /// Merge a partial update onto the current settings. Null values remove
    /// filters; keys not mentioned keep their value.
    pub fn update_settings(&self, update: &Settings) -> FilterResult<Arc<FilterRuleSet>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current.load();
        let next = current
            .apply_update(update)
            .inspect_err(|err| warn!(error = %err, "rejected cluster filter update"))?;
        Ok(self.swap(next, current.version()))
    }

    fn swap(&self, next: FilterRuleSet, previous_version: u64) -> Arc<FilterRuleSet> {
        let next = Arc::new(next.with_version(previous_version + 1));
        self.current.store(Arc::clone(&next));
        info!(
            version = next.version(),
            rules = next.rules().count(),
            "cluster filter settings applied"
        );
        next
    }
}

impl Default for ClusterFilterSettings {
    fn default() -> Self {
        Self::new()
    }
}
