//! Require / include / exclude allocation filters.
//!
//! Filters are configured per scope under
//! `<scope>.routing.allocation.{require|include|exclude}.<attribute>`.
//! A [`FilterRuleSet`] is the parsed, validated view of one scope's
//! settings. It is immutable: updates produce a new rule set and leave the
//! old one untouched for whoever still holds it.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use shardgrid_state::{DiscoveryNode, Settings};

use crate::error::{FilterError, FilterResult};
use crate::matcher::{is_ip_key, is_ip_literal, is_wildcard, node_matches};

/// Where a filter is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterScope {
    Cluster,
    Index,
}

impl FilterScope {
    /// Settings prefix, without the trailing dot.
    pub fn prefix(self) -> &'static str {
        match self {
            FilterScope::Cluster => "cluster.routing.allocation",
            FilterScope::Index => "index.routing.allocation",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterScope::Cluster => "cluster",
            FilterScope::Index => "index",
        }
    }
}

impl fmt::Display for FilterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a filter constrains nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Every configured attribute must match.
    Require,
    /// Allow-list: every configured attribute must match one of its values.
    Include,
    /// Deny-list: any matching attribute rejects the node.
    Exclude,
}

impl FilterKind {
    pub const ALL: [FilterKind; 3] = [FilterKind::Require, FilterKind::Include, FilterKind::Exclude];

    pub fn as_str(self) -> &'static str {
        match self {
            FilterKind::Require => "require",
            FilterKind::Include => "include",
            FilterKind::Exclude => "exclude",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single configured filter: one attribute, one or more allowed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterRule {
    pub scope: FilterScope,
    pub kind: FilterKind,
    pub key: String,
    pub values: Vec<String>,
}

impl FilterRule {
    /// Whether the node's attribute matches one of the rule's values.
    pub fn matches(&self, node: &DiscoveryNode) -> bool {
        node_matches(node, &self.key, &self.values)
    }
}

/// All rules of one kind at one scope, keyed by attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFilters {
    scope: FilterScope,
    kind: FilterKind,
    rules: BTreeMap<String, FilterRule>,
}

impl NodeFilters {
    fn new(scope: FilterScope, kind: FilterKind) -> Self {
        Self {
            scope,
            kind,
            rules: BTreeMap::new(),
        }
    }

    pub fn scope(&self) -> FilterScope {
        self.scope
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn rule(&self, key: &str) -> Option<&FilterRule> {
        self.rules.get(key)
    }

    /// Rules in attribute-key order.
    pub fn iter(&self) -> impl Iterator<Item = &FilterRule> {
        self.rules.values()
    }

    /// Setting group these rules live under, e.g.
    /// `cluster.routing.allocation.require`.
    pub fn setting_group(&self) -> String {
        format!("{}.{}", self.scope.prefix(), self.kind)
    }

    /// Whether this group lets the node through.
    ///
    /// Require and include pass when every attribute matches (an empty
    /// group passes). Exclude passes when no attribute matches.
    pub fn accepts(&self, node: &DiscoveryNode) -> bool {
        match self.kind {
            FilterKind::Require | FilterKind::Include => self.rules.values().all(|r| r.matches(node)),
            FilterKind::Exclude => !self.rules.values().any(|r| r.matches(node)),
        }
    }
}

impl fmt::Display for NodeFilters {
    /// Renders as `key:"v1 OR v2",other:"v"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.values().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:\"{}\"", rule.key, rule.values.join(" OR "))?;
        }
        Ok(())
    }
}

/// Parsed filters of one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRuleSet {
    scope: FilterScope,
    version: u64,
    require: NodeFilters,
    include: NodeFilters,
    exclude: NodeFilters,
    /// Raw `<scope>.routing.allocation.*` settings this set was built from.
    source: Settings,
}

impl FilterRuleSet {
    /// A rule set with no filters; every node passes.
    pub fn empty(scope: FilterScope) -> Self {
        Self {
            scope,
            version: 0,
            require: NodeFilters::new(scope, FilterKind::Require),
            include: NodeFilters::new(scope, FilterKind::Include),
            exclude: NodeFilters::new(scope, FilterKind::Exclude),
            source: Settings::default(),
        }
    }

    /// Parse and validate the filters of `scope` from raw settings.
    ///
    /// Keys outside the scope's filter groups are ignored. Null values and
    /// values without any token produce no rule. Any invalid IP literal in an
    /// address filter rejects the whole build.
    pub fn build(scope: FilterScope, settings: &Settings) -> FilterResult<Self> {
        let mut set = Self::empty(scope);
        set.source = settings.filter_prefix(&format!("{}.", scope.prefix()));

        for kind in FilterKind::ALL {
            let group = format!("{}.{}.", scope.prefix(), kind);
            for (key, value) in settings.by_prefix(&group) {
                if key.is_empty() || value.is_null() {
                    continue;
                }
                let values = value.tokens();
                if values.is_empty() {
                    continue;
                }
                if is_ip_key(key) {
                    validate_ip_values(&format!("{group}{key}"), &values)?;
                }
                set.filters_mut(kind).rules.insert(
                    key.to_string(),
                    FilterRule {
                        scope,
                        kind,
                        key: key.to_string(),
                        values,
                    },
                );
            }
        }

        debug!(
            scope = %scope,
            require = set.require.len(),
            include = set.include.len(),
            exclude = set.exclude.len(),
            "built allocation filters"
        );
        Ok(set)
    }

    /// Validate filter settings without keeping the result.
    pub fn validate(scope: FilterScope, settings: &Settings) -> FilterResult<()> {
        Self::build(scope, settings).map(|_| ())
    }

    /// Build a new rule set from this one's raw settings with `update`
    /// merged on top. Null values in `update` remove keys. `self` is not
    /// modified; on error nothing is produced.
    pub fn apply_update(&self, update: &Settings) -> FilterResult<Self> {
        let merged = self.source.merge(update);
        let mut next = Self::build(self.scope, &merged)?;
        next.version = self.version;
        Ok(next)
    }

    pub(crate) fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn scope(&self) -> FilterScope {
        self.scope
    }

    /// Snapshot version, bumped by every accepted cluster settings update.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn filters(&self, kind: FilterKind) -> &NodeFilters {
        match kind {
            FilterKind::Require => &self.require,
            FilterKind::Include => &self.include,
            FilterKind::Exclude => &self.exclude,
        }
    }

    fn filters_mut(&mut self, kind: FilterKind) -> &mut NodeFilters {
        match kind {
            FilterKind::Require => &mut self.require,
            FilterKind::Include => &mut self.include,
            FilterKind::Exclude => &mut self.exclude,
        }
    }

    pub fn rule(&self, kind: FilterKind, key: &str) -> Option<&FilterRule> {
        self.filters(kind).rule(key)
    }

    /// Every rule, grouped by kind then ordered by key.
    pub fn rules(&self) -> impl Iterator<Item = &FilterRule> {
        self.require
            .iter()
            .chain(self.include.iter())
            .chain(self.exclude.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.require.is_empty() && self.include.is_empty() && self.exclude.is_empty()
    }

    /// The first group rejecting `node`, checked exclude, then require, then
    /// include. `None` means the node passes this scope.
    pub fn first_violation(&self, node: &DiscoveryNode) -> Option<&NodeFilters> {
        [&self.exclude, &self.require, &self.include]
            .into_iter()
            .find(|filters| !filters.accepts(node))
    }
}

fn validate_ip_values(setting_key: &str, values: &[String]) -> FilterResult<()> {
    match values
        .iter()
        .find(|v| !is_wildcard(v) && !is_ip_literal(v))
    {
        Some(bad) => Err(FilterError::InvalidIp {
            value: bad.clone(),
            key: setting_key.to_string(),
        }),
        None => Ok(()),
    }
}
