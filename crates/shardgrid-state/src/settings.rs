//! Flat, fully-qualified settings as operators submit them.
//!
//! Keys look like `cluster.routing.allocation.require._name`. A value is a
//! single string, a list of strings, or an explicit null. A null in an
//! update removes the key from the merged result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A raw setting value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Single(String),
    List(Vec<String>),
    Null,
}

impl SettingValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SettingValue::Null)
    }

    /// Normalized tokens of this value.
    ///
    /// A single string is split on commas. List elements are split the same
    /// way, so `"a,b"` and `["a", "b"]` yield identical tokens. Tokens are
    /// trimmed; empty tokens are dropped.
    pub fn tokens(&self) -> Vec<String> {
        match self {
            SettingValue::Single(s) => split_tokens(s).collect(),
            SettingValue::List(items) => items.iter().flat_map(|s| split_tokens(s)).collect(),
            SettingValue::Null => Vec::new(),
        }
    }
}

fn split_tokens(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Single(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Single(value)
    }
}

impl From<Vec<String>> for SettingValue {
    fn from(values: Vec<String>) -> Self {
        SettingValue::List(values)
    }
}

impl From<Vec<&str>> for SettingValue {
    fn from(values: Vec<&str>) -> Self {
        SettingValue::List(values.into_iter().map(str::to_string).collect())
    }
}

/// An ordered map of fully-qualified setting keys to raw values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    entries: BTreeMap<String, SettingValue>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.entries.get(key)
    }

    /// Normalized tokens for `key`, or `None` when the key is absent or null.
    pub fn get_as_list(&self, key: &str) -> Option<Vec<String>> {
        match self.entries.get(key) {
            None | Some(SettingValue::Null) => None,
            Some(value) => Some(value.tokens()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Entries whose key starts with `prefix`, yielded with the prefix stripped.
    pub fn by_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a SettingValue)> + 'a {
        self.entries
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(move |(k, v)| (&k[prefix.len()..], v))
    }

    /// Keep only the entries whose key starts with `prefix`.
    pub fn filter_prefix(&self, prefix: &str) -> Settings {
        Settings {
            entries: self
                .by_prefix(prefix)
                .map(|(suffix, v)| (format!("{prefix}{suffix}"), v.clone()))
                .collect(),
        }
    }

    /// Apply `update` on top of `self`. Null values in `update` remove keys.
    pub fn merge(&self, update: &Settings) -> Settings {
        let mut entries = self.entries.clone();
        for (key, value) in &update.entries {
            if value.is_null() {
                entries.remove(key);
            } else {
                entries.insert(key.clone(), value.clone());
            }
        }
        Settings { entries }
    }
}

impl FromIterator<(String, SettingValue)> for Settings {
    fn from_iter<I: IntoIterator<Item = (String, SettingValue)>>(iter: I) -> Self {
        Settings {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Builder for [`Settings`].
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    entries: BTreeMap<String, SettingValue>,
}

impl SettingsBuilder {
    pub fn put(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn put_list<S: Into<String>>(
        mut self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.entries.insert(key.into(), SettingValue::List(values));
        self
    }

    pub fn put_null(mut self, key: impl Into<String>) -> Self {
        self.entries.insert(key.into(), SettingValue::Null);
        self
    }

    pub fn build(self) -> Settings {
        Settings {
            entries: self.entries,
        }
    }
}
