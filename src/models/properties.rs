//! Property bag attached to test nodes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Well-known property names
pub mod names {
    pub const CATEGORY: &str = "Category";
    pub const DESCRIPTION: &str = "Description";
    /// Abortive time limit in milliseconds
    pub const TIMEOUT: &str = "Timeout";
    /// Non-abortive time limit in milliseconds
    pub const MAX_TIME: &str = "MaxTime";
    pub const REPEAT: &str = "Repeat";
    pub const REQUIRES_THREAD: &str = "RequiresThread";
    pub const ORDER: &str = "Order";
    pub const SET_CULTURE: &str = "SetCulture";
    pub const SKIP_REASON: &str = "SkipReason";
    pub const TYPE: &str = "Type";
}

/// String-keyed, multi-valued metadata
///
/// Keys are kept sorted so two snapshots of the same node compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag(BTreeMap<String, Vec<String>>);

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    /// Replace all values under `key`
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), vec![value.into()]);
    }

    /// First value under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value under `key`, parsed
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
