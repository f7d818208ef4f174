//! Id maps produced by the first two duplication passes.
//!
//! Both maps are built by a builder and frozen before the rewrite pass starts;
//! the frozen types expose lookups only.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::CapabilityKind;

/// `original node id -> clone id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NodeIdMap(BTreeMap<String, String>);

impl NodeIdMap {
    pub(crate) fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.0.get(original).map(String::as_str)
    }

    pub fn contains(&self, original: &str) -> bool {
        self.0.contains_key(original)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(original, clone)| (original.as_str(), clone.as_str()))
    }

    pub fn to_btree(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}

/// `original capability id -> clone id`, one map per kind, plus the exposed
/// keys of cloned variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityIdMaps {
    ids: BTreeMap<CapabilityKind, BTreeMap<String, String>>,
    variable_keys: BTreeMap<String, String>,
}

impl CapabilityIdMaps {
    pub fn get(&self, kind: CapabilityKind, original: &str) -> Option<&str> {
        self.ids.get(&kind).and_then(|ids| ids.get(original)).map(String::as_str)
    }

    /// Variables are referenced by id or by exposed key; returns the clone's
    /// id or key to match.
    pub fn variable(&self, id_or_key: &str) -> Option<&str> {
        self.get(CapabilityKind::Variable, id_or_key)
            .or_else(|| self.variable_keys.get(id_or_key).map(String::as_str))
    }

    pub fn count(&self, kind: CapabilityKind) -> usize {
        self.ids.get(&kind).map_or(0, BTreeMap::len)
    }

    pub fn total(&self) -> usize {
        self.ids.values().map(BTreeMap::len).sum()
    }

    /// Clone counts per kind, for reports.
    pub fn counts(&self) -> BTreeMap<CapabilityKind, usize> {
        CapabilityKind::ALL.into_iter().map(|kind| (kind, self.count(kind))).filter(|(_, n)| *n > 0).collect()
    }
}

#[derive(Debug, Default)]
pub(crate) struct CapabilityIdMapsBuilder {
    maps: CapabilityIdMaps,
}

impl CapabilityIdMapsBuilder {
    pub(crate) fn record(&mut self, kind: CapabilityKind, original: &str, clone: &str) {
        self.maps.ids.entry(kind).or_default().insert(original.to_string(), clone.to_string());
    }

    pub(crate) fn record_variable_key(&mut self, original: &str, clone: &str) {
        self.maps.variable_keys.insert(original.to_string(), clone.to_string());
    }

    pub(crate) fn freeze(self) -> CapabilityIdMaps {
        self.maps
    }
}
