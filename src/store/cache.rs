//! Best-effort cache of computed node values.
//!
//! Evaluators write here after computing a node's active capability. Writes are
//! last-writer-wins and never take the store lock; a stale entry is corrected
//! the next time the node is evaluated.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedValue {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ValueCache {
    entries: DashMap<String, CachedValue>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<String, CachedValue>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, node_id: &str) -> Option<CachedValue> {
        self.entries.get(node_id).map(|entry| entry.value().clone())
    }

    pub fn value(&self, node_id: &str) -> Option<Value> {
        self.entries.get(node_id).map(|entry| entry.value().value.clone())
    }

    pub fn put(&self, node_id: impl Into<String>, value: Value, trace: Option<String>) {
        self.entries.insert(
            node_id.into(),
            CachedValue {
                value,
                trace,
                computed_at: Utc::now(),
            },
        );
    }

    pub fn remove(&self, node_id: &str) {
        self.entries.remove(node_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take in entries read back from disk. The more recently computed value wins.
    pub fn merge(&self, entries: BTreeMap<String, CachedValue>) {
        for (node_id, incoming) in entries {
            match self.entries.get(&node_id) {
                Some(current) if current.computed_at >= incoming.computed_at => {}
                _ => {
                    self.entries.insert(node_id, incoming);
                }
            }
        }
    }

    /// Ordered copy for persistence.
    pub fn to_entries(&self) -> BTreeMap<String, CachedValue> {
        self.entries.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect()
    }
}
