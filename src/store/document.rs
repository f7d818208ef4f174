//! On-disk JSON shape of the store.
//!
//! ```json
//! {
//!   "version": 1,
//!   "nodes": [ { "id": "roof", "treeId": "quote", "type": "section" } ],
//!   "formulas": [ { "id": "f-area", "nodeId": "area", "tokens": ["@value.w", "*", "@value.l"] } ],
//!   "conditions": [],
//!   "tables": [],
//!   "variables": [],
//!   "cache": {}
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::EngineError;
use crate::models::{Capability, Condition, Formula, Table, TreeNode, Variable};

use super::cache::CachedValue;
use super::snapshot::TreeSnapshot;

pub const DOCUMENT_VERSION: u32 = 1;

const fn default_version() -> u32 {
    DOCUMENT_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub nodes: Vec<TreeNode>,
    #[serde(default)]
    pub formulas: Vec<Formula>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cache: BTreeMap<String, CachedValue>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            nodes: Vec::new(),
            formulas: Vec::new(),
            conditions: Vec::new(),
            tables: Vec::new(),
            variables: Vec::new(),
            cache: BTreeMap::new(),
        }
    }
}

impl StoreDocument {
    /// Build the indexed snapshot. Duplicate ids are reported as corruption.
    pub fn into_snapshot(self) -> Result<(TreeSnapshot, BTreeMap<String, CachedValue>), EngineError> {
        if self.version > DOCUMENT_VERSION {
            return Err(EngineError::StoreCorrupted {
                reason: format!(
                    "document version {} is newer than supported version {DOCUMENT_VERSION}",
                    self.version
                ),
            });
        }

        let mut snapshot = TreeSnapshot::new();
        for node in self.nodes {
            let id = node.id.clone();
            snapshot.insert_node(node).map_err(|_| EngineError::StoreCorrupted {
                reason: format!("duplicate node id '{id}'"),
            })?;
        }

        let capabilities = self
            .formulas
            .into_iter()
            .map(Capability::Formula)
            .chain(self.conditions.into_iter().map(Capability::Condition))
            .chain(self.tables.into_iter().map(Capability::Table))
            .chain(self.variables.into_iter().map(Capability::Variable));
        for capability in capabilities {
            let label = format!("{} '{}'", capability.kind(), capability.id());
            snapshot.insert_capability(capability).map_err(|_| EngineError::StoreCorrupted {
                reason: format!("duplicate {label}"),
            })?;
        }

        Ok((snapshot, self.cache))
    }

    pub fn from_snapshot(snapshot: &TreeSnapshot, cache: BTreeMap<String, CachedValue>) -> Self {
        let mut document = Self {
            nodes: snapshot.nodes().cloned().collect(),
            cache,
            ..Self::default()
        };
        for capability in snapshot.capabilities() {
            match capability.clone() {
                Capability::Formula(f) => document.formulas.push(f),
                Capability::Condition(c) => document.conditions.push(c),
                Capability::Table(t) => document.tables.push(t),
                Capability::Variable(v) => document.variables.push(v),
            }
        }
        document
    }
}

/// Read a store document from disk.
pub async fn load_document(path: &Path) -> Result<StoreDocument> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(EngineError::StoreNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read store file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse store file: {}", path.display()))
}

/// Write a store document to disk atomically.
pub async fn save_document(path: &Path, document: StoreDocument) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || crate::utils::write_json_file(&path, &document, true))
        .await
        .context("Store write task failed")?
}
