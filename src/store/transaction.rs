//! Staged writes against the store.
//!
//! A [`StoreTransaction`] works on a private copy of the snapshot so that reads
//! inside the transaction see its own writes. It also records every write as a
//! [`Change`]; on commit the changes are replayed onto the store's *current*
//! snapshot, so two transactions touching different subtrees both land. A
//! replay failure (for example an id inserted concurrently) discards the whole
//! transaction.

use std::collections::HashSet;

use crate::core::EngineError;
use crate::models::{Capability, TreeNode};

use super::lock::StoreLock;
use super::snapshot::{CapabilityKey, TreeSnapshot};

#[derive(Debug, Clone)]
pub enum Change {
    InsertNode(TreeNode),
    UpdateNode(TreeNode),
    RemoveNode(String),
    InsertCapability(Capability),
    UpdateCapability(Capability),
    RemoveCapability(CapabilityKey),
}

/// What a cascading node deletion removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionSummary {
    pub node_ids: Vec<String>,
    pub capability_keys: Vec<CapabilityKey>,
}

#[derive(Debug)]
pub struct StoreTransaction {
    working: TreeSnapshot,
    changes: Vec<Change>,
    // Held until the transaction is committed or dropped.
    lock: Option<StoreLock>,
}

impl StoreTransaction {
    pub(crate) fn begin(base: &TreeSnapshot) -> Self {
        Self {
            working: base.clone(),
            changes: Vec::new(),
            lock: None,
        }
    }

    pub(crate) fn holding(mut self, lock: StoreLock) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Whether this transaction holds the store file lock.
    pub const fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// The snapshot as seen from inside the transaction.
    pub const fn view(&self) -> &TreeSnapshot {
        &self.working
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn insert_node(&mut self, node: TreeNode) -> Result<(), EngineError> {
        self.working.insert_node(node.clone())?;
        self.changes.push(Change::InsertNode(node));
        Ok(())
    }

    pub fn update_node(&mut self, node: TreeNode) -> Result<(), EngineError> {
        if !self.working.contains_node(&node.id) {
            return Err(EngineError::NodeNotFound {
                id: node.id,
            });
        }
        self.working.upsert_node(node.clone());
        self.changes.push(Change::UpdateNode(node));
        Ok(())
    }

    pub fn insert_capability(&mut self, capability: Capability) -> Result<(), EngineError> {
        if !self.working.contains_node(capability.node_id()) {
            return Err(EngineError::NodeNotFound {
                id: capability.node_id().to_string(),
            });
        }
        self.working.insert_capability(capability.clone())?;
        self.changes.push(Change::InsertCapability(capability));
        Ok(())
    }

    pub fn update_capability(&mut self, capability: Capability) -> Result<(), EngineError> {
        let key = CapabilityKey::of(&capability);
        if !self.working.contains_capability(&key) {
            return Err(EngineError::CapabilityNotFound {
                kind: key.kind,
                id: key.id,
            });
        }
        self.working.upsert_capability(capability.clone());
        self.changes.push(Change::UpdateCapability(capability));
        Ok(())
    }

    /// Delete a node together with its descendants and every capability they own.
    ///
    /// Rejected with [`EngineError::NodeStillReferenced`] when a capability or
    /// node slot outside the deleted set still points into it.
    pub fn delete_node(&mut self, id: &str) -> Result<DeletionSummary, EngineError> {
        self.delete_nodes(&[id])
    }

    /// Delete several subtrees as one unit. References between the deleted
    /// subtrees do not block the deletion; references from outside do.
    pub fn delete_nodes<S: AsRef<str>>(&mut self, ids: &[S]) -> Result<DeletionSummary, EngineError> {
        let mut node_ids = Vec::new();
        let mut node_set: HashSet<String> = HashSet::new();
        for id in ids {
            let subtree = self.working.subtree_ids(id.as_ref());
            if subtree.is_empty() {
                return Err(EngineError::NodeNotFound {
                    id: id.as_ref().to_string(),
                });
            }
            for node_id in subtree {
                if node_set.insert(node_id.clone()) {
                    node_ids.push(node_id);
                }
            }
        }

        let capability_keys: Vec<CapabilityKey> = node_ids
            .iter()
            .flat_map(|node_id| self.working.owned_capabilities(node_id))
            .map(CapabilityKey::of)
            .collect();

        let capability_set: HashSet<CapabilityKey> = capability_keys.iter().cloned().collect();
        let referrers = self.working.external_referrers(&node_set, &capability_set);
        if !referrers.is_empty() {
            let roots: Vec<&str> = ids.iter().map(AsRef::as_ref).collect();
            return Err(EngineError::NodeStillReferenced {
                id: roots.join(", "),
                referrers: referrers.join(", "),
            });
        }

        for key in &capability_keys {
            self.working.remove_capability(key);
            self.changes.push(Change::RemoveCapability(key.clone()));
        }
        // Children first so the parent index never points at a removed node.
        for node_id in node_ids.iter().rev() {
            self.working.remove_node(node_id);
            self.changes.push(Change::RemoveNode(node_id.clone()));
        }

        Ok(DeletionSummary {
            node_ids,
            capability_keys,
        })
    }

    /// Replay the recorded changes onto `target`.
    pub(crate) fn apply_to(&self, target: &mut TreeSnapshot) -> Result<(), EngineError> {
        for change in &self.changes {
            match change {
                Change::InsertNode(node) => target.insert_node(node.clone())?,
                Change::UpdateNode(node) => {
                    if !target.contains_node(&node.id) {
                        return Err(EngineError::NodeNotFound {
                            id: node.id.clone(),
                        });
                    }
                    target.upsert_node(node.clone());
                }
                Change::RemoveNode(id) => {
                    target.remove_node(id);
                }
                Change::InsertCapability(capability) => {
                    target.insert_capability(capability.clone())?;
                }
                Change::UpdateCapability(capability) => {
                    let key = CapabilityKey::of(capability);
                    if !target.contains_capability(&key) {
                        return Err(EngineError::CapabilityNotFound {
                            kind: key.kind,
                            id: key.id,
                        });
                    }
                    target.upsert_capability(capability.clone());
                }
                Change::RemoveCapability(key) => {
                    target.remove_capability(key);
                }
            }
        }
        Ok(())
    }
}
