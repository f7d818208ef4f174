//! Immutable view of the whole store.
//!
//! A [`TreeSnapshot`] owns every node and capability record together with two
//! indices (children per parent and capabilities per owner). Evaluators read a
//! shared `Arc<TreeSnapshot>`; transactions work on a private clone.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;

use crate::core::EngineError;
use crate::models::{
    Capability, CapabilityKind, Condition, Formula, Table, TreeNode, Variable,
};
use crate::reference::ParsedReference;

/// Capability ids are unique per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityKey {
    pub kind: CapabilityKind,
    pub id: String,
}

impl CapabilityKey {
    pub fn new(kind: CapabilityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn of(capability: &Capability) -> Self {
        Self::new(capability.kind(), capability.id())
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// What a reference resolves to.
#[derive(Debug, Clone, Copy)]
pub enum ReferenceTarget<'a> {
    Node(&'a TreeNode),
    Capability(&'a Capability),
}

impl ReferenceTarget<'_> {
    /// The node that owns the target (the node itself for field references).
    #[must_use]
    pub fn owner_id(&self) -> &str {
        match self {
            Self::Node(node) => &node.id,
            Self::Capability(capability) => capability.node_id(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    nodes: BTreeMap<String, TreeNode>,
    capabilities: BTreeMap<CapabilityKey, Capability>,
    children: BTreeMap<String, BTreeSet<String>>,
    owned: BTreeMap<String, BTreeSet<CapabilityKey>>,
}

impl TreeSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    // --- mutation -------------------------------------------------------

    /// Insert a node whose id must be new.
    pub fn insert_node(&mut self, node: TreeNode) -> Result<(), EngineError> {
        if self.nodes.contains_key(&node.id) {
            return Err(EngineError::IdCollision {
                id: node.id,
            });
        }
        self.index_node(&node);
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Insert or replace a node, keeping the children index consistent.
    pub fn upsert_node(&mut self, node: TreeNode) {
        if let Some(previous) = self.nodes.remove(&node.id) {
            self.unindex_node(&previous);
        }
        self.index_node(&node);
        self.nodes.insert(node.id.clone(), node);
    }

    /// Remove a single node. Children and owned capabilities are left alone.
    pub fn remove_node(&mut self, id: &str) -> Option<TreeNode> {
        let node = self.nodes.remove(id)?;
        self.unindex_node(&node);
        Some(node)
    }

    /// Insert a capability whose key must be new.
    pub fn insert_capability(&mut self, capability: Capability) -> Result<(), EngineError> {
        let key = CapabilityKey::of(&capability);
        if self.capabilities.contains_key(&key) {
            return Err(EngineError::IdCollision {
                id: key.id,
            });
        }
        self.owned.entry(capability.node_id().to_string()).or_default().insert(key.clone());
        self.capabilities.insert(key, capability);
        Ok(())
    }

    pub fn upsert_capability(&mut self, capability: Capability) {
        let key = CapabilityKey::of(&capability);
        self.remove_capability(&key);
        self.owned.entry(capability.node_id().to_string()).or_default().insert(key.clone());
        self.capabilities.insert(key, capability);
    }

    pub fn remove_capability(&mut self, key: &CapabilityKey) -> Option<Capability> {
        let capability = self.capabilities.remove(key)?;
        if let Some(owned) = self.owned.get_mut(capability.node_id()) {
            owned.remove(key);
            if owned.is_empty() {
                self.owned.remove(capability.node_id());
            }
        }
        Some(capability)
    }

    fn index_node(&mut self, node: &TreeNode) {
        if let Some(parent) = &node.parent_id {
            self.children.entry(parent.clone()).or_default().insert(node.id.clone());
        }
    }

    fn unindex_node(&mut self, node: &TreeNode) {
        if let Some(parent) = &node.parent_id
            && let Some(siblings) = self.children.get_mut(parent)
        {
            siblings.remove(&node.id);
            if siblings.is_empty() {
                self.children.remove(parent);
            }
        }
    }

    // --- queries --------------------------------------------------------

    pub fn node(&self, id: &str) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes of one tree.
    pub fn tree_nodes<'a>(&'a self, tree_id: &'a str) -> impl Iterator<Item = &'a TreeNode> {
        self.nodes.values().filter(move |node| node.tree_id == tree_id)
    }

    /// Direct children sorted by `order`, then id.
    pub fn children(&self, id: &str) -> Vec<&TreeNode> {
        let mut children: Vec<&TreeNode> = self
            .children
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|child| self.nodes.get(child))
            .collect();
        children.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        children
    }

    /// Breadth-first ids of `root` and all of its descendants, root first.
    pub fn subtree_ids(&self, root: &str) -> Vec<String> {
        let mut ids = Vec::new();
        if !self.nodes.contains_key(root) {
            return ids;
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([root.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for child in self.children(&current) {
                queue.push_back(child.id.clone());
            }
            ids.push(current);
        }
        ids
    }

    pub fn capability(&self, kind: CapabilityKind, id: &str) -> Option<&Capability> {
        self.capabilities.get(&CapabilityKey::new(kind, id))
    }

    pub fn contains_capability(&self, key: &CapabilityKey) -> bool {
        self.capabilities.contains_key(key)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.values()
    }

    pub fn capability_count(&self) -> usize {
        self.capabilities.len()
    }

    pub fn formula(&self, id: &str) -> Option<&Formula> {
        match self.capability(CapabilityKind::Formula, id) {
            Some(Capability::Formula(formula)) => Some(formula),
            _ => None,
        }
    }

    pub fn condition(&self, id: &str) -> Option<&Condition> {
        match self.capability(CapabilityKind::Condition, id) {
            Some(Capability::Condition(condition)) => Some(condition),
            _ => None,
        }
    }

    pub fn table(&self, id: &str) -> Option<&Table> {
        match self.capability(CapabilityKind::Table, id) {
            Some(Capability::Table(table)) => Some(table),
            _ => None,
        }
    }

    pub fn variable(&self, id: &str) -> Option<&Variable> {
        match self.capability(CapabilityKind::Variable, id) {
            Some(Capability::Variable(variable)) => Some(variable),
            _ => None,
        }
    }

    /// Variables are addressed by id or by exposed key.
    pub fn variable_by_key(&self, key: &str) -> Option<&Variable> {
        self.variable(key).or_else(|| {
            self.capabilities.values().find_map(|capability| match capability {
                Capability::Variable(variable) if variable.exposed_key == key => Some(variable),
                _ => None,
            })
        })
    }

    /// Capabilities owned by a node, in key order.
    pub fn owned_capabilities(&self, node_id: &str) -> Vec<&Capability> {
        self.owned
            .get(node_id)
            .into_iter()
            .flatten()
            .filter_map(|key| self.capabilities.get(key))
            .collect()
    }

    /// Resolve a reference to the record it names.
    pub fn resolve(&self, reference: &ParsedReference) -> Option<ReferenceTarget<'_>> {
        match CapabilityKind::from_reference_kind(reference.kind) {
            None => self.node(&reference.id).map(ReferenceTarget::Node),
            Some(CapabilityKind::Variable) => self
                .variable_by_key(&reference.id)
                .and_then(|v| self.capability(CapabilityKind::Variable, &v.id))
                .map(ReferenceTarget::Capability),
            Some(kind) => self.capability(kind, &reference.id).map(ReferenceTarget::Capability),
        }
    }

    /// Capability keys outside `nodes`/`capabilities` that still reference a
    /// member of either set, or link to one from a node slot.
    pub fn external_referrers(
        &self,
        nodes: &HashSet<String>,
        capabilities: &HashSet<CapabilityKey>,
    ) -> Vec<String> {
        let mut referrers = BTreeSet::new();

        for (key, capability) in &self.capabilities {
            if capabilities.contains(key) {
                continue;
            }
            let hits = capability.references().into_iter().any(|reference| {
                match CapabilityKind::from_reference_kind(reference.kind) {
                    None => nodes.contains(&reference.id),
                    Some(kind) => {
                        capabilities.contains(&CapabilityKey::new(kind, reference.id.clone()))
                            || (kind == CapabilityKind::Variable
                                && self
                                    .variable_by_key(&reference.id)
                                    .is_some_and(|v| nodes.contains(&v.node_id)))
                    }
                }
            });
            if hits {
                referrers.insert(key.to_string());
            }
        }

        for node in self.nodes.values().filter(|node| !nodes.contains(&node.id)) {
            for kind in CapabilityKind::ALL {
                if node
                    .capabilities
                    .slot(kind)
                    .ids()
                    .any(|id| capabilities.contains(&CapabilityKey::new(kind, id)))
                {
                    referrers.insert(format!("node:{}", node.id));
                }
            }
        }

        referrers.into_iter().collect()
    }

    /// Check the structural invariants and return one message per violation.
    ///
    /// - parents exist and live in the same tree
    /// - capability owners exist
    /// - every active/linked id resolves to a capability of the slot's kind
    ///   whose owner node is in the same tree
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        for node in self.nodes.values() {
            if let Some(parent_id) = &node.parent_id {
                match self.nodes.get(parent_id) {
                    None => issues.push(format!("node '{}' has missing parent '{parent_id}'", node.id)),
                    Some(parent) if parent.tree_id != node.tree_id => issues.push(format!(
                        "node '{}' has parent '{parent_id}' in another tree",
                        node.id
                    )),
                    Some(_) => {}
                }
            }

            for kind in CapabilityKind::ALL {
                for id in node.capabilities.slot(kind).ids() {
                    match self.capability(kind, id) {
                        None => issues.push(format!("node '{}' links missing {kind} '{id}'", node.id)),
                        Some(capability) => match self.nodes.get(capability.node_id()) {
                            Some(owner) if owner.tree_id == node.tree_id => {}
                            Some(_) => issues.push(format!(
                                "node '{}' links {kind} '{id}' owned in another tree",
                                node.id
                            )),
                            None => issues.push(format!(
                                "node '{}' links {kind} '{id}' whose owner '{}' is missing",
                                node.id,
                                capability.node_id()
                            )),
                        },
                    }
                }
            }
        }

        for (key, capability) in &self.capabilities {
            if !self.nodes.contains_key(capability.node_id()) {
                issues.push(format!("{key} is owned by missing node '{}'", capability.node_id()));
            }
        }

        issues
    }

    /// [`validate`](Self::validate) as a `Result`.
    pub fn ensure_valid(&self) -> Result<(), EngineError> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(EngineError::StoreCorrupted {
                reason: issues.join("; "),
            })
        }
    }

    /// References held by capabilities that resolve nowhere.
    pub fn dangling_references(&self) -> Vec<(CapabilityKey, ParsedReference)> {
        let mut dangling = Vec::new();
        for (key, capability) in &self.capabilities {
            for reference in capability.references() {
                if self.resolve(reference).is_none() {
                    dangling.push((key.clone(), reference.clone()));
                }
            }
        }
        dangling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeType, TokenSequence};

    fn formula(id: &str, node_id: &str, tokens: &[&str]) -> Capability {
        Capability::Formula(Formula {
            id: id.to_string(),
            node_id: node_id.to_string(),
            name: String::new(),
            tokens: TokenSequence::parse(tokens).unwrap(),
        })
    }

    fn sample() -> TreeSnapshot {
        let mut snapshot = TreeSnapshot::new();
        snapshot.insert_node(TreeNode::new("root", "t", None, NodeType::Section)).unwrap();
        snapshot
            .insert_node(TreeNode::new("b", "t", Some("root"), NodeType::Field).with_order(2))
            .unwrap();
        snapshot
            .insert_node(TreeNode::new("a", "t", Some("root"), NodeType::Field).with_order(1))
            .unwrap();
        snapshot.insert_node(TreeNode::new("a1", "t", Some("a"), NodeType::Field)).unwrap();
        snapshot.insert_capability(formula("f", "b", &["@value.a", "*", "2"])).unwrap();
        snapshot
    }

    #[test]
    fn test_children_sorted_by_order() {
        let snapshot = sample();
        let ids: Vec<_> = snapshot.children("root").iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_subtree_is_breadth_first() {
        let snapshot = sample();
        assert_eq!(snapshot.subtree_ids("root"), vec!["root", "a", "b", "a1"]);
        assert!(snapshot.subtree_ids("missing").is_empty());
    }

    #[test]
    fn test_insert_collision() {
        let mut snapshot = sample();
        let err = snapshot.insert_node(TreeNode::new("a", "t", None, NodeType::Field)).unwrap_err();
        assert!(matches!(err, EngineError::IdCollision { .. }));
        let err = snapshot.insert_capability(formula("f", "a", &["1"])).unwrap_err();
        assert!(err.is_integrity_violation());
    }

    #[test]
    fn test_upsert_moves_child_index() {
        let mut snapshot = sample();
        let mut moved = snapshot.node("a1").unwrap().clone();
        moved.parent_id = Some("b".to_string());
        snapshot.upsert_node(moved);
        assert!(snapshot.children("a").is_empty());
        assert_eq!(snapshot.children("b").len(), 1);
    }

    #[test]
    fn test_owned_and_resolve() {
        let snapshot = sample();
        assert_eq!(snapshot.owned_capabilities("b").len(), 1);
        let reference = crate::reference::parse("node-formula:f").unwrap();
        let target = snapshot.resolve(&reference).unwrap();
        assert_eq!(target.owner_id(), "b");
        assert!(snapshot.resolve(&crate::reference::parse("@value.zzz").unwrap()).is_none());
    }

    #[test]
    fn test_external_referrers() {
        let snapshot = sample();
        let nodes: HashSet<String> = ["a".to_string()].into_iter().collect();
        let referrers = snapshot.external_referrers(&nodes, &HashSet::new());
        assert_eq!(referrers, vec!["formula:f"]);
    }

    #[test]
    fn test_validate_reports_broken_links() {
        let mut snapshot = sample();
        assert!(snapshot.validate().is_empty());

        let mut node = snapshot.node("a").unwrap().clone();
        node.capabilities.attach(CapabilityKind::Table, "nope");
        snapshot.upsert_node(node);
        let issues = snapshot.validate();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("missing table 'nope'"));
        assert!(snapshot.ensure_valid().is_err());
    }

    #[test]
    fn test_remove_capability_updates_owner_index() {
        let mut snapshot = sample();
        let key = CapabilityKey::new(CapabilityKind::Formula, "f");
        assert!(snapshot.remove_capability(&key).is_some());
        assert!(snapshot.owned_capabilities("b").is_empty());
        assert!(snapshot.remove_capability(&key).is_none());
    }

    #[test]
    fn test_dangling_references() {
        let mut snapshot = sample();
        snapshot.insert_capability(formula("g", "a", &["@value.ghost"])).unwrap();
        let dangling = snapshot.dangling_references();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].1.id, "ghost");
    }
}
