//! Reference graph between capabilities.
//!
//! An edge `A → B` means evaluating `A` reads `B`, either directly through a
//! capability reference or through a field reference to a node whose active
//! capability is `B`. The graph gives a recalculation order (dependencies
//! first) and reports cycles with the ids that form them.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::EngineError;
use crate::models::CapabilityKind;

use super::snapshot::{CapabilityKey, ReferenceTarget, TreeSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

#[derive(Debug, Default)]
pub struct ReferenceGraph {
    graph: DiGraph<CapabilityKey, ()>,
    node_map: HashMap<CapabilityKey, NodeIndex>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph of every capability owned by a node of `tree_id`.
    pub fn build(snapshot: &TreeSnapshot, tree_id: &str) -> Self {
        let mut graph = Self::new();

        for capability in snapshot.capabilities() {
            let in_tree = snapshot.node(capability.node_id()).is_some_and(|owner| owner.tree_id == tree_id);
            if !in_tree {
                continue;
            }
            let from = CapabilityKey::of(capability);
            graph.ensure_node(from.clone());

            for reference in capability.references() {
                let to = match snapshot.resolve(reference) {
                    Some(ReferenceTarget::Capability(target)) => Some(CapabilityKey::of(target)),
                    Some(ReferenceTarget::Node(node)) => {
                        node.active_capability().map(|(kind, id)| CapabilityKey::new(kind, id))
                    }
                    None => None,
                };
                if let Some(to) = to {
                    graph.add_dependency(from.clone(), to);
                }
            }
        }

        graph
    }

    fn ensure_node(&mut self, key: CapabilityKey) -> NodeIndex {
        if let Some(&index) = self.node_map.get(&key) {
            index
        } else {
            let index = self.graph.add_node(key.clone());
            self.node_map.insert(key, index);
            index
        }
    }

    pub fn add_dependency(&mut self, from: CapabilityKey, to: CapabilityKey) {
        let from_idx = self.ensure_node(from);
        let to_idx = self.ensure_node(to);
        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    /// Fail with the first cycle found, as `a → b → a`.
    pub fn detect_cycles(&self) -> Result<(), EngineError> {
        let mut colors: HashMap<NodeIndex, Color> =
            self.graph.node_indices().map(|node| (node, Color::White)).collect();
        let mut path = Vec::new();

        for node in self.graph.node_indices() {
            if matches!(colors.get(&node), Some(Color::White))
                && let Some(cycle) = self.dfs_visit(node, &mut colors, &mut path)
            {
                let chain = cycle.iter().map(ToString::to_string).collect::<Vec<_>>().join(" → ");
                return Err(EngineError::CircularReference {
                    chain,
                });
            }
        }
        Ok(())
    }

    fn dfs_visit(
        &self,
        node: NodeIndex,
        colors: &mut HashMap<NodeIndex, Color>,
        path: &mut Vec<CapabilityKey>,
    ) -> Option<Vec<CapabilityKey>> {
        colors.insert(node, Color::Gray);
        path.push(self.graph[node].clone());

        for neighbor in self.graph.neighbors(node) {
            match colors.get(&neighbor) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|key| *key == self.graph[neighbor]).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(self.graph[neighbor].clone());
                    return Some(cycle);
                }
                Some(Color::White) => {
                    if let Some(cycle) = self.dfs_visit(neighbor, colors, path) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }

    /// Capabilities ordered so that every capability comes after the ones it reads.
    pub fn dependency_order(&self) -> Result<Vec<CapabilityKey>, EngineError> {
        self.detect_cycles()?;

        match toposort(&self.graph, None) {
            Ok(indices) => Ok(indices.into_iter().rev().map(|idx| self.graph[idx].clone()).collect()),
            Err(cycle) => Err(EngineError::CircularReference {
                chain: self.graph[cycle.node_id()].to_string(),
            }),
        }
    }

    /// Everything `key` reads, directly or transitively.
    pub fn transitive_dependencies(&self, key: &CapabilityKey) -> HashSet<CapabilityKey> {
        let mut deps = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(&idx) = self.node_map.get(key) {
            queue.push_back(idx);
            while let Some(current) = queue.pop_front() {
                for neighbor in self.graph.neighbors(current) {
                    if deps.insert(self.graph[neighbor].clone()) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        deps
    }

    /// Capabilities of `kind` in the graph.
    pub fn keys_of_kind(&self, kind: CapabilityKind) -> Vec<CapabilityKey> {
        let mut keys: Vec<_> = self.node_map.keys().filter(|key| key.kind == kind).cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
