//! Pass 3: re-point references held by clones at sibling clones.
//!
//! The rewriter only reads the frozen id maps and the pre-duplication snapshot.
//! It changes reference tokens and capability slots of records that are
//! already cloned; it never adds or removes nodes.

use std::collections::HashSet;
use tracing::{debug, warn};

use super::context::target_scope;
use super::maps::{CapabilityIdMaps, NodeIdMap};
use crate::core::EngineError;
use crate::models::{Capability, CapabilityKind, TreeNode};
use crate::reference::ParsedReference;
use crate::store::TreeSnapshot;

/// What happened to the references of the cloned records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteSummary {
    /// References re-pointed at a clone
    pub rewritten: usize,
    /// References left on a node marked `shared`
    pub shared: usize,
    /// References left on something outside the template that is not marked
    /// `shared`, or on nothing at all; formatted `kind:id → token`
    pub unmarked: Vec<String>,
    /// Slot links dropped because they resolve nowhere
    pub dropped_links: Vec<String>,
}

pub(crate) struct ReferenceRewriter<'a> {
    /// The store as it was before this duplication pass
    pub before: &'a TreeSnapshot,
    pub nodes: &'a NodeIdMap,
    pub capabilities: &'a CapabilityIdMaps,
    /// Scopes the new instance is nested in; targets there may stay shared
    pub enclosing_scopes: &'a HashSet<&'a str>,
    pub warn_unmarked: bool,
}

impl ReferenceRewriter<'_> {
    /// The clone-side token for `reference`, or `None` when it names nothing
    /// inside the template.
    fn retarget(&self, reference: &ParsedReference) -> Option<ParsedReference> {
        let target = match CapabilityKind::from_reference_kind(reference.kind) {
            None => self.nodes.get(&reference.id),
            Some(CapabilityKind::Variable) => self.capabilities.variable(&reference.id),
            Some(kind) => self.capabilities.get(kind, &reference.id),
        }?;
        Some(reference.retarget(target))
    }

    /// Rewrite every reference of one cloned capability in place.
    pub fn rewrite_capability(
        &self,
        capability: &mut Capability,
        summary: &mut RewriteSummary,
    ) -> Result<(), EngineError> {
        let owner = format!("{}:{}", capability.kind(), capability.id());

        for reference in capability.references_mut() {
            if let Some(retargeted) = self.retarget(reference) {
                debug!(capability = %owner, from = %reference, to = %retargeted, "re-pointed reference");
                *reference = retargeted;
                summary.rewritten += 1;
                continue;
            }

            let Some(target) = self.before.resolve(reference) else {
                if self.warn_unmarked {
                    warn!(capability = %owner, reference = %reference, "reference resolves nowhere; kept as is");
                }
                summary.unmarked.push(format!("{owner} → {reference}"));
                continue;
            };

            if let Some(scope) = target_scope(self.before, &target)
                && !self.enclosing_scopes.contains(scope)
            {
                return Err(EngineError::ScopeViolation {
                    capability_id: owner,
                    target: reference.to_string(),
                    target_scope: scope.to_string(),
                });
            }

            let shared = self.before.node(target.owner_id()).is_some_and(|node| node.metadata.shared);
            if shared {
                summary.shared += 1;
            } else {
                if self.warn_unmarked {
                    warn!(
                        capability = %owner,
                        reference = %reference,
                        "reference leaves the template but its target is not marked shared; kept as is"
                    );
                }
                summary.unmarked.push(format!("{owner} → {reference}"));
            }
        }
        Ok(())
    }

    /// Re-point a cloned node's capability slots and, for nested repeaters,
    /// its template list.
    pub fn rewrite_node(&self, node: &mut TreeNode, summary: &mut RewriteSummary) {
        for kind in CapabilityKind::ALL {
            let slot = node.capabilities.slot_mut(kind);

            let mut linked = Vec::with_capacity(slot.linked_ids.len());
            for id in &slot.linked_ids {
                match self.map_link(kind, id) {
                    Some(mapped) => {
                        if !linked.contains(&mapped) {
                            linked.push(mapped);
                        }
                    }
                    None => {
                        warn!(node = %node.id, %kind, id = %id, "dropping link to a missing capability");
                        summary.dropped_links.push(format!("{}:{kind}:{id}", node.id));
                    }
                }
            }
            slot.linked_ids = linked;

            slot.active_id = slot.active_id.as_deref().and_then(|id| self.map_link(kind, id));
            if slot.active_id.is_none() {
                slot.active_id = slot.linked_ids.first().cloned();
            }
            if slot.active_id.is_none() && slot.linked_ids.is_empty() {
                slot.enabled = false;
            }
        }

        if let Some(config) = node.repeater.as_mut() {
            for template in &mut config.template_node_ids {
                if let Some(mapped) = self.nodes.get(template) {
                    *template = mapped.to_string();
                }
            }
        }
    }

    /// A cloned id, the original id when it names a capability that exists
    /// outside the template, or `None`.
    fn map_link(&self, kind: CapabilityKind, id: &str) -> Option<String> {
        if let Some(mapped) = self.capabilities.get(kind, id) {
            return Some(mapped.to_string());
        }
        self.before.capability(kind, id).map(|_| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplication::maps::CapabilityIdMapsBuilder;
    use crate::models::{Formula, NodeType, TokenSequence};

    fn formula(id: &str, node_id: &str, tokens: &[&str]) -> Capability {
        Capability::Formula(Formula {
            id: id.to_string(),
            node_id: node_id.to_string(),
            name: String::new(),
            tokens: TokenSequence::parse(tokens).unwrap(),
        })
    }

    fn before() -> TreeSnapshot {
        let mut snapshot = TreeSnapshot::new();
        snapshot.insert_node(TreeNode::new("w", "t", None, NodeType::Field)).unwrap();
        snapshot.insert_node(TreeNode::new("l", "t", None, NodeType::Field)).unwrap();
        let mut rate = TreeNode::new("rate", "t", None, NodeType::Field);
        rate.metadata.shared = true;
        snapshot.insert_node(rate).unwrap();
        snapshot.insert_node(TreeNode::new("outside", "t", None, NodeType::Field)).unwrap();
        let mut foreign = TreeNode::new("w-1", "t", None, NodeType::Field);
        foreign.metadata.repeat_scope_id = Some("scope-1".to_string());
        snapshot.insert_node(foreign).unwrap();
        snapshot
    }

    fn run(tokens: &[&str]) -> (Result<(), EngineError>, Capability, RewriteSummary) {
        let snapshot = before();
        let nodes = NodeIdMap::from_pairs([
            ("w".to_string(), "w-2".to_string()),
            ("l".to_string(), "l-2".to_string()),
        ]);
        let mut builder = CapabilityIdMapsBuilder::default();
        builder.record(CapabilityKind::Formula, "f", "f-2");
        let capabilities = builder.freeze();
        let scopes = HashSet::new();
        let rewriter = ReferenceRewriter {
            before: &snapshot,
            nodes: &nodes,
            capabilities: &capabilities,
            enclosing_scopes: &scopes,
            warn_unmarked: true,
        };
        let mut capability = formula("f-2", "l-2", tokens);
        let mut summary = RewriteSummary::default();
        let result = rewriter.rewrite_capability(&mut capability, &mut summary);
        (result, capability, summary)
    }

    fn tokens(capability: &Capability) -> Vec<String> {
        capability.references().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_sibling_references_follow_the_clone() {
        let (result, capability, summary) = run(&["@value.w", "*", "@value.l", "+", "node-formula:f"]);
        result.unwrap();
        assert_eq!(tokens(&capability), vec!["@value.w-2", "@value.l-2", "node-formula:f-2"]);
        assert_eq!(summary.rewritten, 3);
    }

    #[test]
    fn test_shared_and_unmarked_references_are_kept() {
        let (result, capability, summary) = run(&["@value.w", "*", "@value.rate", "+", "@value.outside"]);
        result.unwrap();
        assert_eq!(tokens(&capability), vec!["@value.w-2", "@value.rate", "@value.outside"]);
        assert_eq!(summary.shared, 1);
        assert_eq!(summary.unmarked, vec!["formula:f-2 → @value.outside"]);
    }

    #[test]
    fn test_dangling_reference_is_reported() {
        let (result, _, summary) = run(&["@value.ghost", "+", "1"]);
        result.unwrap();
        assert_eq!(summary.unmarked.len(), 1);
    }

    #[test]
    fn test_reference_into_another_scope_is_fatal() {
        let (result, _, _) = run(&["@value.w-1", "+", "1"]);
        let err = result.unwrap_err();
        assert!(err.is_integrity_violation());
        assert!(matches!(err, EngineError::ScopeViolation { ref target_scope, .. } if target_scope == "scope-1"));
    }

    #[test]
    fn test_node_slots_are_remapped() {
        let mut snapshot = before();
        snapshot.insert_capability(formula("shared-f", "rate", &["1"])).unwrap();
        let nodes = NodeIdMap::default();
        let mut builder = CapabilityIdMapsBuilder::default();
        builder.record(CapabilityKind::Formula, "f", "f-2");
        let capabilities = builder.freeze();
        let scopes = HashSet::new();
        let rewriter = ReferenceRewriter {
            before: &snapshot,
            nodes: &nodes,
            capabilities: &capabilities,
            enclosing_scopes: &scopes,
            warn_unmarked: false,
        };

        let mut node = TreeNode::new("l-2", "t", None, NodeType::Field);
        node.capabilities.attach(CapabilityKind::Formula, "f");
        node.capabilities.attach(CapabilityKind::Formula, "shared-f");
        node.capabilities.attach(CapabilityKind::Table, "gone");
        let mut summary = RewriteSummary::default();
        rewriter.rewrite_node(&mut node, &mut summary);

        assert_eq!(node.capabilities.formula.active_id.as_deref(), Some("f-2"));
        assert_eq!(node.capabilities.formula.linked_ids, vec!["f-2", "shared-f"]);
        assert!(!node.capabilities.table.enabled);
        assert!(node.capabilities.table.active_id.is_none());
        assert_eq!(summary.dropped_links, vec!["l-2:table:gone"]);
    }
}
