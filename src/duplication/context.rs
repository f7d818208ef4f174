//! Duplication contexts rebuilt from clone metadata, and scope audits.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::constants::DUPLICATION_MODE_REPEATER;
use crate::models::{CapabilityKind, TreeNode};
use crate::store::{ReferenceTarget, TreeSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicationMode {
    #[default]
    Repeater,
}

impl fmt::Display for DuplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repeater => write!(f, "{DUPLICATION_MODE_REPEATER}"),
        }
    }
}

/// Describes the duplication pass that produced a clone.
///
/// Never stored on its own: [`from_node`](Self::from_node) reads it back from
/// the clone's metadata whenever it is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicationContext {
    pub repeater_node_id: String,
    /// Root of the template subtree the clone was copied from
    pub template_node_id: String,
    /// The original node this clone copies
    pub source_node_id: String,
    pub scope_id: String,
    pub suffix: u32,
    pub mode: DuplicationMode,
}

impl DuplicationContext {
    /// `None` for nodes that are not complete clones.
    pub fn from_node(node: &TreeNode) -> Option<Self> {
        let metadata = &node.metadata;
        Some(Self {
            repeater_node_id: metadata.duplicated_from_repeater.clone()?,
            template_node_id: metadata
                .template_root_id
                .clone()
                .or_else(|| metadata.source_template_id.clone())?,
            source_node_id: metadata.source_template_id.clone()?,
            scope_id: metadata.repeat_scope_id.clone()?,
            suffix: metadata.copy_suffix?,
            mode: DuplicationMode::Repeater,
        })
    }
}

/// Scope of the node a reference target belongs to, if that node is a clone.
pub(crate) fn target_scope<'a>(snapshot: &'a TreeSnapshot, target: &ReferenceTarget<'_>) -> Option<&'a str> {
    snapshot.node(target.owner_id()).and_then(|owner| owner.metadata.repeat_scope_id.as_deref())
}

/// Scopes of `node_id` and of all its ancestors. A clone may reference nodes
/// in any of them: its own instance and the instances it is nested in.
pub(crate) fn enclosing_scopes<'a>(snapshot: &'a TreeSnapshot, node_id: &str) -> HashSet<&'a str> {
    let mut scopes = HashSet::new();
    let mut seen = HashSet::new();
    let mut current = snapshot.node(node_id);
    while let Some(node) = current {
        if !seen.insert(node.id.as_str()) {
            break;
        }
        if let Some(scope) = node.metadata.repeat_scope_id.as_deref() {
            scopes.insert(scope);
        }
        current = node.parent_id.as_deref().and_then(|parent| snapshot.node(parent));
    }
    scopes
}

/// Check every clone in the snapshot:
///
/// - its repeater exists and still registers the clone's scope
/// - references held by its capabilities and links in its slots stay inside
///   its enclosing scopes or point at nodes that are not clones at all
pub fn audit_scopes(snapshot: &TreeSnapshot) -> Vec<String> {
    let mut issues = Vec::new();

    for node in snapshot.nodes() {
        let Some(context) = DuplicationContext::from_node(node) else {
            continue;
        };
        let allowed = enclosing_scopes(snapshot, &node.id);
        let registered = snapshot
            .node(&context.repeater_node_id)
            .and_then(|repeater| repeater.repeater.as_ref())
            .is_some_and(|config| config.instances.iter().any(|instance| instance.scope_id == context.scope_id));
        if !registered {
            issues.push(format!(
                "clone '{}' belongs to scope '{}' which repeater '{}' does not register",
                node.id, context.scope_id, context.repeater_node_id
            ));
        }

        for capability in snapshot.owned_capabilities(&node.id) {
            for reference in capability.references() {
                let Some(target) = snapshot.resolve(reference) else {
                    continue;
                };
                if let Some(scope) = target_scope(snapshot, &target)
                    && !allowed.contains(scope)
                {
                    issues.push(format!(
                        "{}:{} in scope '{}' references '{reference}' from scope '{scope}'",
                        capability.kind(),
                        capability.id(),
                        context.scope_id
                    ));
                }
            }
        }

        for kind in CapabilityKind::ALL {
            for id in node.capabilities.slot(kind).ids() {
                let owner_scope = snapshot
                    .capability(kind, id)
                    .and_then(|capability| snapshot.node(capability.node_id()))
                    .and_then(|owner| owner.metadata.repeat_scope_id.as_deref());
                if let Some(scope) = owner_scope
                    && !allowed.contains(scope)
                {
                    issues.push(format!(
                        "clone '{}' links {kind} '{id}' from scope '{scope}'",
                        node.id
                    ));
                }
            }
        }
    }

    issues
}
