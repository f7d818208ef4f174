use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::CapabilityKind;

/// Kind of element in the form tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// A question or computed value
    Field,
    /// A grouping container
    Section,
    /// A container whose "add one more" action duplicates its templates
    Repeater,
    /// A top-level tab
    Tab,
    /// An intermediate branch of the tree
    Branch,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field => write!(f, "field"),
            Self::Section => write!(f, "section"),
            Self::Repeater => write!(f, "repeater"),
            Self::Tab => write!(f, "tab"),
            Self::Branch => write!(f, "branch"),
        }
    }
}

/// A node of the form tree.
///
/// A duplicated node's id is `<originalId>-<suffix>` and its [`NodeMetadata`]
/// records where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    pub tree_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub capabilities: NodeCapabilities,
    #[serde(default)]
    pub metadata: NodeMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeater: Option<RepeaterConfig>,
}

impl TreeNode {
    pub fn new(
        id: impl Into<String>,
        tree_id: impl Into<String>,
        parent_id: Option<&str>,
        node_type: NodeType,
    ) -> Self {
        Self {
            id: id.into(),
            tree_id: tree_id.into(),
            parent_id: parent_id.map(str::to_string),
            node_type,
            order: 0,
            label: String::new(),
            capabilities: NodeCapabilities::default(),
            metadata: NodeMetadata::default(),
            repeater: if node_type == NodeType::Repeater {
                Some(RepeaterConfig::default())
            } else {
                None
            },
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub const fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn is_clone(&self) -> bool {
        self.metadata.source_template_id.is_some()
    }

    /// The capability id evaluated when this node itself is referenced, in
    /// dispatch priority order.
    #[must_use]
    pub fn active_capability(&self) -> Option<(CapabilityKind, &str)> {
        [CapabilityKind::Formula, CapabilityKind::Condition, CapabilityKind::Table]
            .into_iter()
            .find_map(|kind| {
                let slot = self.capabilities.slot(kind);
                if slot.enabled {
                    slot.active_id.as_deref().map(|id| (kind, id))
                } else {
                    None
                }
            })
    }
}

/// Capability flag, active id and linked ids for one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySlot {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_ids: Vec<String>,
}

impl CapabilitySlot {
    /// Every capability id this slot names, active first.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.active_id
            .as_deref()
            .into_iter()
            .chain(self.linked_ids.iter().map(String::as_str).filter(move |id| Some(*id) != self.active_id.as_deref()))
    }
}

/// The `hasFormula` / `hasCondition` / `hasTable` / `hasData` slots of a node.
/// The data slot holds the node's exposed variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCapabilities {
    #[serde(default)]
    pub formula: CapabilitySlot,
    #[serde(default)]
    pub condition: CapabilitySlot,
    #[serde(default)]
    pub table: CapabilitySlot,
    #[serde(default)]
    pub data: CapabilitySlot,
}

impl NodeCapabilities {
    #[must_use]
    pub const fn slot(&self, kind: CapabilityKind) -> &CapabilitySlot {
        match kind {
            CapabilityKind::Formula => &self.formula,
            CapabilityKind::Condition => &self.condition,
            CapabilityKind::Table => &self.table,
            CapabilityKind::Variable => &self.data,
        }
    }

    pub const fn slot_mut(&mut self, kind: CapabilityKind) -> &mut CapabilitySlot {
        match kind {
            CapabilityKind::Formula => &mut self.formula,
            CapabilityKind::Condition => &mut self.condition,
            CapabilityKind::Table => &mut self.table,
            CapabilityKind::Variable => &mut self.data,
        }
    }

    /// Attach a capability: enables the slot, links the id, and makes it
    /// active when the slot had none.
    pub fn attach(&mut self, kind: CapabilityKind, id: impl Into<String>) {
        let id = id.into();
        let slot = self.slot_mut(kind);
        slot.enabled = true;
        if slot.active_id.is_none() {
            slot.active_id = Some(id.clone());
        }
        if !slot.linked_ids.contains(&id) {
            slot.linked_ids.push(id);
        }
    }
}

/// Provenance recorded on clones, plus the `shared` marker.
///
/// A clone is self-describing: the duplication context that produced it can be
/// rebuilt from these fields alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_suffix: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_scope_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicated_from_repeater: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_root_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicated_at: Option<DateTime<Utc>>,
    /// Marks a node whose capabilities are intentionally shared by every
    /// repeater instance; references to it are never re-targeted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shared: bool,
}

/// Bookkeeping held by repeater nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeaterConfig {
    #[serde(default)]
    pub template_node_ids: Vec<String>,
    #[serde(default)]
    pub instances: Vec<RepeaterInstance>,
    /// Highest suffix ever handed out for this repeater, kept so that removed
    /// instances never give their suffix back.
    #[serde(default)]
    pub max_suffix: u32,
}

/// One "add one more" group produced by a duplication pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeaterInstance {
    pub scope_id: String,
    pub suffix: u32,
    pub root_node_ids: Vec<String>,
    pub node_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_sets_active_once() {
        let mut caps = NodeCapabilities::default();
        caps.attach(CapabilityKind::Formula, "f1");
        caps.attach(CapabilityKind::Formula, "f2");
        caps.attach(CapabilityKind::Formula, "f1");

        assert!(caps.formula.enabled);
        assert_eq!(caps.formula.active_id.as_deref(), Some("f1"));
        assert_eq!(caps.formula.linked_ids, vec!["f1", "f2"]);
        assert_eq!(caps.formula.ids().collect::<Vec<_>>(), vec!["f1", "f2"]);
    }

    #[test]
    fn test_active_capability_priority() {
        let mut node = TreeNode::new("n", "t", None, NodeType::Field);
        assert!(node.active_capability().is_none());

        node.capabilities.attach(CapabilityKind::Table, "t1");
        node.capabilities.attach(CapabilityKind::Formula, "f1");
        assert_eq!(node.active_capability(), Some((CapabilityKind::Formula, "f1")));

        node.capabilities.formula.enabled = false;
        assert_eq!(node.active_capability(), Some((CapabilityKind::Table, "t1")));
    }

    #[test]
    fn test_repeater_gets_config() {
        let node = TreeNode::new("r", "t", None, NodeType::Repeater);
        assert!(node.repeater.is_some());
        let node = TreeNode::new("f", "t", Some("r"), NodeType::Field);
        assert!(node.repeater.is_none());
        assert_eq!(node.parent_id.as_deref(), Some("r"));
    }

    #[test]
    fn test_node_json_shape() {
        let json = r#"{
            "id": "a",
            "treeId": "t",
            "parentId": "r",
            "type": "field",
            "capabilities": { "formula": { "enabled": true, "activeId": "f1", "linkedIds": ["f1"] } },
            "metadata": { "shared": true }
        }"#;
        let node: TreeNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.node_type, NodeType::Field);
        assert!(node.metadata.shared);
        assert_eq!(node.capabilities.formula.active_id.as_deref(), Some("f1"));
        assert!(!node.is_clone());
    }
}
