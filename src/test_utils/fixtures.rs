//! The canonical "roof section" tree used across tests.
//!
//! ```text
//! quote-root (section)
//! ├── rate          field, shared
//! ├── postcode      field
//! ├── supplier      field, table t-supplier (postcode → provider)
//! └── roofs         repeater, template: pan
//!     └── pan       section
//!         ├── width
//!         ├── length
//!         ├── area   formula f-area  = width * length
//!         ├── cost   formula f-cost  = node-formula:f-area * rate
//!         └── pitch  condition c-pitch on area (large / medium / small)
//! ```
//!
//! `area` also exposes variable `v-area` under the key `roofArea`.

use std::collections::BTreeMap;
use std::path::Path;

use crate::models::{
    Branch, Capability, CapabilityKind, Comparison, ComparisonOp, Condition, Formula, LookupConfig,
    LookupMode, NodeType, Operand, Table, TokenSequence, TreeNode, Value, Variable,
};
use crate::reference::{ParsedReference, ReferenceKind};
use crate::store::{CapabilityStore, StoreDocument, TreeSnapshot};

pub const TREE_ID: &str = "quote";

/// Ids of the template subtree, breadth-first.
pub const TEMPLATE_NODE_IDS: [&str; 6] = ["pan", "width", "length", "area", "cost", "pitch"];

fn node(id: &str, parent: &str, node_type: NodeType, order: i64) -> TreeNode {
    TreeNode::new(id, TREE_ID, Some(parent), node_type).with_order(order).with_label(id)
}

fn with_capability(mut node: TreeNode, kind: CapabilityKind, id: &str) -> TreeNode {
    node.capabilities.attach(kind, id);
    node
}

fn formula(id: &str, node_id: &str, tokens: &[&str]) -> Capability {
    Capability::Formula(Formula {
        id: id.to_string(),
        node_id: node_id.to_string(),
        name: String::new(),
        tokens: TokenSequence::parse(tokens).unwrap_or_default(),
    })
}

fn field(id: &str) -> Operand {
    Operand::reference(ParsedReference::field(id))
}

fn larger_than(threshold: f64, label: &str) -> Branch {
    Branch {
        label: None,
        when: Comparison {
            left: field("area"),
            op: ComparisonOp::Gt,
            right: Some(Operand::literal(threshold)),
        },
        then: Operand::literal(label),
    }
}

/// The roof-section tree as a snapshot.
pub fn roof_section() -> TreeSnapshot {
    let mut nodes = vec![
        TreeNode::new("quote-root", TREE_ID, None, NodeType::Section).with_label("Quote"),
        node("postcode", "quote-root", NodeType::Field, 2),
        with_capability(node("supplier", "quote-root", NodeType::Field, 3), CapabilityKind::Table, "t-supplier"),
        node("pan", "roofs", NodeType::Section, 0),
        node("width", "pan", NodeType::Field, 1),
        node("length", "pan", NodeType::Field, 2),
        with_capability(node("cost", "pan", NodeType::Field, 4), CapabilityKind::Formula, "f-cost"),
        with_capability(node("pitch", "pan", NodeType::Field, 5), CapabilityKind::Condition, "c-pitch"),
    ];

    let mut rate = node("rate", "quote-root", NodeType::Field, 1);
    rate.metadata.shared = true;
    nodes.push(rate);

    let mut area = with_capability(node("area", "pan", NodeType::Field, 3), CapabilityKind::Formula, "f-area");
    area.capabilities.attach(CapabilityKind::Variable, "v-area");
    nodes.push(area);

    let mut roofs = node("roofs", "quote-root", NodeType::Repeater, 4);
    if let Some(config) = roofs.repeater.as_mut() {
        config.template_node_ids = vec!["pan".to_string()];
    }
    nodes.push(roofs);

    let capabilities = vec![
        formula("f-area", "area", &["@value.width", "*", "@value.length"]),
        formula("f-cost", "cost", &["node-formula:f-area", "*", "@value.rate"]),
        Capability::Condition(Condition {
            id: "c-pitch".to_string(),
            node_id: "pitch".to_string(),
            name: "Roof class".to_string(),
            branches: vec![larger_than(100.0, "large"), larger_than(50.0, "medium")],
            fallback: Operand::literal("small"),
        }),
        Capability::Table(Table {
            id: "t-supplier".to_string(),
            node_id: "supplier".to_string(),
            name: "Suppliers".to_string(),
            columns: vec!["Postcode".to_string(), "Provider".to_string()],
            rows: vec!["r1".to_string(), "r2".to_string()],
            data: vec![
                vec![Value::text("5150"), Value::text("Sibelga")],
                vec![Value::text("4000"), Value::text("Resa")],
            ],
            lookup: LookupConfig {
                mode: LookupMode::Row,
                row_key: Some(field("postcode")),
                column_key: None,
                key_column: Some("Postcode".to_string()),
                key_row: None,
                display_column: Some("Provider".to_string()),
                display_row: None,
            },
        }),
        Capability::Variable(Variable {
            id: "v-area".to_string(),
            node_id: "area".to_string(),
            exposed_key: "roofArea".to_string(),
            display_name: "Roof area".to_string(),
            source_ref: Some(ParsedReference::new(ReferenceKind::Formula, "f-area")),
        }),
    ];

    let mut snapshot = TreeSnapshot::new();
    for node in nodes {
        snapshot.insert_node(node).unwrap_or_else(|err| panic!("fixture node: {err}"));
    }
    for capability in capabilities {
        snapshot.insert_capability(capability).unwrap_or_else(|err| panic!("fixture capability: {err}"));
    }
    snapshot
}

/// The roof-section tree in an in-memory store.
pub fn roof_store() -> CapabilityStore {
    CapabilityStore::in_memory(roof_section())
}

/// Write the roof-section tree as a store file.
pub async fn write_roof_store(path: &Path) -> anyhow::Result<()> {
    let document = StoreDocument::from_snapshot(&roof_section(), BTreeMap::new());
    let content = serde_json::to_string_pretty(&document)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// A value context from `(key, value)` pairs.
pub fn context<V: Into<Value>>(pairs: impl IntoIterator<Item = (&'static str, V)>) -> BTreeMap<String, Value> {
    pairs.into_iter().map(|(key, value)| (key.to_string(), value.into())).collect()
}
