//! Shared helpers for the test suites.

#![allow(dead_code)]

use anyhow::Result;
use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use tbl_engine::models::{Capability, Formula, NodeType, TokenSequence, TreeNode};
use tbl_engine::store::{CapabilityStore, TreeSnapshot};
use tbl_engine::test_utils::write_roof_store;

/// A store file and an isolated config file in a temporary directory.
pub struct TestStore {
    _temp_dir: TempDir,
    store_path: PathBuf,
    config_path: PathBuf,
}

impl TestStore {
    /// A store file holding the roof-section fixture.
    pub async fn roof_section() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let store_path = temp_dir.path().join("tree.json");
        let config_path = temp_dir.path().join("config.toml");
        write_roof_store(&store_path).await?;
        Ok(Self {
            _temp_dir: temp_dir,
            store_path,
            config_path,
        })
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// The `tbl` binary pointed at this store and config.
    pub fn tbl(&self) -> Command {
        let mut cmd = Command::cargo_bin("tbl").expect("tbl binary is built for integration tests");
        cmd.env("TBL_STORE", &self.store_path)
            .env("TBL_CONFIG", &self.config_path)
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1");
        cmd
    }

    pub async fn open(&self) -> Result<CapabilityStore> {
        CapabilityStore::open(&self.store_path).await
    }
}

pub fn formula(id: &str, node_id: &str, tokens: &[&str]) -> Capability {
    Capability::Formula(Formula {
        id: id.to_string(),
        node_id: node_id.to_string(),
        name: String::new(),
        tokens: TokenSequence::parse(tokens).expect("valid tokens"),
    })
}

pub fn node_with_formula(id: &str, tree: &str, parent: &str, formula_id: &str) -> TreeNode {
    let mut node = TreeNode::new(id, tree, Some(parent), NodeType::Field);
    node.capabilities.attach(tbl_engine::models::CapabilityKind::Formula, formula_id);
    node
}

/// `list` repeater with a three-node template:
///
/// ```text
/// list (repeater) → item (section) → price, total (f-total = price * 2)
/// ```
pub fn three_node_template() -> TreeSnapshot {
    let mut snapshot = TreeSnapshot::new();
    snapshot.insert_node(TreeNode::new("root", "order", None, NodeType::Section)).unwrap();

    let mut list = TreeNode::new("list", "order", Some("root"), NodeType::Repeater);
    if let Some(config) = list.repeater.as_mut() {
        config.template_node_ids = vec!["item".to_string()];
    }
    snapshot.insert_node(list).unwrap();
    snapshot.insert_node(TreeNode::new("item", "order", Some("list"), NodeType::Section)).unwrap();
    snapshot.insert_node(TreeNode::new("price", "order", Some("item"), NodeType::Field).with_order(1)).unwrap();
    snapshot.insert_node(node_with_formula("total", "order", "item", "f-total").with_order(2)).unwrap();
    snapshot.insert_capability(formula("f-total", "total", &["@value.price", "*", "2"])).unwrap();
    snapshot
}

/// Nested repeaters:
///
/// ```text
/// floors (repeater) → floor (section)
///                     ├── height
///                     └── rooms (repeater) → room (section)
///                                            ├── size
///                                            └── volume (f-volume = size * height)
/// ```
pub fn nested_repeaters() -> TreeSnapshot {
    let mut snapshot = TreeSnapshot::new();
    snapshot.insert_node(TreeNode::new("building", "b", None, NodeType::Section)).unwrap();

    let mut floors = TreeNode::new("floors", "b", Some("building"), NodeType::Repeater);
    if let Some(config) = floors.repeater.as_mut() {
        config.template_node_ids = vec!["floor".to_string()];
    }
    snapshot.insert_node(floors).unwrap();
    snapshot.insert_node(TreeNode::new("floor", "b", Some("floors"), NodeType::Section)).unwrap();
    snapshot.insert_node(TreeNode::new("height", "b", Some("floor"), NodeType::Field).with_order(1)).unwrap();

    let mut rooms = TreeNode::new("rooms", "b", Some("floor"), NodeType::Repeater).with_order(2);
    if let Some(config) = rooms.repeater.as_mut() {
        config.template_node_ids = vec!["room".to_string()];
    }
    snapshot.insert_node(rooms).unwrap();
    snapshot.insert_node(TreeNode::new("room", "b", Some("rooms"), NodeType::Section)).unwrap();
    snapshot.insert_node(TreeNode::new("size", "b", Some("room"), NodeType::Field).with_order(1)).unwrap();
    snapshot.insert_node(node_with_formula("volume", "b", "room", "f-volume").with_order(2)).unwrap();
    snapshot.insert_capability(formula("f-volume", "volume", &["@value.size", "*", "@value.height"])).unwrap();
    snapshot
}

/// Wire form of every reference a formula holds.
pub fn formula_tokens(snapshot: &TreeSnapshot, id: &str) -> Vec<String> {
    snapshot
        .formula(id)
        .map(|formula| formula.tokens.references().map(ToString::to_string).collect())
        .unwrap_or_default()
}
