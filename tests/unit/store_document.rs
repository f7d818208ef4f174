use tbl_engine::eval::{EmptyContext, EvalSettings, Evaluator};
use tbl_engine::models::{NodeType, Value};
use tbl_engine::store::{CapabilityStore, StoreDocument};

use crate::common::TestStore;

const DOCUMENT: &str = r#"{
  "version": 1,
  "nodes": [
    { "id": "root", "treeId": "t", "type": "section" },
    { "id": "list", "treeId": "t", "parentId": "root", "type": "repeater",
      "repeater": { "templateNodeIds": ["item"] } },
    { "id": "item", "treeId": "t", "parentId": "list", "type": "section" },
    { "id": "price", "treeId": "t", "parentId": "item", "type": "field", "order": 1 },
    { "id": "total", "treeId": "t", "parentId": "item", "type": "field", "order": 2,
      "capabilities": { "formula": { "enabled": true, "activeId": "f-total", "linkedIds": ["f-total"] } } }
  ],
  "formulas": [
    { "id": "f-total", "nodeId": "total", "tokens": ["@value.price", "*", "2"] }
  ],
  "cache": {
    "price": { "value": 21, "computedAt": "2024-01-01T00:00:00Z" }
  }
}"#;

#[test]
fn test_hand_written_document_loads() {
    let document: StoreDocument = serde_json::from_str(DOCUMENT).unwrap();
    let store = CapabilityStore::from_document(document).unwrap();
    assert_eq!(store.cache().value("price"), Some(Value::Number(21.0)));
}

#[tokio::test]
async fn test_document_drives_evaluation() {
    let document: StoreDocument = serde_json::from_str(DOCUMENT).unwrap();
    let store = CapabilityStore::from_document(document).unwrap();

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.node("list").map(|node| node.node_type), Some(NodeType::Repeater));
    assert_eq!(snapshot.children("item").len(), 2);

    let mut evaluator = Evaluator::new(&snapshot, &EmptyContext, EvalSettings::default()).with_cache(store.cache());
    let outcome = evaluator.evaluate_node("total").unwrap();
    assert_eq!(outcome.value(), Some(&Value::Number(42.0)));
}

#[test]
fn test_newer_version_is_rejected() {
    let document: StoreDocument = serde_json::from_str(r#"{ "version": 99 }"#).unwrap();
    assert!(CapabilityStore::from_document(document).is_err());
}

#[test]
fn test_duplicate_node_ids_are_corruption() {
    let json = r#"{ "nodes": [
        { "id": "a", "treeId": "t", "type": "field" },
        { "id": "a", "treeId": "t", "type": "field" }
    ] }"#;
    let document: StoreDocument = serde_json::from_str(json).unwrap();
    let err = CapabilityStore::from_document(document).unwrap_err();
    assert!(err.to_string().contains("duplicate node id 'a'"), "{err}");
}

#[tokio::test]
async fn test_store_file_round_trip() {
    let store = TestStore::roof_section().await.unwrap();
    let opened = store.open().await.unwrap();
    let before = opened.snapshot().await;

    opened.persist().await.unwrap();
    let reopened = store.open().await.unwrap();
    let after = reopened.snapshot().await;

    assert_eq!(before.node_count(), after.node_count());
    assert_eq!(before.capability_count(), after.capability_count());
    assert_eq!(after.formula("f-cost"), before.formula("f-cost"));
    assert!(after.validate().is_empty());
}
