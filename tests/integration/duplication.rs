use std::collections::HashSet;
use std::sync::Arc;

use tbl_engine::duplication::{DuplicationOrchestrator, audit_scopes};
use tbl_engine::reference::{extract_id, parse};
use tbl_engine::store::{CapabilityStore, TreeSnapshot};
use tbl_engine::test_utils::roof_section;

use crate::common::{formula_tokens, nested_repeaters, three_node_template};

fn orchestrator(snapshot: TreeSnapshot) -> DuplicationOrchestrator {
    DuplicationOrchestrator::new(Arc::new(CapabilityStore::in_memory(snapshot)))
}

#[tokio::test]
async fn test_three_node_template_rewires_sibling() {
    let orchestrator = orchestrator(three_node_template());
    let report = orchestrator.duplicate("list").await.unwrap();

    assert_eq!(report.suffix, 1);
    assert_eq!(report.created_node_ids, vec!["item-1", "price-1", "total-1"]);

    let snapshot = orchestrator.store().snapshot().await;
    assert_eq!(formula_tokens(&snapshot, "f-total-1"), vec!["@value.price-1"]);
    assert_eq!(formula_tokens(&snapshot, "f-total"), vec!["@value.price"]);
    assert_eq!(snapshot.node("total-1").unwrap().parent_id.as_deref(), Some("item-1"));
}

#[tokio::test]
async fn test_suffixes_are_never_reused() {
    let orchestrator = orchestrator(three_node_template());
    let first = orchestrator.duplicate("list").await.unwrap();
    let second = orchestrator.duplicate("list").await.unwrap();
    assert_eq!((first.suffix, second.suffix), (1, 2));

    // Remove the newest and the oldest instance; neither suffix comes back.
    orchestrator.remove_instance("list", &second.scope_id).await.unwrap();
    orchestrator.remove_instance("list", &first.scope_id).await.unwrap();

    let third = orchestrator.duplicate("list").await.unwrap();
    assert_eq!(third.suffix, 3);
    assert!(third.created_node_ids.iter().all(|id| id.ends_with("-3")));

    let snapshot = orchestrator.store().snapshot().await;
    assert!(!snapshot.contains_node("item-1"));
    assert!(!snapshot.contains_node("item-2"));
    assert!(snapshot.formula("f-total-2").is_none());
}

#[tokio::test]
async fn test_clone_references_stay_in_scope() {
    let orchestrator = orchestrator(roof_section());
    let first = orchestrator.duplicate("roofs").await.unwrap();
    let second = orchestrator.duplicate("roofs").await.unwrap();
    let snapshot = orchestrator.store().snapshot().await;

    assert!(audit_scopes(&snapshot).is_empty());

    // Every reference held by the second instance resolves into its own
    // node map or to a node that existed before any duplication.
    let own: HashSet<&str> = second.node_id_map.values().map(String::as_str).collect();
    let first_ids: HashSet<&str> = first.node_id_map.values().map(String::as_str).collect();
    let before = roof_section();
    for node_id in &second.created_node_ids {
        for capability in snapshot.owned_capabilities(node_id) {
            for reference in capability.references() {
                let target = snapshot.resolve(reference).expect("reference resolves");
                let owner = target.owner_id();
                assert!(
                    own.contains(owner) || before.contains_node(owner),
                    "{} references {owner} outside its scope",
                    capability.id()
                );
                assert!(!first_ids.contains(owner), "{} leaks into another instance", capability.id());
            }
        }
    }

    // The shared rate stays shared.
    assert_eq!(formula_tokens(&snapshot, "f-cost-2"), vec!["node-formula:f-area-2", "@value.rate"]);
    assert_eq!(second.shared_references, 1);
}

#[tokio::test]
async fn test_nested_repeater_suffixes_compose() {
    let orchestrator = orchestrator(nested_repeaters());
    let outer = orchestrator.duplicate("floors").await.unwrap();
    assert_eq!(outer.created_node_ids, vec!["floor-1", "height-1", "rooms-1", "room-1", "size-1", "volume-1"]);

    {
        let snapshot = orchestrator.store().snapshot().await;
        let rooms = snapshot.node("rooms-1").unwrap().repeater.clone().unwrap();
        assert_eq!(rooms.template_node_ids, vec!["room-1"]);
        assert!(rooms.instances.is_empty());
        assert_eq!(formula_tokens(&snapshot, "f-volume-1"), vec!["@value.size-1", "@value.height-1"]);
    }

    let inner = orchestrator.duplicate("rooms-1").await.unwrap();
    assert_eq!(inner.suffix, 1);
    assert_eq!(inner.created_node_ids, vec!["room-1-1", "size-1-1", "volume-1-1"]);

    let snapshot = orchestrator.store().snapshot().await;
    // The inner clone reads its own size and the height of the floor it sits in.
    assert_eq!(formula_tokens(&snapshot, "f-volume-1-1"), vec!["@value.size-1-1", "@value.height-1"]);
    assert_eq!(snapshot.node("room-1-1").unwrap().parent_id.as_deref(), Some("rooms-1"));
    assert!(audit_scopes(&snapshot).is_empty());

    let token = parse("@value.size-1-1").unwrap();
    assert_eq!(extract_id(&token.to_string()).as_deref(), Some("size-1-1"));
}

#[tokio::test]
async fn test_outer_duplication_skips_inner_instances() {
    let orchestrator = orchestrator(nested_repeaters());
    orchestrator.duplicate("rooms").await.unwrap();
    assert!(orchestrator.store().snapshot().await.contains_node("room-1"));

    // The floor template now has a room instance under its rooms repeater;
    // a new floor copies the template, not that instance.
    let outer = orchestrator.duplicate("floors").await.unwrap();
    assert_eq!(outer.suffix, 2);
    assert!(!outer.created_node_ids.iter().any(|id| id.starts_with("room-1")));
    assert!(outer.created_node_ids.contains(&"room-2".to_string()));
    assert!(audit_scopes(&*orchestrator.store().snapshot().await).is_empty());
}

#[tokio::test]
async fn test_duplications_persist_to_the_store_file() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("tree.json");
    tbl_engine::test_utils::write_roof_store(&path).await.unwrap();

    let store = Arc::new(CapabilityStore::open(&path).await.unwrap());
    let orchestrator = DuplicationOrchestrator::new(Arc::clone(&store));
    let report = orchestrator.duplicate("roofs").await.unwrap();

    let reopened = CapabilityStore::open(&path).await.unwrap();
    let snapshot = reopened.snapshot().await;
    for id in &report.created_node_ids {
        assert!(snapshot.contains_node(id), "{id} was not persisted");
    }
    assert_eq!(snapshot.node("roofs").unwrap().repeater.as_ref().unwrap().max_suffix, 1);
}
