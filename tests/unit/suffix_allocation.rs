use std::sync::Arc;

use tbl_engine::duplication::DuplicationOrchestrator;
use tbl_engine::store::CapabilityStore;
use tbl_engine::suffix::SuffixAllocator;
use tbl_engine::test_utils::fixtures::{TEMPLATE_NODE_IDS, TREE_ID};
use tbl_engine::test_utils::{init_test_logging, roof_section};

#[test]
fn test_untouched_template_starts_at_one() {
    let snapshot = roof_section();
    let mut allocator = SuffixAllocator::seed(&snapshot, TREE_ID, TEMPLATE_NODE_IDS);
    assert_eq!(allocator.max_used("pan"), 0);
    assert_eq!(allocator.allocate_group(&TEMPLATE_NODE_IDS).unwrap(), 1);
}

#[tokio::test]
async fn test_seeded_from_existing_clones() {
    init_test_logging(None);
    let store = Arc::new(CapabilityStore::in_memory(roof_section()));
    let orchestrator = DuplicationOrchestrator::new(Arc::clone(&store));
    orchestrator.duplicate("roofs").await.unwrap();
    orchestrator.duplicate("roofs").await.unwrap();

    let snapshot = store.snapshot().await;
    let mut allocator = SuffixAllocator::seed(&snapshot, TREE_ID, TEMPLATE_NODE_IDS);
    for id in TEMPLATE_NODE_IDS {
        assert_eq!(allocator.max_used(id), 2, "{id}");
    }
    assert_eq!(allocator.allocate_group(&TEMPLATE_NODE_IDS).unwrap(), 3);
    assert_eq!(allocator.allocate("pan").unwrap(), 4);
}

#[tokio::test]
async fn test_repeater_high_water_mark_outlives_clones() {
    let store = Arc::new(CapabilityStore::in_memory(roof_section()));
    let orchestrator = DuplicationOrchestrator::new(Arc::clone(&store));
    let report = orchestrator.duplicate("roofs").await.unwrap();
    orchestrator.remove_instance("roofs", &report.scope_id).await.unwrap();

    let snapshot = store.snapshot().await;
    let floor = snapshot.node("roofs").and_then(|node| node.repeater.as_ref()).map_or(0, |config| config.max_suffix);
    assert_eq!(floor, 1);

    // No clone is left to seed from; only the floor keeps suffix 1 retired.
    let mut seeded = SuffixAllocator::seed(&snapshot, TREE_ID, TEMPLATE_NODE_IDS);
    assert_eq!(seeded.max_used("pan"), 0);
    let mut floored = seeded.clone().with_floor(floor);
    assert_eq!(seeded.allocate_group(&TEMPLATE_NODE_IDS).unwrap(), 1);
    assert_eq!(floored.allocate_group(&TEMPLATE_NODE_IDS).unwrap(), 2);
}
