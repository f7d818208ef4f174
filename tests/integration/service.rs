use std::sync::Arc;

use tbl_engine::api::{ConditionResponse, EngineService, EvaluateRequest};
use tbl_engine::config::EngineConfig;
use tbl_engine::models::Value;
use tbl_engine::store::CapabilityStore;
use tbl_engine::test_utils::context;

use crate::common::TestStore;

async fn service(store: &TestStore) -> EngineService {
    let store = CapabilityStore::open(store.store_path()).await.unwrap();
    EngineService::new(Arc::new(store), &EngineConfig::default())
}

#[tokio::test]
async fn test_recalc_cache_survives_reopen() {
    let store = TestStore::roof_section().await.unwrap();
    let values = context([("width", 20.0), ("length", 6.0), ("rate", 2.0)]);

    let response = service(&store).await.recalc_tree("quote", &values).await.unwrap();
    assert!(response.cycle.is_none());

    let reopened = store.open().await.unwrap();
    assert_eq!(reopened.cache().value("area"), Some(Value::Number(120.0)));
    assert_eq!(reopened.cache().value("cost"), Some(Value::Number(240.0)));

    // Cached values feed later evaluations when the context is silent.
    let service = EngineService::new(Arc::new(reopened), &EngineConfig::default());
    let response = service.evaluate_condition(&EvaluateRequest::new("c-pitch")).await;
    let ConditionResponse::Ok(body) = response else {
        panic!("expected the cached area to be used");
    };
    assert_eq!(body.value, Value::text("large"));
}

#[tokio::test]
async fn test_retired_suffix_survives_reopen() {
    let store = TestStore::roof_section().await.unwrap();

    let first = service(&store).await.duplicate_repeater("roofs").await.unwrap();
    service(&store).await.remove_instance("roofs", &first.scope_id).await.unwrap();

    let second = service(&store).await.duplicate_repeater("roofs").await.unwrap();
    assert_eq!(second.suffix, 2);
    assert!(second.created_node_ids.contains(&"pan-2".to_string()));
    assert!(service(&store).await.validate().await.ok);
}

#[tokio::test]
async fn test_removing_twice_fails() {
    let store = TestStore::roof_section().await.unwrap();
    let service = service(&store).await;

    let instance = service.duplicate_repeater("roofs").await.unwrap();
    service.remove_instance("roofs", &instance.scope_id).await.unwrap();
    let err = service.remove_instance("roofs", &instance.scope_id).await.unwrap_err();
    assert!(err.to_string().contains(&instance.scope_id));
}

#[tokio::test]
async fn test_concurrent_duplications_get_distinct_suffixes() {
    let store = TestStore::roof_section().await.unwrap();
    let service = Arc::new(service(&store).await);

    let a = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.duplicate_repeater("roofs").await }
    });
    let b = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.duplicate_repeater("roofs").await }
    });
    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());

    let mut suffixes = vec![a.suffix, b.suffix];
    suffixes.sort_unstable();
    assert_eq!(suffixes, vec![1, 2]);
    assert_ne!(a.scope_id, b.scope_id);

    let validation = service.validate().await;
    assert!(validation.ok, "{validation:?}");
}

#[tokio::test]
async fn test_duplicating_a_field_is_rejected() {
    let store = TestStore::roof_section().await.unwrap();
    let service = service(&store).await;

    let err = service.duplicate_repeater("width").await.unwrap_err();
    assert!(err.to_string().contains("not a repeater"), "{err}");
    let snapshot = service.store().snapshot().await;
    assert!(!snapshot.contains_node("width-1"));
}
