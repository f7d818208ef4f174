use predicates::prelude::*;

use crate::common::TestStore;

#[tokio::test]
async fn test_eval_formula_prints_value_and_trace() {
    let store = TestStore::roof_section().await.unwrap();

    store
        .tbl()
        .args(["eval", "formula", "f-area", "--set", "width=4", "--set", "length=2.5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("f-area = 10"))
        .stdout(predicate::str::contains("4 * 2.5 = 10"));
}

#[tokio::test]
async fn test_eval_json_matches_endpoint_payload() {
    let store = TestStore::roof_section().await.unwrap();

    let output = store
        .tbl()
        .args(["--format", "json", "eval", "condition", "c-pitch", "--set", "width=10", "--set", "length=7"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["value"], "medium");
    assert_eq!(json["matchedBranch"], 2);
    assert_eq!(json["branchesEvaluated"], 2);
}

#[tokio::test]
async fn test_eval_failure_is_a_result_not_an_error() {
    let store = TestStore::roof_section().await.unwrap();

    store
        .tbl()
        .args(["eval", "table", "t-supplier", "--set", "postcode=9999"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[noMatch]"));
}

#[tokio::test]
async fn test_eval_unknown_id_suggests_similar() {
    let store = TestStore::roof_section().await.unwrap();

    store
        .tbl()
        .args(["eval", "formula", "f-aera"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"))
        .stderr(predicate::str::contains("Did you mean 'f-area'"));
}

#[tokio::test]
async fn test_duplicate_then_validate() {
    let store = TestStore::roof_section().await.unwrap();

    store
        .tbl()
        .args(["duplicate", "roofs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Duplicated 'roofs' as instance 1"))
        .stdout(predicate::str::contains("pan-1"));

    store.tbl().arg("validate").assert().success().stdout(predicate::str::contains("Store is valid"));

    let snapshot = store.open().await.unwrap().snapshot().await;
    assert!(snapshot.contains_node("cost-1"));
}

#[tokio::test]
async fn test_duplicate_unknown_repeater_suggests_similar() {
    let store = TestStore::roof_section().await.unwrap();

    store
        .tbl()
        .args(["duplicate", "roof"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Did you mean 'roofs'"));
}

#[tokio::test]
async fn test_concurrent_processes_keep_every_instance() {
    let store = TestStore::roof_section().await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mut cmd = store.tbl();
            std::thread::spawn(move || cmd.args(["--format", "json", "duplicate", "roofs"]).output().unwrap())
        })
        .collect();

    let mut scopes = Vec::new();
    let mut suffixes = Vec::new();
    for handle in handles {
        let output = handle.join().unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        scopes.push(json["scopeId"].as_str().unwrap().to_string());
        suffixes.push(json["suffix"].as_u64().unwrap());
    }
    suffixes.sort_unstable();
    assert_eq!(suffixes, (1..=8).collect::<Vec<u64>>());

    let snapshot = store.open().await.unwrap().snapshot().await;
    let repeater = snapshot.node("roofs").unwrap().repeater.clone().unwrap();
    assert_eq!(repeater.max_suffix, 8);
    assert_eq!(repeater.instances.len(), 8);
    for scope in &scopes {
        assert!(repeater.instances.iter().any(|instance| &instance.scope_id == scope), "{scope} was lost");
    }
    for suffix in 1..=8 {
        assert!(snapshot.contains_node(&format!("pan-{suffix}")));
    }

    store.tbl().arg("validate").assert().success();
}

#[tokio::test]
async fn test_remove_instance_twice() {
    let store = TestStore::roof_section().await.unwrap();

    let output = store.tbl().args(["--format", "json", "duplicate", "roofs"]).output().unwrap();
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let scope = json["scopeId"].as_str().unwrap().to_string();

    store
        .tbl()
        .args(["remove-instance", "roofs", &scope])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed instance 1 of 'roofs'"));

    store
        .tbl()
        .args(["remove-instance", "roofs", &scope])
        .assert()
        .failure()
        .stderr(predicate::str::contains("can only be removed once"));
}

#[tokio::test]
async fn test_recalc_reports_counts() {
    let store = TestStore::roof_section().await.unwrap();

    store
        .tbl()
        .args(["recalc", "quote", "--set", "width=5", "--set", "length=4", "--set", "rate=2", "--set", "postcode=4000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recalculated 'quote'"))
        .stdout(predicate::str::contains("0 failed"));
}

#[test]
fn test_missing_store_file() {
    let temp = tempfile::TempDir::new().unwrap();

    assert_cmd::Command::cargo_bin("tbl")
        .unwrap()
        .env_remove("TBL_STORE")
        .env("TBL_CONFIG", temp.path().join("config.toml"))
        .env("NO_COLOR", "1")
        .args(["--store", temp.path().join("missing.json").to_str().unwrap(), "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.json"));
}

#[tokio::test]
async fn test_config_init_and_show() {
    let store = TestStore::roof_section().await.unwrap();

    store.tbl().args(["config", "init"]).assert().success().stdout(predicate::str::contains("Created config"));
    assert!(store.config_path().exists());

    store
        .tbl()
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));

    store
        .tbl()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_reference_depth = 64"));
}
