use std::sync::Arc;

use tbl_engine::duplication::DuplicationOrchestrator;
use tbl_engine::eval::{ConditionState, EmptyContext, ErrorCategory, EvalFailure, EvalSettings, Evaluator, TableMatch};
use tbl_engine::models::{Capability, Formula, TokenSequence, Value};
use tbl_engine::store::CapabilityStore;
use tbl_engine::test_utils::{context, roof_section};

use crate::common::formula;

#[test]
fn test_literal_addition() {
    let mut snapshot = roof_section();
    snapshot.insert_capability(formula("f-sum", "area", &["2", "+", "3"])).unwrap();

    let mut evaluator = Evaluator::new(&snapshot, &EmptyContext, EvalSettings::default());
    let evaluation = evaluator.evaluate_formula("f-sum").result.unwrap();
    assert_eq!(evaluation.value, Value::Number(5.0));
    assert_eq!(evaluation.trace, "2 + 3 = 5");
}

#[test]
fn test_area_and_cost_through_node_formula() {
    let snapshot = roof_section();
    let values = context([("width", 4.0), ("length", 2.5), ("rate", 3.0)]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());

    let area = evaluator.evaluate_formula("f-area").result.unwrap();
    assert_eq!(area.trace, "4 * 2.5 = 10");

    let cost = evaluator.evaluate_formula("f-cost").result.unwrap();
    assert_eq!(cost.value, Value::Number(30.0));
    assert_eq!(cost.trace, "10 * 3 = 30");
}

#[test]
fn test_evaluation_is_repeatable() {
    let snapshot = roof_section();
    let values = context([("width", 4.0), ("length", 2.5), ("rate", 3.0)]);

    let first = Evaluator::new(&snapshot, &values, EvalSettings::default()).evaluate_formula("f-cost");
    let second = Evaluator::new(&snapshot, &values, EvalSettings::default()).evaluate_formula("f-cost");
    assert_eq!(first, second);
}

#[test]
fn test_missing_input_is_a_user_data_failure() {
    let snapshot = roof_section();
    let values = context([("width", 4.0)]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());

    let outcome = evaluator.evaluate_formula("f-area");
    let failure = outcome.result.as_ref().unwrap_err();
    assert_eq!(failure.category(), ErrorCategory::UserData);
    assert_eq!(failure.code(), "missingValue");
    assert_eq!(outcome.display("n/a"), "n/a");
}

#[test]
fn test_condition_stops_at_first_match() {
    let snapshot = roof_section();
    let values = context([("width", 10.0), ("length", 6.0)]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());

    let outcome = evaluator.evaluate_condition("c-pitch");
    assert_eq!(outcome.matched_branch, Some(1));
    assert_eq!(outcome.branches_evaluated, 2);
    assert_eq!(evaluator.stats().branch_tests, 2);
    assert_eq!(outcome.final_state(), Some(ConditionState::Matched(1)));
    assert_eq!(outcome.result.unwrap().trace, "60 > 50 → branch 2 → medium");

    let values = context([("width", 20.0), ("length", 6.0)]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());
    let outcome = evaluator.evaluate_condition("c-pitch");
    assert_eq!(outcome.matched_branch, Some(0));
    assert_eq!(outcome.branches_evaluated, 1);
    assert_eq!(outcome.value(), Some(&Value::text("large")));
}

#[test]
fn test_condition_fallback() {
    let snapshot = roof_section();
    let values = context([("width", 2.0), ("length", 3.0)]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());

    let outcome = evaluator.evaluate_condition("c-pitch");
    assert!(outcome.used_fallback());
    assert_eq!(outcome.branches_evaluated, 2);
    assert_eq!(outcome.value(), Some(&Value::text("small")));
}

#[test]
fn test_supplier_lookup() {
    let snapshot = roof_section();
    let values = context([("postcode", "5150")]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());

    let matched = evaluator.lookup_table("t-supplier").unwrap();
    assert_eq!(matched.value(), Some(&Value::text("Sibelga")));
    let evaluation = evaluator.evaluate_table("t-supplier").result.unwrap();
    assert_eq!(evaluation.trace, "Suppliers[r1, Provider] = Sibelga");

    // Numbers match their text form.
    let values = context([("postcode", 4000.0)]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());
    assert_eq!(evaluator.evaluate_table("t-supplier").value(), Some(&Value::text("Resa")));
}

#[test]
fn test_supplier_lookup_without_match() {
    let snapshot = roof_section();
    let values = context([("postcode", "9999")]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());

    assert_eq!(evaluator.lookup_table("t-supplier").unwrap(), TableMatch::NoMatch {
        key: "9999".to_string()
    });
    let failure = evaluator.evaluate_table("t-supplier").result.unwrap_err();
    assert!(matches!(failure, EvalFailure::NoMatch { .. }));
    assert_eq!(failure.category(), ErrorCategory::UserData);
}

#[test]
fn test_variable_exposes_area() {
    let snapshot = roof_section();
    let values = context([("width", 3.0), ("length", 4.0)]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());

    let variable = evaluator.evaluate_variable("v-area").result.unwrap();
    assert_eq!(variable.value, Value::Number(12.0));
    assert_eq!(variable.trace, "roofArea = 12");
}

#[test]
fn test_cycle_reports_chain() {
    let mut snapshot = roof_section();
    snapshot.upsert_capability(Capability::Formula(Formula {
        id: "f-area".to_string(),
        node_id: "area".to_string(),
        name: String::new(),
        tokens: TokenSequence::parse(&["node-formula:f-cost", "/", "2"]).unwrap(),
    }));

    let values = context([("rate", 3.0)]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());
    let failure = evaluator.evaluate_formula("f-cost").result.unwrap_err();
    assert_eq!(failure.category(), ErrorCategory::Cycle);
    assert_eq!(failure, EvalFailure::Cycle {
        chain: vec!["formula:f-cost".to_string(), "formula:f-area".to_string(), "formula:f-cost".to_string()],
    });
}

#[test]
fn test_deeply_nested_formula_fails_alone() {
    let mut snapshot = roof_section();
    let mut tokens = vec!["("; 5000];
    tokens.extend(["@value.width", "*", "@value.length"]);
    tokens.extend(vec![")"; 5000]);
    snapshot.upsert_capability(Capability::Formula(Formula {
        id: "f-area".to_string(),
        node_id: "area".to_string(),
        name: String::new(),
        tokens: TokenSequence::parse(&tokens).unwrap(),
    }));

    let values = context([("width", 4.0), ("length", 2.5), ("rate", 3.0), ("postcode", 5150.0)]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());

    assert_eq!(evaluator.evaluate_formula("f-area").result.unwrap_err().code(), "invalidExpression");
    assert!(evaluator.evaluate_formula("f-cost").result.is_err());
    assert_eq!(evaluator.evaluate_table("t-supplier").value(), Some(&Value::text("Sibelga")));
}

#[tokio::test]
async fn test_clone_evaluates_against_its_own_inputs() {
    let store = Arc::new(CapabilityStore::in_memory(roof_section()));
    let orchestrator = DuplicationOrchestrator::new(Arc::clone(&store));
    orchestrator.duplicate("roofs").await.unwrap();
    let snapshot = store.snapshot().await;

    let values = context([("width", 4.0), ("length", 2.5), ("width-1", 2.0), ("length-1", 2.0), ("rate", 3.0)]);
    let mut evaluator = Evaluator::new(&snapshot, &values, EvalSettings::default());

    assert_eq!(evaluator.evaluate_formula("f-cost").value(), Some(&Value::Number(30.0)));
    let clone = evaluator.evaluate_formula("f-cost-1").result.unwrap();
    assert_eq!(clone.value, Value::Number(12.0));
    assert_eq!(clone.trace, "4 * 3 = 12");
    assert_eq!(evaluator.evaluate_condition("c-pitch-1").value(), Some(&Value::text("small")));
}
