//! Transport-agnostic endpoint handlers
//!
//! [`EngineService`] is what an HTTP layer (or the CLI) calls. Each handler
//! takes plain request data and returns a serde payload:
//!
//! | Handler | Success payload |
//! |---|---|
//! | [`evaluate_formula`](EngineService::evaluate_formula) | `{ value, trace }` |
//! | [`evaluate_condition`](EngineService::evaluate_condition) | `{ value, trace, matchedBranch, branchesEvaluated }` |
//! | [`evaluate_table`](EngineService::evaluate_table) | `{ value, trace, row, column }` |
//! | [`duplicate_repeater`](EngineService::duplicate_repeater) | `{ scopeId, suffix, createdNodeIds, ... }` |
//! | [`remove_instance`](EngineService::remove_instance) | `{ scopeId, suffix, removedNodeIds, ... }` |
//! | [`validate`](EngineService::validate) | `{ ok, structure, scopes, cycles, danglingReferences }` |
//! | [`recalc_tree`](EngineService::recalc_tree) | `{ treeId, evaluated, failed }` |
//!
//! Evaluation handlers never fail: a broken capability produces the
//! `{ ok: false, reason, category, display }` body. They are safe to retry.
//! `duplicate_repeater` is not: every successful call adds one instance.

pub mod payload;

pub use payload::{
    ConditionBody, ConditionResponse, DuplicateResponse, EvaluateRequest, EvaluationBody,
    EvaluationResponse, FailureBody, RecalcFailure, RecalcResponse, RemoveInstanceResponse,
    TableBody, TableResponse, ValidationResponse,
};

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::core::EngineError;
use crate::duplication::{DuplicationOrchestrator, audit_scopes};
use crate::eval::{EvalSettings, Evaluator};
use crate::models::{TreeNode, Value};
use crate::store::{CapabilityStore, ReferenceGraph, TreeSnapshot};

pub struct EngineService {
    store: Arc<CapabilityStore>,
    orchestrator: DuplicationOrchestrator,
    settings: EvalSettings,
}

impl EngineService {
    pub fn new(store: Arc<CapabilityStore>, config: &EngineConfig) -> Self {
        let orchestrator = DuplicationOrchestrator::with_options(Arc::clone(&store), config.duplication_options());
        Self {
            store,
            orchestrator,
            settings: config.to_eval_settings(),
        }
    }

    pub const fn store(&self) -> &Arc<CapabilityStore> {
        &self.store
    }

    pub const fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    pub async fn evaluate_formula(&self, request: &EvaluateRequest) -> EvaluationResponse {
        let snapshot = self.store.snapshot().await;
        let mut evaluator = self.evaluator(&snapshot, &request.context);
        let outcome = evaluator.evaluate_formula(&request.id);
        EvaluationResponse::from_outcome(outcome, &self.settings.empty_display)
    }

    pub async fn evaluate_condition(&self, request: &EvaluateRequest) -> ConditionResponse {
        let snapshot = self.store.snapshot().await;
        let mut evaluator = self.evaluator(&snapshot, &request.context);
        let outcome = evaluator.evaluate_condition(&request.id);
        ConditionResponse::from_outcome(outcome, &self.settings.empty_display)
    }

    pub async fn evaluate_table(&self, request: &EvaluateRequest) -> TableResponse {
        let snapshot = self.store.snapshot().await;
        let mut evaluator = self.evaluator(&snapshot, &request.context);
        let (outcome, matched) = evaluator.evaluate_table_match(&request.id);
        TableResponse::from_parts(outcome, matched, &self.settings.empty_display)
    }

    /// Add one instance to a repeater.
    pub async fn duplicate_repeater(&self, repeater_id: &str) -> Result<DuplicateResponse> {
        let report = self.orchestrator.duplicate(repeater_id).await?;
        Ok(report.into())
    }

    pub async fn remove_instance(&self, repeater_id: &str, scope_id: &str) -> Result<RemoveInstanceResponse> {
        let report = self.orchestrator.remove_instance(repeater_id, scope_id).await?;
        Ok(report.into())
    }

    /// Check store structure, clone scopes and reference cycles. Dangling
    /// references are listed but do not make the store invalid.
    pub async fn validate(&self) -> ValidationResponse {
        let snapshot = self.store.snapshot().await;

        let tree_ids: BTreeSet<&str> = snapshot.nodes().map(|node| node.tree_id.as_str()).collect();
        let cycles: Vec<String> = tree_ids
            .into_iter()
            .filter_map(|tree_id| match ReferenceGraph::build(&snapshot, tree_id).detect_cycles() {
                Ok(()) => None,
                Err(EngineError::CircularReference {
                    chain,
                }) => Some(format!("{tree_id}: {chain}")),
                Err(other) => Some(format!("{tree_id}: {other}")),
            })
            .collect();

        let mut response = ValidationResponse {
            ok: false,
            structure: snapshot.validate(),
            scopes: audit_scopes(&snapshot),
            cycles,
            dangling_references: snapshot
                .dangling_references()
                .into_iter()
                .map(|(key, reference)| format!("{key} → {reference}"))
                .collect(),
        };
        response.ok = response.issue_count() == 0;
        debug!(issues = response.issue_count(), dangling = response.dangling_references.len(), "validated store");
        response
    }

    /// Evaluate the active capability of every node of a tree, dependencies
    /// first, and write the results into the value cache.
    pub async fn recalc_tree(&self, tree_id: &str, context: &BTreeMap<String, Value>) -> Result<RecalcResponse> {
        let snapshot = self.store.snapshot().await;
        if snapshot.tree_nodes(tree_id).next().is_none() {
            return Err(EngineError::Other {
                message: format!("Tree '{tree_id}' has no nodes"),
            }
            .into());
        }

        let (node_ids, cycle) = match ReferenceGraph::build(&snapshot, tree_id).dependency_order() {
            Ok(order) => {
                let mut seen = HashSet::new();
                let ids = order
                    .iter()
                    .filter_map(|key| {
                        let owner = snapshot.capability(key.kind, &key.id)?.node_id();
                        let active = snapshot.node(owner).and_then(TreeNode::active_capability)?;
                        (active == (key.kind, key.id.as_str()) && seen.insert(owner)).then(|| owner.to_string())
                    })
                    .collect();
                (ids, None)
            }
            Err(err) => (nodes_with_capabilities(&snapshot, tree_id), Some(err.to_string())),
        };

        let mut response = RecalcResponse {
            tree_id: tree_id.to_string(),
            cycle,
            ..RecalcResponse::default()
        };
        let mut evaluator = self.evaluator(&snapshot, context);
        for node_id in node_ids {
            let Some(outcome) = evaluator.evaluate_node_and_cache(&node_id) else {
                continue;
            };
            if let Err(failure) = &outcome.result {
                response.failed.push(RecalcFailure {
                    node_id: node_id.clone(),
                    reason: failure.to_string(),
                    category: failure.category(),
                });
            }
            response.evaluated.push(node_id);
        }

        self.store.persist().await?;
        info!(
            tree = tree_id,
            evaluated = response.evaluated.len(),
            failed = response.failed.len(),
            "recalculated tree"
        );
        Ok(response)
    }

    fn evaluator<'a>(&'a self, snapshot: &'a TreeSnapshot, context: &'a BTreeMap<String, Value>) -> Evaluator<'a> {
        Evaluator::new(snapshot, context, self.settings.clone()).with_cache(self.store.cache())
    }
}

fn nodes_with_capabilities(snapshot: &TreeSnapshot, tree_id: &str) -> Vec<String> {
    snapshot
        .tree_nodes(tree_id)
        .filter(|node| node.active_capability().is_some())
        .map(|node| node.id.clone())
        .collect()
}
