//! Request and response bodies of the engine's endpoints, camelCase JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::duplication::{DuplicationReport, RemovalReport};
use crate::eval::{ConditionOutcome, ErrorCategory, EvalFailure, EvalOutcome, TableMatch};
use crate::models::Value;

/// Evaluate one capability against a value context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    pub id: String,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl EvaluateRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// `{ "value", "trace" }` on success.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationBody {
    pub value: Value,
    pub trace: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// `{ "ok": false, "reason", "category", "display" }` when an evaluation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureBody {
    pub ok: bool,
    pub reason: String,
    pub code: &'static str,
    pub category: ErrorCategory,
    /// What to show the end user instead of a value
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl FailureBody {
    pub fn new(failure: &EvalFailure, empty_display: &str, warnings: Vec<String>) -> Self {
        let chain = match failure {
            EvalFailure::Cycle {
                chain,
            } => Some(chain.clone()),
            _ => None,
        };
        Self {
            ok: false,
            reason: failure.to_string(),
            code: failure.code(),
            category: failure.category(),
            display: empty_display.to_string(),
            chain,
            warnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EvaluationResponse {
    Ok(EvaluationBody),
    Failed(FailureBody),
}

impl EvaluationResponse {
    pub fn from_outcome(outcome: EvalOutcome, empty_display: &str) -> Self {
        match outcome.result {
            Ok(evaluation) => Self::Ok(EvaluationBody {
                value: evaluation.value,
                trace: evaluation.trace,
                warnings: outcome.warnings,
            }),
            Err(failure) => Self::Failed(FailureBody::new(&failure, empty_display, outcome.warnings)),
        }
    }

    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Ok(body) => Some(&body.value),
            Self::Failed(_) => None,
        }
    }
}

/// Condition result with the matched branch, for the authoring UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionBody {
    pub value: Value,
    pub trace: String,
    /// One-based index of the winning branch, `null` for the fallback
    pub matched_branch: Option<usize>,
    pub branches_evaluated: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConditionResponse {
    Ok(ConditionBody),
    Failed(FailureBody),
}

impl ConditionResponse {
    pub fn from_outcome(outcome: ConditionOutcome, empty_display: &str) -> Self {
        match outcome.result {
            Ok(evaluation) => Self::Ok(ConditionBody {
                value: evaluation.value,
                trace: evaluation.trace,
                matched_branch: outcome.matched_branch.map(|index| index + 1),
                branches_evaluated: outcome.branches_evaluated,
                warnings: outcome.warnings,
            }),
            Err(failure) => Self::Failed(FailureBody::new(&failure, empty_display, outcome.warnings)),
        }
    }

    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Table result with the matched row and column labels.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableBody {
    pub value: Value,
    pub trace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TableResponse {
    Ok(TableBody),
    Failed(FailureBody),
}

impl TableResponse {
    pub fn from_parts(outcome: EvalOutcome, matched: Option<TableMatch>, empty_display: &str) -> Self {
        match outcome.result {
            Ok(evaluation) => {
                let (row, column) = match matched {
                    Some(TableMatch::Found {
                        row,
                        column,
                        ..
                    }) => (row, column),
                    _ => (None, None),
                };
                Self::Ok(TableBody {
                    value: evaluation.value,
                    trace: evaluation.trace,
                    row,
                    column,
                    warnings: outcome.warnings,
                })
            }
            Err(failure) => Self::Failed(FailureBody::new(&failure, empty_display, outcome.warnings)),
        }
    }

    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// `{ "scopeId", "suffix", "createdNodeIds" }` plus the rewrite summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateResponse {
    pub scope_id: String,
    pub suffix: u32,
    pub created_node_ids: Vec<String>,
    pub root_node_ids: Vec<String>,
    pub rewritten_references: usize,
    pub shared_references: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unmarked_references: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_templates: Vec<String>,
}

impl From<DuplicationReport> for DuplicateResponse {
    fn from(report: DuplicationReport) -> Self {
        Self {
            scope_id: report.scope_id,
            suffix: report.suffix,
            created_node_ids: report.created_node_ids,
            root_node_ids: report.root_node_ids,
            rewritten_references: report.rewritten_references,
            shared_references: report.shared_references,
            unmarked_references: report.unmarked_references,
            skipped_templates: report.skipped_templates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveInstanceResponse {
    pub scope_id: String,
    pub suffix: u32,
    pub removed_node_ids: Vec<String>,
    pub removed_capabilities: usize,
}

impl From<RemovalReport> for RemoveInstanceResponse {
    fn from(report: RemovalReport) -> Self {
        Self {
            scope_id: report.scope_id,
            suffix: report.suffix,
            removed_node_ids: report.removed_node_ids,
            removed_capabilities: report.removed_capabilities,
        }
    }
}

/// Structural, scope and reference-graph checks over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub ok: bool,
    pub structure: Vec<String>,
    pub scopes: Vec<String>,
    pub cycles: Vec<String>,
    /// `kind:id → token` for every reference that resolves nowhere
    pub dangling_references: Vec<String>,
}

impl ValidationResponse {
    pub fn issue_count(&self) -> usize {
        self.structure.len() + self.scopes.len() + self.cycles.len()
    }
}

/// One node whose recalculation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcFailure {
    pub node_id: String,
    pub reason: String,
    pub category: ErrorCategory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcResponse {
    pub tree_id: String,
    /// Node ids in the order they were evaluated
    pub evaluated: Vec<String>,
    pub failed: Vec<RecalcFailure>,
    /// Set when the capability graph has a cycle; nodes were then evaluated in id order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<String>,
}
