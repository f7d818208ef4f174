//! Condition Evaluator
//!
//! A condition is a small state machine. It starts in
//! [`ConditionState::Evaluating`] on the first branch and moves forward one
//! branch at a time until a branch test holds ([`ConditionState::Matched`]) or
//! the list runs out ([`ConditionState::Fallback`]). Branches after the match
//! are never tested, and only the winning action is resolved.

use serde::Serialize;

use super::resolver::Resolved;
use super::{EvalFailure, EvalResult, Evaluation, Evaluator};
use crate::models::{Branch, Comparison, ComparisonOp, Condition, Operand, Value};

/// Tolerance for numeric equality in branch tests.
const EQUALITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "branch", rename_all = "camelCase")]
pub enum ConditionState {
    /// Testing the branch at this index
    Evaluating(usize),
    /// The branch at this index held
    Matched(usize),
    /// No branch held
    Fallback,
}

/// What a condition evaluation did, beyond its result.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionOutcome {
    pub result: EvalResult,
    /// Index of the winning branch; `None` when the fallback was taken or a test failed
    pub matched_branch: Option<usize>,
    /// Number of branch tests run
    pub branches_evaluated: usize,
    pub transitions: Vec<ConditionState>,
    pub warnings: Vec<String>,
}

impl ConditionOutcome {
    pub(crate) fn failed(failure: EvalFailure) -> Self {
        Self {
            result: Err(failure),
            matched_branch: None,
            branches_evaluated: 0,
            transitions: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().ok().map(|evaluation| &evaluation.value)
    }

    /// The state the machine stopped in.
    #[must_use]
    pub fn final_state(&self) -> Option<ConditionState> {
        self.transitions.last().copied()
    }

    /// `true` when the fallback action produced the result.
    #[must_use]
    pub fn used_fallback(&self) -> bool {
        self.final_state() == Some(ConditionState::Fallback)
    }
}

struct BranchTest {
    holds: bool,
    trace: String,
}

pub(crate) fn evaluate(evaluator: &mut Evaluator<'_>, condition: &Condition) -> ConditionOutcome {
    let mut outcome = ConditionOutcome {
        result: Err(EvalFailure::invalid("condition was not evaluated")),
        matched_branch: None,
        branches_evaluated: 0,
        transitions: Vec::with_capacity(condition.branches.len() + 1),
        warnings: Vec::new(),
    };

    for (index, branch) in condition.branches.iter().enumerate() {
        outcome.transitions.push(ConditionState::Evaluating(index));
        outcome.branches_evaluated += 1;
        evaluator.record_branch_test();

        let test = match test_branch(evaluator, &branch.when) {
            Ok(test) => test,
            Err(failure) => {
                outcome.result = Err(failure);
                return outcome;
            }
        };
        if test.holds {
            outcome.transitions.push(ConditionState::Matched(index));
            outcome.matched_branch = Some(index);
            let step = branch_name(branch, index);
            outcome.result = take_action(evaluator, &branch.then, &format!("{} → {step}", test.trace));
            return outcome;
        }
    }

    outcome.transitions.push(ConditionState::Fallback);
    outcome.result = take_action(evaluator, &condition.fallback, "no branch matched → fallback");
    outcome
}

fn branch_name(branch: &Branch, index: usize) -> String {
    match &branch.label {
        Some(label) if !label.trim().is_empty() => label.clone(),
        _ => format!("branch {}", index + 1),
    }
}

fn take_action(evaluator: &mut Evaluator<'_>, action: &Operand, path: &str) -> EvalResult {
    let resolved = evaluator.resolve_operand(action)?;
    let shown = evaluator.show(&resolved.value);
    Ok(Evaluation {
        value: resolved.value,
        trace: format!("{path} → {shown}"),
    })
}

fn test_branch(evaluator: &mut Evaluator<'_>, comparison: &Comparison) -> Result<BranchTest, EvalFailure> {
    let left = evaluator.resolve_operand(&comparison.left)?;
    let shown_left = evaluator.show(&left.value);

    if comparison.op.is_unary() {
        let empty = left.value.is_empty();
        return Ok(BranchTest {
            holds: if comparison.op == ComparisonOp::IsEmpty { empty } else { !empty },
            trace: format!("{shown_left} {}", comparison.op.symbol()),
        });
    }

    let Some(right_operand) = &comparison.right else {
        return Err(EvalFailure::invalid(format!("'{}' needs a right operand", comparison.op.symbol())));
    };
    let right = evaluator.resolve_operand(right_operand)?;
    let shown_right = evaluator.show(&right.value);
    let holds = compare(evaluator, comparison.op, &left, &right)?;

    Ok(BranchTest {
        holds,
        trace: format!("{shown_left} {} {shown_right}", comparison.op.symbol()),
    })
}

fn compare(
    evaluator: &mut Evaluator<'_>,
    op: ComparisonOp,
    left: &Resolved,
    right: &Resolved,
) -> Result<bool, EvalFailure> {
    match op {
        ComparisonOp::Eq => Ok(equal(&left.value, &right.value)),
        ComparisonOp::Ne => Ok(!equal(&left.value, &right.value)),
        ComparisonOp::IsEmpty => Ok(left.value.is_empty()),
        ComparisonOp::IsNotEmpty => Ok(!left.value.is_empty()),
        ComparisonOp::Gt | ComparisonOp::Gte | ComparisonOp::Lt | ComparisonOp::Lte => {
            if left.value.is_empty() || right.value.is_empty() {
                let operand = if left.value.is_empty() { left } else { right };
                evaluator.warn(format!(
                    "'{}' compared against an empty value ({}); treated as false",
                    op.symbol(),
                    operand.reference.as_deref().unwrap_or("literal")
                ));
                return Ok(false);
            }
            let a = ordered(op, &left.value)?;
            let b = ordered(op, &right.value)?;
            Ok(match op {
                ComparisonOp::Gt => a > b,
                ComparisonOp::Gte => a >= b,
                ComparisonOp::Lt => a < b,
                _ => a <= b,
            })
        }
    }
}

fn ordered(op: ComparisonOp, value: &Value) -> Result<f64, EvalFailure> {
    value.as_number().ok_or_else(|| EvalFailure::TypeMismatch {
        operation: op.symbol().to_string(),
        found: format!("{} '{value}'", value.type_name()),
    })
}

/// Numeric equality when both sides are numbers, trimmed text equality otherwise.
fn equal(left: &Value, right: &Value) -> bool {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => (a - b).abs() <= EQUALITY_EPSILON,
        _ if left.is_empty() && right.is_empty() => true,
        _ => left.to_string().trim() == right.to_string().trim(),
    }
}
