//! Capability evaluation
//!
//! Evaluation is a pure read of a [`TreeSnapshot`](crate::store::TreeSnapshot)
//! plus a caller-supplied [`ValueContext`]. Failures are returned as
//! [`EvalFailure`] values inside an [`EvalOutcome`], never as panics or
//! `Err` from the surrounding operation, so one broken formula cannot stop the
//! rest of a tree from rendering.
//!
//! The [`Evaluator`] is the single dispatch point over
//! [`Capability`](crate::models::Capability); the per-kind algorithms live in
//! [`expression`], [`condition`] and [`table`].
//!
//! # Examples
//!
//! ```rust
//! use std::collections::HashMap;
//! use tbl_engine::eval::{EvalSettings, Evaluator};
//! use tbl_engine::models::{Capability, Formula, NodeType, TokenSequence, TreeNode, Value};
//! use tbl_engine::store::TreeSnapshot;
//!
//! let mut snapshot = TreeSnapshot::new();
//! snapshot.insert_node(TreeNode::new("total", "t", None, NodeType::Field)).unwrap();
//! snapshot
//!     .insert_capability(Capability::Formula(Formula {
//!         id: "f".to_string(),
//!         node_id: "total".to_string(),
//!         name: String::new(),
//!         tokens: TokenSequence::parse(&["@value.A", "+", "@value.B"]).unwrap(),
//!     }))
//!     .unwrap();
//!
//! let context = HashMap::from([
//!     ("A".to_string(), Value::Number(2.0)),
//!     ("B".to_string(), Value::Number(3.0)),
//! ]);
//! let mut evaluator = Evaluator::new(&snapshot, &context, EvalSettings::default());
//! let outcome = evaluator.evaluate_formula("f");
//! let evaluation = outcome.result.unwrap();
//! assert_eq!(evaluation.value, Value::Number(5.0));
//! assert_eq!(evaluation.trace, "2 + 3 = 5");
//! ```

pub mod condition;
pub mod expression;
pub mod resolver;
pub mod table;

pub use condition::{ConditionOutcome, ConditionState};
pub use resolver::{EvalStats, Evaluator};
pub use table::TableMatch;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

use crate::constants::{DEFAULT_EMPTY_DISPLAY, DEFAULT_MAX_REFERENCE_DEPTH};
use crate::models::Value;
use crate::store::CapabilityKey;

/// Source of live values: current form answers and exposed variable keys.
pub trait ValueContext: Send + Sync {
    fn lookup(&self, key: &str) -> Option<Value>;
}

impl ValueContext for HashMap<String, Value> {
    fn lookup(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }
}

impl ValueContext for BTreeMap<String, Value> {
    fn lookup(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }
}

/// A context with no values at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContext;

impl ValueContext for EmptyContext {
    fn lookup(&self, _key: &str) -> Option<Value> {
        None
    }
}

/// Knobs taken from [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalSettings {
    /// Deepest chain of capability references followed before giving up
    pub max_depth: usize,
    /// Placeholder rendered for empty operands and failed evaluations
    pub empty_display: String,
    /// Round numbers shown in traces; values themselves are never rounded
    pub decimal_places: Option<u32>,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_REFERENCE_DEPTH,
            empty_display: DEFAULT_EMPTY_DISPLAY.to_string(),
            decimal_places: None,
        }
    }
}

/// Error taxonomy for evaluation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    /// Missing or invalid input; shown to the user as a placeholder
    UserData,
    /// A token names something that does not exist or cannot be reached
    Reference,
    /// The reference graph loops back onto the evaluated capability
    Cycle,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserData => write!(f, "user data"),
            Self::Reference => write!(f, "reference"),
            Self::Cycle => write!(f, "cycle"),
        }
    }
}

/// Why an evaluation produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalFailure {
    #[error("missing value for {}", .reference.as_deref().unwrap_or("operand"))]
    MissingValue {
        reference: Option<String>,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("cannot apply '{operation}' to {found}")]
    TypeMismatch {
        operation: String,
        found: String,
    },

    #[error("reference '{reference}' does not resolve")]
    UnresolvedReference {
        reference: String,
    },

    #[error("reference cycle: {}", .chain.join(" → "))]
    Cycle {
        chain: Vec<String>,
    },

    #[error("no table entry matches '{key}'")]
    NoMatch {
        key: String,
    },

    #[error("key '{key}' matches {count} table entries")]
    AmbiguousMatch {
        key: String,
        count: usize,
    },

    #[error("invalid expression: {message}")]
    InvalidExpression {
        message: String,
    },

    #[error("reference chain deeper than {depth}")]
    DepthExceeded {
        depth: usize,
    },
}

impl EvalFailure {
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingValue {
                ..
            }
            | Self::DivisionByZero
            | Self::TypeMismatch {
                ..
            }
            | Self::NoMatch {
                ..
            }
            | Self::AmbiguousMatch {
                ..
            }
            | Self::InvalidExpression {
                ..
            } => ErrorCategory::UserData,
            Self::UnresolvedReference {
                ..
            }
            | Self::DepthExceeded {
                ..
            } => ErrorCategory::Reference,
            Self::Cycle {
                ..
            } => ErrorCategory::Cycle,
        }
    }

    /// Stable machine-readable tag for payloads.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingValue {
                ..
            } => "missingValue",
            Self::DivisionByZero => "divisionByZero",
            Self::TypeMismatch {
                ..
            } => "typeMismatch",
            Self::UnresolvedReference {
                ..
            } => "unresolvedReference",
            Self::Cycle {
                ..
            } => "cycle",
            Self::NoMatch {
                ..
            } => "noMatch",
            Self::AmbiguousMatch {
                ..
            } => "ambiguousMatch",
            Self::InvalidExpression {
                ..
            } => "invalidExpression",
            Self::DepthExceeded {
                ..
            } => "depthExceeded",
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            message: message.into(),
        }
    }
}

/// A successful evaluation: the value and the human-readable explanation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub value: Value,
    pub trace: String,
}

pub type EvalResult = Result<Evaluation, EvalFailure>;

/// Result of evaluating one capability, with the warnings collected on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub capability: CapabilityKey,
    pub result: EvalResult,
    pub warnings: Vec<String>,
}

impl EvalOutcome {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().ok().map(|evaluation| &evaluation.value)
    }

    /// What the end user should see: the value, or the placeholder on failure.
    #[must_use]
    pub fn display(&self, empty_display: &str) -> String {
        match &self.result {
            Ok(evaluation) if !evaluation.value.is_empty() => evaluation.value.to_string(),
            _ => empty_display.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CapabilityKind;

    #[test]
    fn test_failure_categories() {
        assert_eq!(EvalFailure::DivisionByZero.category(), ErrorCategory::UserData);
        assert_eq!(
            EvalFailure::UnresolvedReference {
                reference: "x".to_string()
            }
            .category(),
            ErrorCategory::Reference
        );
        assert_eq!(
            EvalFailure::Cycle {
                chain: vec!["a".to_string()]
            }
            .category(),
            ErrorCategory::Cycle
        );
    }

    #[test]
    fn test_failure_messages() {
        let cycle = EvalFailure::Cycle {
            chain: vec!["formula:a".to_string(), "formula:b".to_string(), "formula:a".to_string()],
        };
        assert_eq!(cycle.to_string(), "reference cycle: formula:a → formula:b → formula:a");
        let missing = EvalFailure::MissingValue {
            reference: None,
        };
        assert_eq!(missing.to_string(), "missing value for operand");
    }

    #[test]
    fn test_outcome_display() {
        let ok = EvalOutcome {
            capability: CapabilityKey::new(CapabilityKind::Formula, "f"),
            result: Ok(Evaluation {
                value: Value::Number(5.0),
                trace: "2 + 3 = 5".to_string(),
            }),
            warnings: Vec::new(),
        };
        assert_eq!(ok.display("—"), "5");

        let failed = EvalOutcome {
            result: Err(EvalFailure::DivisionByZero),
            ..ok
        };
        assert_eq!(failed.display("—"), "—");
        assert!(failed.value().is_none());
    }

    #[test]
    fn test_contexts() {
        assert_eq!(EmptyContext.lookup("a"), None);
        let map = BTreeMap::from([("a".to_string(), Value::Bool(true))]);
        assert_eq!(map.lookup("a"), Some(Value::Bool(true)));
    }
}
