use serde::{Deserialize, Serialize};
use std::fmt;

use super::formula::Formula;
use super::value::Value;
use crate::reference::{ParsedReference, ReferenceKind};

/// The four capability kinds a node can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Formula,
    Condition,
    Table,
    Variable,
}

impl CapabilityKind {
    pub const ALL: [Self; 4] = [Self::Formula, Self::Condition, Self::Table, Self::Variable];

    /// The reference kind whose tokens address this capability kind.
    #[must_use]
    pub const fn reference_kind(self) -> ReferenceKind {
        match self {
            Self::Formula => ReferenceKind::Formula,
            Self::Condition => ReferenceKind::Condition,
            Self::Table => ReferenceKind::Table,
            Self::Variable => ReferenceKind::Variable,
        }
    }

    /// Inverse of [`reference_kind`](Self::reference_kind); `None` for field references.
    #[must_use]
    pub const fn from_reference_kind(kind: ReferenceKind) -> Option<Self> {
        match kind {
            ReferenceKind::Field => None,
            ReferenceKind::Formula => Some(Self::Formula),
            ReferenceKind::Condition => Some(Self::Condition),
            ReferenceKind::Table => Some(Self::Table),
            ReferenceKind::Variable => Some(Self::Variable),
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Formula => write!(f, "formula"),
            Self::Condition => write!(f, "condition"),
            Self::Table => write!(f, "table"),
            Self::Variable => write!(f, "variable"),
        }
    }
}

/// Either a reference to resolve or a literal value.
///
/// JSON shape: `{"ref": "<token>"}` or `{"value": <value>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Reference {
        #[serde(rename = "ref")]
        reference: ParsedReference,
    },
    Literal {
        value: Value,
    },
}

impl Operand {
    pub fn reference(reference: ParsedReference) -> Self {
        Self::Reference {
            reference,
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    #[must_use]
    pub const fn as_reference(&self) -> Option<&ParsedReference> {
        match self {
            Self::Reference {
                reference,
            } => Some(reference),
            Self::Literal {
                ..
            } => None,
        }
    }

    pub const fn as_reference_mut(&mut self) -> Option<&mut ParsedReference> {
        match self {
            Self::Reference {
                reference,
            } => Some(reference),
            Self::Literal {
                ..
            } => None,
        }
    }
}

/// Comparison operators usable in condition branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = "eq", alias = "==", alias = "=")]
    Eq,
    #[serde(rename = "ne", alias = "!=", alias = "<>")]
    Ne,
    #[serde(rename = "gt", alias = ">")]
    Gt,
    #[serde(rename = "gte", alias = ">=")]
    Gte,
    #[serde(rename = "lt", alias = "<")]
    Lt,
    #[serde(rename = "lte", alias = "<=")]
    Lte,
    #[serde(rename = "isEmpty", alias = "is_empty")]
    IsEmpty,
    #[serde(rename = "isNotEmpty", alias = "is_not_empty")]
    IsNotEmpty,
}

impl ComparisonOp {
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::IsEmpty | Self::IsNotEmpty)
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "≠",
            Self::Gt => ">",
            Self::Gte => "≥",
            Self::Lt => "<",
            Self::Lte => "≤",
            Self::IsEmpty => "is empty",
            Self::IsNotEmpty => "is not empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub left: Operand,
    pub op: ComparisonOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Operand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub when: Comparison,
    pub then: Operand,
}

/// A condition capability: ordered branches plus a mandatory fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub id: String,
    pub node_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub branches: Vec<Branch>,
    pub fallback: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupMode {
    Row,
    Column,
    Both,
}

/// How a table is searched and which cell is displayed.
///
/// Row lookups match `row_key` against the row labels, or against the cells of
/// `key_column` when set, and display `display_column`. Column lookups mirror
/// that with `column_key`, `key_row` and `display_row`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupConfig {
    pub mode: LookupMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_key: Option<Operand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_key: Option<Operand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_row: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_row: Option<String>,
}

/// A table capability. `data[r][c]` is the cell of row `rows[r]` and column `columns[c]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub node_id: String,
    #[serde(default)]
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<String>,
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
    pub lookup: LookupConfig,
}

/// Exposes a node's resolved value under a stable key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub id: String,
    pub node_id: String,
    pub exposed_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    /// Where the value comes from; the owning node itself when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<ParsedReference>,
}

/// The closed set of capability records.
#[derive(Debug, Clone, PartialEq)]
pub enum Capability {
    Formula(Formula),
    Condition(Condition),
    Table(Table),
    Variable(Variable),
}

impl Capability {
    #[must_use]
    pub const fn kind(&self) -> CapabilityKind {
        match self {
            Self::Formula(_) => CapabilityKind::Formula,
            Self::Condition(_) => CapabilityKind::Condition,
            Self::Table(_) => CapabilityKind::Table,
            Self::Variable(_) => CapabilityKind::Variable,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Formula(f) => &f.id,
            Self::Condition(c) => &c.id,
            Self::Table(t) => &t.id,
            Self::Variable(v) => &v.id,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        match self {
            Self::Formula(f) => &f.node_id,
            Self::Condition(c) => &c.node_id,
            Self::Table(t) => &t.node_id,
            Self::Variable(v) => &v.node_id,
        }
    }

    /// Every reference the record holds, in declaration order.
    #[must_use]
    pub fn references(&self) -> Vec<&ParsedReference> {
        match self {
            Self::Formula(f) => f.tokens.references().collect(),
            Self::Condition(c) => {
                let mut refs = Vec::new();
                for branch in &c.branches {
                    refs.extend(branch.when.left.as_reference());
                    refs.extend(branch.when.right.as_ref().and_then(Operand::as_reference));
                    refs.extend(branch.then.as_reference());
                }
                refs.extend(c.fallback.as_reference());
                refs
            }
            Self::Table(t) => t
                .lookup
                .row_key
                .iter()
                .chain(t.lookup.column_key.iter())
                .filter_map(Operand::as_reference)
                .collect(),
            Self::Variable(v) => v.source_ref.iter().collect(),
        }
    }

    /// Mutable access to every reference, for re-targeting.
    pub fn references_mut(&mut self) -> Vec<&mut ParsedReference> {
        match self {
            Self::Formula(f) => f.tokens.references_mut().collect(),
            Self::Condition(c) => {
                let mut refs = Vec::new();
                for branch in &mut c.branches {
                    refs.extend(branch.when.left.as_reference_mut());
                    refs.extend(branch.when.right.as_mut().and_then(Operand::as_reference_mut));
                    refs.extend(branch.then.as_reference_mut());
                }
                refs.extend(c.fallback.as_reference_mut());
                refs
            }
            Self::Table(t) => t
                .lookup
                .row_key
                .iter_mut()
                .chain(t.lookup.column_key.iter_mut())
                .filter_map(Operand::as_reference_mut)
                .collect(),
            Self::Variable(v) => v.source_ref.iter_mut().collect(),
        }
    }

    /// Give the record a new id and owner.
    pub fn reassign(&mut self, id: String, node_id: String) {
        match self {
            Self::Formula(f) => {
                f.id = id;
                f.node_id = node_id;
            }
            Self::Condition(c) => {
                c.id = id;
                c.node_id = node_id;
            }
            Self::Table(t) => {
                t.id = id;
                t.node_id = node_id;
            }
            Self::Variable(v) => {
                v.id = id;
                v.node_id = node_id;
            }
        }
    }
}
