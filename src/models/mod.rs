//! Data model of the form tree
//!
//! - [`TreeNode`] is one element of the tree. Its [`NodeCapabilities`] carry the
//!   capability flags with their active and linked ids; [`NodeMetadata`] carries
//!   clone provenance.
//! - [`Capability`] is the closed union of the records a node can own:
//!   [`Formula`], [`Condition`], [`Table`] and [`Variable`].
//! - [`Value`] is what evaluation consumes and produces.
//!
//! Reference tokens inside capability records are already parsed into
//! [`ParsedReference`](crate::reference::ParsedReference) when a record is
//! deserialized.

pub mod capability;
pub mod formula;
pub mod node;
pub mod value;

pub use capability::{
    Branch, Capability, CapabilityKind, Comparison, ComparisonOp, Condition, LookupConfig,
    LookupMode, Operand, Table, Variable,
};
pub use formula::{Formula, FormulaToken, Function, Operator, TokenSequence};
pub use node::{
    CapabilitySlot, NodeCapabilities, NodeMetadata, NodeType, RepeaterConfig, RepeaterInstance,
    TreeNode,
};
pub use value::{Value, format_number, parse_number};
