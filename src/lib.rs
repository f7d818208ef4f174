//! tbl-engine - capability evaluation and repeater duplication for form trees
//!
//! A form is a tree of [`TreeNode`](models::TreeNode)s. Nodes own
//! *capabilities*: formulas, conditions, lookup tables and named variables.
//! Capabilities reference each other and form fields through reference
//! tokens such as `@value.width` or `node-formula:f-area`. The engine does
//! two things with such a tree:
//!
//! 1. **Evaluate** a capability against a value context, producing a value and
//!    a human-readable trace such as `4 * 2.5 = 10`. Failures such as a missing
//!    value, a division by zero or a reference cycle are values, not panics.
//! 2. **Duplicate** a repeater's template subtree. Every node and capability
//!    is cloned with a fresh numeric suffix and every internal reference is
//!    rewired to the new copy, while references to shared nodes outside the
//!    template stay untouched.
//!
//! # Modules
//!
//! - [`reference`] - reference token parsing, suffixing and rewriting
//! - [`models`] - tree nodes, capability records and values
//! - [`store`] - the capability store: snapshots, transactions, value cache,
//!   reference graph and JSON persistence
//! - [`eval`] - formula, condition and table evaluation
//! - [`suffix`] - copy suffix allocation
//! - [`duplication`] - the three-pass repeater duplication and instance removal
//! - [`api`] - transport-agnostic endpoint handlers and their JSON payloads
//! - [`config`] - `~/.tbl/config.toml`
//! - [`cli`] - the `tbl` command-line front end
//! - [`core`] - error types and user-facing error formatting
//! - [`utils`] - file system helpers
//! - [`constants`] - shared defaults
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tbl_engine::api::{EngineService, EvaluateRequest};
//! use tbl_engine::config::EngineConfig;
//! use tbl_engine::store::CapabilityStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(CapabilityStore::open("tree.json").await?);
//! let service = EngineService::new(store, &EngineConfig::load().await?);
//!
//! let request = EvaluateRequest::new("f-area").with("width", 4.0).with("length", 2.5);
//! let response = service.evaluate_formula(&request).await;
//! println!("{}", serde_json::to_string(&response)?);
//!
//! let instance = service.duplicate_repeater("roofs").await?;
//! println!("created {:?}", instance.created_node_ids);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod duplication;
pub mod eval;
pub mod models;
pub mod reference;
pub mod store;
pub mod suffix;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
