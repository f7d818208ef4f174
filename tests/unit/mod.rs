//! Unit test suite for tbl-engine
//!
//! Focused checks of single building blocks through the public API.
//!
//! ```bash
//! cargo test --test unit
//! ```

#[path = "../common/mod.rs"]
mod common;

mod reference_tokens;
mod store_document;
mod suffix_allocation;
