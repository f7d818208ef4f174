//! Integration test suite for tbl-engine
//!
//! End-to-end scenarios through the public API and the `tbl` binary.
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! - **duplication**: repeater duplication, instance removal, nested repeaters
//! - **evaluation**: formulas, conditions and tables against a value context
//! - **service**: the endpoint handlers over a file-backed store
//! - **cli**: the `tbl` binary

#[path = "../common/mod.rs"]
mod common;

mod cli;
mod duplication;
mod evaluation;
mod service;
