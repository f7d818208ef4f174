//! Core types shared across the engine
//!
//! Currently this holds the error machinery: the [`EngineError`] enum used for
//! operations that fail as a whole, and the [`ErrorContext`] wrapper used by the
//! command-line front end to print suggestions.

pub mod error;

pub use error::{EngineError, ErrorContext, IntoAnyhowWithContext, user_friendly_error};
