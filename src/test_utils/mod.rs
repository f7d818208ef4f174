//! Test utilities for the engine
//!
//! - [`init_test_logging`] installs a tracing subscriber once per test binary.
//! - [`fixtures`] builds the canonical roof-section tree, in memory or as a
//!   store file for CLI tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use tbl_engine::test_utils::{fixtures, init_test_logging};
//!
//! init_test_logging(None);
//! let snapshot = fixtures::roof_section();
//! assert!(snapshot.contains_node("roofs"));
//! ```

pub mod fixtures;

pub use fixtures::{context, roof_section, roof_store, write_roof_store};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG` when set; with neither,
/// tests run without a subscriber.
///
/// ```bash
/// RUST_LOG=tbl_engine=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
