//! Global constants used throughout the engine.
//!
//! Defaults for configuration values, file names and timeouts live here so
//! that the config layer, the CLI and the tests agree on them.

use std::time::Duration;

/// Placeholder shown to the end user for empty or failed values.
pub const DEFAULT_EMPTY_DISPLAY: &str = "—";

/// Deepest chain of capability references followed during one evaluation.
///
/// Cycles are caught by the visited set long before this; the limit only bounds
/// very long acyclic chains.
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 64;

/// Timeout for acquiring a repeater's duplication lock (30 seconds).
pub fn default_duplication_lock_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Timeout for acquiring the cross-process lock on a store file (30 seconds).
pub fn default_store_lock_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Upper bound for the lock retry backoff (500ms).
pub const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// First delay of the lock retry backoff (10ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 10;

/// Directory under the home directory holding the engine's config.
pub const CONFIG_DIR_NAME: &str = ".tbl";

/// Config file name inside [`CONFIG_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable overriding the config file path.
pub const CONFIG_PATH_ENV: &str = "TBL_CONFIG";

/// Environment variable naming the default store file.
pub const STORE_PATH_ENV: &str = "TBL_STORE";

/// The only duplication mode currently produced.
pub const DUPLICATION_MODE_REPEATER: &str = "repeater";
