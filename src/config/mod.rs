//! Engine configuration (`~/.tbl/config.toml`).
//!
//! Every field has a default, so an empty or partial file is valid:
//!
//! ```toml
//! # Store used when the CLI gets no --store flag
//! store_path = "/srv/forms/tree.json"
//!
//! # Placeholder shown for empty operands and failed evaluations
//! empty_display = "—"
//!
//! # Deepest chain of capability references followed in one evaluation
//! max_reference_depth = 64
//!
//! # Round numbers shown in traces
//! decimal_places = 2
//!
//! # Warn about references kept on targets that are not marked shared
//! warn_on_shared_references = true
//! ```
//!
//! The file location is `~/.tbl/config.toml`, overridden by the `TBL_CONFIG`
//! environment variable or the CLI's `--config` flag.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tbl_engine::config::EngineConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::load().await?;
//! let settings = config.to_eval_settings();
//! println!("placeholder: {}", settings.empty_display);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, CONFIG_PATH_ENV, DEFAULT_EMPTY_DISPLAY,
    DEFAULT_MAX_REFERENCE_DEPTH,
};
use crate::core::EngineError;
use crate::duplication::DuplicationOptions;
use crate::eval::EvalSettings;

/// Largest supported `decimal_places`.
const MAX_DECIMAL_PLACES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Store file used when none is given on the command line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    pub empty_display: String,

    pub max_reference_depth: usize,

    /// Rounding applied to numbers in traces. Values are never rounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimal_places: Option<u32>,

    pub warn_on_shared_references: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            empty_display: DEFAULT_EMPTY_DISPLAY.to_string(),
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
            decimal_places: None,
            warn_on_shared_references: true,
        }
    }
}

impl EngineConfig {
    /// Load from the default location, or defaults when no file exists there.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Load from `path` when given, otherwise from the default location. A
    /// missing file yields the defaults.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if fs::try_exists(&path).await.unwrap_or(false) {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// `$TBL_CONFIG`, or `~/.tbl/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
            && !path.is_empty()
        {
            return Ok(PathBuf::from(path));
        }

        let home = dirs::home_dir().ok_or_else(|| EngineError::ConfigError {
            message: "Unable to determine home directory".to_string(),
        })?;
        Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_reference_depth == 0 {
            return Err(EngineError::ConfigError {
                message: "max_reference_depth must be at least 1".to_string(),
            });
        }
        if let Some(places) = self.decimal_places
            && places > MAX_DECIMAL_PLACES
        {
            return Err(EngineError::ConfigError {
                message: format!("decimal_places must be at most {MAX_DECIMAL_PLACES}, got {places}"),
            });
        }
        Ok(())
    }

    pub fn to_eval_settings(&self) -> EvalSettings {
        EvalSettings {
            max_depth: self.max_reference_depth,
            empty_display: self.empty_display.clone(),
            decimal_places: self.decimal_places,
        }
    }

    pub fn duplication_options(&self) -> DuplicationOptions {
        DuplicationOptions {
            warn_unmarked_references: self.warn_on_shared_references,
            ..DuplicationOptions::default()
        }
    }
}
