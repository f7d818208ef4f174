//! Command-line interface for the engine.
//!
//! Every command opens the store, calls the matching [`EngineService`]
//! handler and prints its payload, as colored text or with `--format json`
//! as the exact JSON an HTTP layer would return.
//!
//! # Commands
//!
//! | Command | Handler |
//! |---|---|
//! | `eval formula\|condition\|table <id>` | [`EngineService::evaluate_formula`] and friends |
//! | `duplicate <repeater-id>` | [`EngineService::duplicate_repeater`] |
//! | `remove-instance <repeater-id> <scope-id>` | [`EngineService::remove_instance`] |
//! | `validate [--strict]` | [`EngineService::validate`] |
//! | `recalc <tree-id>` | [`EngineService::recalc_tree`] |
//! | `config [init\|show\|path]` | config file management |
//!
//! # Store location
//!
//! The store file comes from `--store`, then the `TBL_STORE` environment
//! variable, then `store_path` in `~/.tbl/config.toml`.
//!
//! ```bash
//! tbl --store tree.json eval formula f-area --set width=4 --set length=2.5
//! TBL_STORE=tree.json tbl duplicate roofs
//! tbl --store tree.json --format json validate
//! ```
//!
//! [`EngineService`]: crate::api::EngineService
//! [`EngineService::evaluate_formula`]: crate::api::EngineService::evaluate_formula
//! [`EngineService::duplicate_repeater`]: crate::api::EngineService::duplicate_repeater
//! [`EngineService::remove_instance`]: crate::api::EngineService::remove_instance
//! [`EngineService::validate`]: crate::api::EngineService::validate
//! [`EngineService::recalc_tree`]: crate::api::EngineService::recalc_tree

pub mod common;
mod config;
mod duplicate;
mod eval;
mod recalc;
pub mod validate;


use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub use common::OutputFormat;

use crate::config::EngineConfig;
use crate::constants::STORE_PATH_ENV;
use common::CommandContext;

/// Runtime settings derived from the global flags.
///
/// Kept apart from [`Cli`] so tests can run commands without touching the
/// process-wide logger.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Filter directive for the logger; `None` disables logging
    pub log_level: Option<String>,

    /// Config file given with `--config`
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the tracing subscriber, logging to stderr.
    ///
    /// `RUST_LOG` wins over the flag-derived level when it is set. Calling
    /// this more than once is harmless.
    pub fn init_logging(&self) {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => match &self.log_level {
                Some(level) => EnvFilter::new(format!("tbl_engine={level}")),
                None => return,
            },
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

/// Evaluate and duplicate capability-bearing form trees.
#[derive(Parser, Debug)]
#[command(
    name = "tbl",
    about = "Evaluate formulas, conditions and tables of a form tree, and duplicate repeater instances",
    version,
    long_about = "tbl works on a JSON store holding a form tree and its capabilities. It evaluates \
                  formulas, conditions and tables against a value context, and duplicates repeater \
                  templates with every internal reference rewired to the new copy."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress informational output and logging
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the config file (default: ~/.tbl/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Store file to operate on
    #[arg(short, long, global = true, env = STORE_PATH_ENV, value_name = "FILE")]
    store: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate a formula, condition or table against a value context
    Eval(eval::EvalCommand),

    /// Add one instance to a repeater
    Duplicate(duplicate::DuplicateCommand),

    /// Remove one repeater instance by scope id
    RemoveInstance(duplicate::RemoveInstanceCommand),

    /// Check the store for structural, scope and cycle problems
    Validate(validate::ValidateCommand),

    /// Re-evaluate a tree and store the computed values
    Recalc(recalc::RecalcCommand),

    /// Manage the config file
    Config(config::ConfigCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        config.init_logging();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
        }
    }

    /// Run the command with explicit settings. Does not install a logger.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        if let Commands::Config(cmd) = self.command {
            return cmd.execute(config.config_path).await;
        }

        let engine_config = EngineConfig::load_with_optional(config.config_path).await?;
        let ctx = CommandContext {
            config: engine_config,
            store_path: self.store,
            format: self.format,
            quiet: self.quiet,
        };

        match self.command {
            Commands::Eval(cmd) => cmd.execute(&ctx).await,
            Commands::Duplicate(cmd) => cmd.execute(&ctx).await,
            Commands::RemoveInstance(cmd) => cmd.execute(&ctx).await,
            Commands::Validate(cmd) => cmd.execute(&ctx).await,
            Commands::Recalc(cmd) => cmd.execute(&ctx).await,
            // returned above, before any config or store is loaded
            Commands::Config(_) => Ok(()),
        }
    }
}
