//! Helpers shared by the command implementations.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strsim::levenshtein;

use crate::api::EngineService;
use crate::config::EngineConfig;
use crate::core::EngineError;
use crate::models::Value;
use crate::store::CapabilityStore;
use crate::utils::read_json_file;

/// Maximum Levenshtein distance, as a percentage of the id length, for "did you mean" hints.
const SIMILARITY_THRESHOLD_PERCENT: usize = 50;

/// Output format shared by every command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text with colors
    #[default]
    Text,
    /// The endpoint payload as pretty JSON
    Json,
}

/// Everything a command needs besides its own arguments.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: EngineConfig,
    pub store_path: Option<PathBuf>,
    pub format: OutputFormat,
    pub quiet: bool,
}

impl CommandContext {
    /// The store file from `--store`, `TBL_STORE` or `store_path` in config.toml.
    pub fn store_path(&self) -> Result<&Path> {
        self.store_path
            .as_deref()
            .or(self.config.store_path.as_deref())
            .ok_or_else(|| {
                EngineError::ConfigError {
                    message: "No store file given; pass --store <file>, set TBL_STORE or set store_path in config.toml"
                        .to_string(),
                }
                .into()
            })
    }

    /// Open the store and wrap it in an [`EngineService`].
    pub async fn service(&self) -> Result<EngineService> {
        let path = self.store_path()?;
        let store = CapabilityStore::open(path).await?;
        Ok(EngineService::new(Arc::new(store), &self.config))
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Print an informational line unless `--quiet` is set.
    pub fn note(&self, message: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", message.as_ref());
        }
    }

    /// Display form of a value, using the configured placeholder for empty values.
    pub fn show(&self, value: &Value) -> String {
        if value.is_empty() {
            self.config.empty_display.clone()
        } else {
            value.to_string()
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("{} {}", "⚠".yellow(), warning);
    }
}

/// Value-context options of the evaluation commands.
#[derive(Args, Debug, Clone, Default)]
pub struct ContextArgs {
    /// JSON file holding the value context, an object of key → value
    #[arg(long, value_name = "FILE")]
    pub context: Option<PathBuf>,

    /// Set one context value; repeatable and applied after --context
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    pub set: Vec<(String, String)>,
}

impl ContextArgs {
    pub async fn load(&self) -> Result<BTreeMap<String, Value>> {
        let mut context = match &self.context {
            Some(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || read_json_file::<BTreeMap<String, Value>>(&path))
                    .await
                    .context("Value context reader panicked")?
                    .context("Invalid value context file")?
            }
            None => BTreeMap::new(),
        };
        for (key, raw) in &self.set {
            context.insert(key.clone(), parse_cli_value(raw));
        }
        Ok(context)
    }
}

/// Split `KEY=VALUE`. The value may be empty or contain `=`.
pub fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Read a command-line value: empty, a boolean, a plain number, or text.
///
/// Text such as `2,5` is kept verbatim and coerced during evaluation.
pub fn parse_cli_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Empty;
    }
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map_or_else(|| Value::text(raw), Value::Number),
    }
}

/// Up to three ids close to `target`, closest first.
pub fn find_similar_ids<'a>(target: &str, available: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let limit = target.len() * SIMILARITY_THRESHOLD_PERCENT / 100;
    let mut scored: Vec<(usize, &str)> = available
        .into_iter()
        .map(|candidate| (levenshtein(target, candidate), candidate))
        .filter(|(distance, _)| *distance <= limit)
        .collect();
    scored.sort_unstable();
    scored.into_iter().take(3).map(|(_, candidate)| candidate.to_string()).collect()
}

/// `Did you mean 'a' or 'b'?`, or `None` without candidates.
pub fn did_you_mean(similar: &[String]) -> Option<String> {
    if similar.is_empty() {
        return None;
    }
    let quoted: Vec<String> = similar.iter().map(|id| format!("'{id}'")).collect();
    Some(format!("Did you mean {}?", quoted.join(" or ")))
}
