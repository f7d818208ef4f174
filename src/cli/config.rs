//! `tbl config`: inspect and create the engine configuration file.
//!
//! ```bash
//! tbl config            # same as `tbl config show`
//! tbl config init       # write the defaults to ~/.tbl/config.toml
//! tbl config path
//! ```

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;

#[derive(Args, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: Option<ConfigSubcommands>,
}

#[derive(Subcommand, Debug)]
enum ConfigSubcommands {
    /// Write a config file holding the default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration (default)
    Show,

    /// Print the config file location
    Path,
}

impl ConfigCommand {
    pub async fn execute(self, config_path: Option<PathBuf>) -> Result<()> {
        let path = match config_path {
            Some(path) => path,
            None => EngineConfig::default_path()?,
        };

        match self.command {
            Some(ConfigSubcommands::Init {
                force,
            }) => Self::init(&path, force).await,
            Some(ConfigSubcommands::Show) | None => Self::show(&path).await,
            Some(ConfigSubcommands::Path) => {
                println!("{}", path.display());
                Ok(())
            }
        }
    }

    async fn init(path: &Path, force: bool) -> Result<()> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) && !force {
            println!("{} Config already exists at: {}", "✗".red(), path.display());
            println!("   Use --force to overwrite");
            return Ok(());
        }

        let config = EngineConfig::default();
        config.save_to(path).await?;

        println!("{} Created config at: {}", "✓".green(), path.display());
        println!("\n{}", toml::to_string_pretty(&config)?);
        Ok(())
    }

    async fn show(path: &Path) -> Result<()> {
        let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
        let config = EngineConfig::load_with_optional(Some(path.to_path_buf())).await?;

        println!("{}", "Engine Configuration".bold());
        if exists {
            println!("Location: {}\n", path.display());
        } else {
            println!("Location: {} (not created, showing defaults)\n", path.display());
        }
        println!("{}", toml::to_string_pretty(&config)?);

        if !exists {
            println!("{}", "Tip:".yellow());
            println!("  Run 'tbl config init' to write these defaults to disk");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_writes_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tbl").join("config.toml");

        ConfigCommand::init(&path, false).await.unwrap();
        let loaded = EngineConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_init_keeps_existing_file_without_force() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        tokio::fs::write(&path, "empty_display = \"n/a\"\n").await.unwrap();

        ConfigCommand::init(&path, false).await.unwrap();
        assert_eq!(EngineConfig::load_from(&path).await.unwrap().empty_display, "n/a");

        ConfigCommand::init(&path, true).await.unwrap();
        assert_eq!(EngineConfig::load_from(&path).await.unwrap().empty_display, "—");
    }

    #[tokio::test]
    async fn test_show_without_file() {
        let temp = TempDir::new().unwrap();
        assert!(ConfigCommand::show(&temp.path().join("absent.toml")).await.is_ok());
    }
}
