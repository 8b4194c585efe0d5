//! Command-line interface for kiln.
//!
//! This module defines the argument parser and dispatches to one module per
//! command:
//!
//! - `upgrade` - download, verify and install a newer kiln in place
//! - `check` - query the release index and report whether an update exists
//! - `version` - print the version, then run the throttled background check
//!
//! # Global Options
//!
//! - `--verbose` / `-v`: debug logging
//! - `--quiet` / `-q`: errors only
//! - `--config` / `-c`: use a specific global configuration file
//!
//! # Examples
//!
//! ```bash
//! kiln upgrade --dry-run
//! kiln upgrade --version v1.4.0 --install-dir ~/.local/bin
//! kiln check --json
//! ```

mod check;
pub mod common;
mod upgrade;
mod version;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::GlobalConfig;

/// Parsed global flags, separated from command dispatch so tests can inspect them.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Tracing filter directive, e.g. `debug`.
    pub log_level: Option<String>,
    /// Global configuration file given with `--config`.
    pub config_path: Option<PathBuf>,
}

#[derive(Parser)]
#[command(
    name = "kiln",
    about = "kiln - local model workbench",
    version,
    author,
    long_about = "kiln manages local model services. It can upgrade itself in place with checksum verification and automatic rollback."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the global configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade kiln to the latest or a specific version
    Upgrade(upgrade::UpgradeArgs),

    /// Check whether a newer kiln release is available
    Check(check::CheckArgs),

    /// Show the installed version and notify about updates
    Version(version::VersionArgs),
}

impl Cli {
    /// Build the [`CliConfig`] and run the selected command.
    ///
    /// # Errors
    ///
    /// Whatever the command returns; configuration load failures as well.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("error".to_string())
        } else {
            None
        };

        CliConfig {
            log_level,
            config_path: self.config.clone(),
        }
    }

    /// Run the selected command with a prepared [`CliConfig`].
    ///
    /// # Errors
    ///
    /// See [`Self::execute`].
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        let global = GlobalConfig::load_with_optional(config.config_path).await?;

        match self.command {
            Commands::Upgrade(args) => args.execute(&global).await,
            Commands::Check(args) => args.execute(&global).await,
            Commands::Version(args) => args.execute(&global).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_config_log_levels() {
        let cli = Cli::parse_from(["kiln", "--verbose", "check"]);
        assert_eq!(cli.build_config().log_level, Some("debug".to_string()));

        let cli = Cli::parse_from(["kiln", "-q", "version"]);
        assert_eq!(cli.build_config().log_level, Some("error".to_string()));

        let cli = Cli::parse_from(["kiln", "--config", "/tmp/kiln.toml", "check"]);
        let config = cli.build_config();
        assert_eq!(config.log_level, None);
        assert_eq!(config.config_path, Some(PathBuf::from("/tmp/kiln.toml")));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["kiln", "-v", "-q", "check"]).is_err());
    }
}
