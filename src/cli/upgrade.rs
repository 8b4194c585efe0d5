//! `kiln upgrade`: replace the running kiln with a newer release.
//!
//! The command wires configuration and flags into an
//! [`UpgradeOrchestrator`](crate::upgrade::UpgradeOrchestrator); the workflow
//! itself lives in [`crate::upgrade::orchestrator`].
//!
//! # Examples
//!
//! ```bash
//! # Upgrade to the latest release
//! kiln upgrade
//!
//! # Show what would happen without changing anything
//! kiln upgrade --dry-run
//!
//! # Install a specific version into a user-writable directory
//! kiln upgrade --version 1.4.0 --install-dir ~/.local/bin
//! ```

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use super::common::release_checker;
use crate::config::GlobalConfig;
use crate::upgrade::download::ArtifactDownloader;
use crate::upgrade::{Services, UpgradeConfig, UpgradeOpts, UpgradeOrchestrator};

/// Arguments for `kiln upgrade`.
#[derive(Args, Debug, Default)]
pub struct UpgradeArgs {
    /// Print the upgrade plan without downloading or changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Reinstall even when the target version is already installed
    #[arg(short, long)]
    pub force: bool,

    /// Skip SHA-256 verification of the downloaded binary
    #[arg(long)]
    pub no_verify: bool,

    /// Install into this directory instead of replacing the running binary
    ///
    /// Supports `~/` and environment variables, e.g. `~/.local/bin`.
    #[arg(long, value_name = "DIR")]
    pub install_dir: Option<String>,

    /// Install this version instead of the latest release (e.g. `1.4.0` or `v1.4.0`)
    #[arg(long = "version", value_name = "VERSION")]
    pub target_version: Option<String>,

    /// API server address forwarded to the service manager
    #[arg(long, value_name = "URL")]
    pub server_url: Option<String>,
}

impl UpgradeArgs {
    /// Flags merged with `[upgrade]` settings; flags win.
    #[must_use]
    pub fn to_opts(&self, config: &UpgradeConfig) -> UpgradeOpts {
        UpgradeOpts {
            dry_run: self.dry_run,
            force: self.force,
            no_verify: self.no_verify || !config.verify_checksum,
            install_dir: self.install_dir.clone(),
            target_version: self.target_version.clone(),
            server_url: self.server_url.clone(),
        }
    }

    /// Run the upgrade.
    ///
    /// # Errors
    ///
    /// Any failure of the upgrade workflow. The installed binary is unchanged or
    /// restored when this returns an error, except for
    /// [`KilnError::RollbackFailed`](crate::core::KilnError::RollbackFailed).
    pub async fn execute(self, config: &GlobalConfig) -> Result<()> {
        let upgrade = &config.upgrade;
        let orchestrator = UpgradeOrchestrator::new(
            release_checker(upgrade)?,
            ArtifactDownloader::new(&upgrade.download_url)?,
            Services::from_config(upgrade.service_command.as_deref()),
        );

        orchestrator.run(&self.to_opts(upgrade), Utc::now()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: UpgradeArgs,
    }

    #[test]
    fn test_parse_flags() {
        let harness = Harness::parse_from([
            "upgrade",
            "--dry-run",
            "--force",
            "--version",
            "v1.4.0",
            "--install-dir",
            "~/.local/bin",
            "--server-url",
            "http://127.0.0.1:8080",
        ]);
        let args = harness.args;
        assert!(args.dry_run);
        assert!(args.force);
        assert!(!args.no_verify);
        assert_eq!(args.target_version.as_deref(), Some("v1.4.0"));
        assert_eq!(args.install_dir.as_deref(), Some("~/.local/bin"));
        assert_eq!(args.server_url.as_deref(), Some("http://127.0.0.1:8080"));
    }

    #[test]
    fn test_no_verify_merges_with_config() {
        let mut config = UpgradeConfig::default();
        let args = UpgradeArgs::default();
        assert!(!args.to_opts(&config).no_verify);

        let args = UpgradeArgs {
            no_verify: true,
            ..Default::default()
        };
        assert!(args.to_opts(&config).no_verify);

        config.verify_checksum = false;
        assert!(UpgradeArgs::default().to_opts(&config).no_verify);
    }
}
