//! CLI command tests
//!
//! - Release checks (`check`, `version`)
//! - Self-upgrade (`upgrade`)

mod check;
mod upgrade;

use assert_cmd::Command;
use httpmock::MockServer;
use kiln_cli::config::GlobalConfig;
use kiln_cli::upgrade::UpgradeConfig;
use std::path::PathBuf;
use tempfile::TempDir;

/// Isolated config and state files pointing kiln at a local release server.
pub struct KilnEnv {
    pub temp: TempDir,
    pub server: MockServer,
}

impl KilnEnv {
    pub async fn new() -> Self {
        Self::with_config(|config| config).await
    }

    pub async fn with_config(adjust: impl FnOnce(UpgradeConfig) -> UpgradeConfig) -> Self {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start_async().await;

        let config = GlobalConfig {
            upgrade: adjust(UpgradeConfig::default().with_release_server(&server.base_url())),
        };
        config.save_to(&temp.path().join("config.toml")).await.unwrap();

        Self {
            temp,
            server,
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.temp.path().join("upgrade_state.json")
    }

    /// `kiln` with the isolated config, state file and no colors.
    pub fn kiln(&self) -> Command {
        let mut cmd = Command::cargo_bin("kiln").unwrap();
        cmd.env("KILN_CONFIG", self.temp.path().join("config.toml"))
            .env("KILN_UPGRADE_STATE_PATH", self.state_path())
            .env("NO_COLOR", "1")
            .env_remove("KILN_GITHUB_TOKEN")
            .env_remove("GITHUB_TOKEN")
            .env_remove("KILN_RESTART_AFTER_UPGRADE")
            .env_remove("KILN_RESTART_ARGS")
            .env_remove("KILN_FAKE_LOG");
        cmd
    }
}
