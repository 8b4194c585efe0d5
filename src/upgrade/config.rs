use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{CHECK_INTERVAL, DEFAULT_API_URL, DEFAULT_DOWNLOAD_URL};

/// Configuration settings for kiln self-upgrade behavior.
///
/// `UpgradeConfig` is the `[upgrade]` table of the global configuration file. It
/// controls passive update checks, checksum verification and where releases are
/// fetched from. Command-line flags always win over these settings.
///
/// # Default Behavior
///
/// - Passive checks after `kiln version`, at most once every 6 hours
/// - Checksum verification enabled
/// - Releases fetched from the official GitHub repository
/// - No external service manager
///
/// ## TOML Example
/// ```toml
/// [upgrade]
/// check_on_startup = true
/// check_interval = 21600
/// verify_checksum = true
/// service_command = "/usr/local/bin/kiln-services"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Whether passive, throttled release checks run at all.
    ///
    /// Passive checks never print errors; they only show a banner when a newer
    /// release exists. Explicit `kiln check` and `kiln upgrade` ignore this flag.
    #[serde(default = "default_check_on_startup")]
    pub check_on_startup: bool,

    /// Minimum number of seconds between two passive checks.
    ///
    /// # Default: `21600` (6 hours)
    ///
    /// A value of `0` checks on every invocation.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Whether downloaded binaries are verified against their `.sha256` sidecar.
    ///
    /// `kiln upgrade --no-verify` disables verification for a single run even when
    /// this is `true`.
    #[serde(default = "default_verify_checksum")]
    pub verify_checksum: bool,

    /// Release index endpoint; `/latest` is appended when querying.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base URL for release assets (`<base>/download/<tag>/<artifact>`).
    #[serde(default = "default_download_url")]
    pub download_url: String,

    /// External program that manages kiln's background services.
    ///
    /// When unset, kiln assumes no services are running and skips the
    /// stop/restart steps of an upgrade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_command: Option<String>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            check_on_startup: default_check_on_startup(),
            check_interval: default_check_interval(),
            verify_checksum: default_verify_checksum(),
            api_url: default_api_url(),
            download_url: default_download_url(),
            service_command: None,
        }
    }
}

fn default_check_on_startup() -> bool {
    true
}

fn default_check_interval() -> u64 {
    CHECK_INTERVAL.as_secs()
}

fn default_verify_checksum() -> bool {
    true
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_download_url() -> String {
    DEFAULT_DOWNLOAD_URL.to_string()
}

impl UpgradeConfig {
    /// Create an `UpgradeConfig` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// The passive check interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    /// Point both release endpoints at a different server.
    ///
    /// Used by tests and by mirrors that serve the GitHub layout under one root.
    #[must_use]
    pub fn with_release_server(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.api_url = format!("{base}/api/releases");
        self.download_url = format!("{base}/releases");
        self
    }
}
