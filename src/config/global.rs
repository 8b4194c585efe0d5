//! Global configuration management for kiln.
//!
//! The global configuration file stores user-wide settings. Today that is the
//! `[upgrade]` table controlling self-upgrade behavior; the file is optional and a
//! missing file yields defaults.
//!
//! # Configuration File Location
//!
//! - `$KILN_CONFIG` when set (also set by `kiln --config <path>`)
//! - otherwise `<config-dir>/kiln/config.toml`, where `<config-dir>` is the
//!   platform's per-user configuration directory (`~/.config` on Linux,
//!   `~/Library/Application Support` on macOS, `%APPDATA%` on Windows)
//!
//! # File Format
//!
//! ```toml
//! [upgrade]
//! check_on_startup = true
//! check_interval = 21600
//! verify_checksum = true
//! api_url = "https://api.github.com/repos/kiln-dev/kiln/releases"
//! download_url = "https://github.com/kiln-dev/kiln/releases"
//! service_command = "kiln-services"
//! ```
//!
//! # Security
//!
//! The file is written with `0600` permissions on Unix because mirrors configured
//! through `api_url` may embed credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::constants::{BINARY_NAME, CONFIG_PATH_ENV};
use crate::upgrade::config::UpgradeConfig;

/// User-wide kiln configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Self-upgrade settings (`[upgrade]` table).
    #[serde(default)]
    pub upgrade: UpgradeConfig,
}

impl GlobalConfig {
    /// Load the global configuration from the default location.
    ///
    /// A missing file is not an error; defaults are returned instead.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use kiln_cli::config::GlobalConfig;
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let config = GlobalConfig::load().await?;
    /// println!("check interval: {}s", config.upgrade.check_interval);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The default path cannot be determined
    /// - The file exists but cannot be read
    /// - The file contains invalid TOML syntax
    pub async fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_with_optional(Some(path)).await
    }

    /// Load from `path` when given, the default location otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };

        if path.exists() {
            Self::load_from(&path).await
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load the global configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (permissions, not found, etc.)
    /// - The file contains invalid TOML syntax
    /// - The TOML structure doesn't match the expected schema
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read global config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse global config from {}", path.display()))
    }

    /// Save the global configuration to a specific file.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Parent directories cannot be created
    /// - The file cannot be written
    /// - Serialization to TOML fails
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize global config")?;

        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write global config to {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mut perms = fs::metadata(path)
                .await
                .with_context(|| format!("Failed to read permissions for {}", path.display()))?
                .permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms).await.with_context(|| {
                format!("Failed to set secure permissions on {}", path.display())
            })?;
        }

        Ok(())
    }

    /// Default file path for the global configuration.
    ///
    /// `$KILN_CONFIG` wins when set and non-empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the per-user configuration directory cannot be determined.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        Ok(config_dir()?.join("config.toml"))
    }
}

/// kiln's per-user configuration directory (`<config-dir>/kiln`).
///
/// The directory is not created here; writers create it on demand.
///
/// # Errors
///
/// Returns an error if the platform configuration directory is unknown.
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Unable to determine the user configuration directory.\n\n\
            Set {CONFIG_PATH_ENV} to an explicit config file path instead"
        )
    })?;
    Ok(base.join(BINARY_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_global_config_save_load() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("nested").join("config.toml");

        let mut config = GlobalConfig::default();
        config.upgrade.check_interval = 60;
        config.upgrade.service_command = Some("kiln-services".to_string());
        config.save_to(&config_path).await.unwrap();

        let loaded = GlobalConfig::load_from(&config_path).await.unwrap();
        assert_eq!(loaded, config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&config_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config =
            GlobalConfig::load_with_optional(Some(temp.path().join("absent.toml"))).await.unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_toml_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[upgrade\ncheck_interval = ").unwrap();

        let err = GlobalConfig::load_from(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse global config"));
    }

    #[test]
    #[serial]
    fn test_default_path_env_override() {
        unsafe {
            std::env::set_var(CONFIG_PATH_ENV, "/tmp/kiln-test/config.toml");
        }
        assert_eq!(
            GlobalConfig::default_path().unwrap(),
            PathBuf::from("/tmp/kiln-test/config.toml")
        );
        unsafe {
            std::env::remove_var(CONFIG_PATH_ENV);
        }
        assert!(GlobalConfig::default_path().unwrap().ends_with("kiln/config.toml"));
    }
}
