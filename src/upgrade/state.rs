//! Persisted release-check state used to throttle network access.
//!
//! The state file is a small JSON document:
//!
//! ```json
//! {"last_checked": "2026-01-01T00:00:00Z", "latest_version": "v1.4.0"}
//! ```
//!
//! It lives at `$KILN_UPGRADE_STATE_PATH` or `<config-dir>/kiln/upgrade_state.json`.
//! It is read then written without locking; a lost race between two kiln
//! processes only shifts when the next check happens.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::STATE_PATH_ENV;
use crate::utils::{atomic_write, ensure_dir};

const STATE_FILE_NAME: &str = "upgrade_state.json";

/// What the last successful release check saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeState {
    /// When the release index was last queried successfully.
    pub last_checked: DateTime<Utc>,
    /// Tag of the latest release seen at that time.
    pub latest_version: String,
}

impl Default for UpgradeState {
    fn default() -> Self {
        Self {
            last_checked: DateTime::<Utc>::UNIX_EPOCH,
            latest_version: String::new(),
        }
    }
}

impl UpgradeState {
    /// Whether this is the zero state (no check ever recorded).
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.last_checked == DateTime::<Utc>::UNIX_EPOCH
    }
}

/// Whether a passive check is due at `now`.
///
/// True when no check was ever recorded or at least `interval` has elapsed. A
/// `last_checked` in the future (clock skew) counts as not elapsed.
#[must_use]
pub fn should_check(now: DateTime<Utc>, state: &UpgradeState, interval: Duration) -> bool {
    if state.is_unset() {
        return true;
    }

    match (now - state.last_checked).to_std() {
        Ok(elapsed) => elapsed >= interval,
        Err(_) => false,
    }
}

/// Reads and writes [`UpgradeState`] at a fixed path.
#[derive(Debug, Clone)]
pub struct UpgradeStateStore {
    path: PathBuf,
}

impl UpgradeStateStore {
    /// Store backed by an explicit file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }

    /// Store at the default location, creating its directory if needed.
    ///
    /// # Errors
    ///
    /// Fails if the configuration directory is unknown or cannot be created.
    pub fn open_default() -> Result<Self> {
        let path = match std::env::var(STATE_PATH_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => crate::config::config_dir()?.join(STATE_FILE_NAME),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir(parent)?;
            }
        }

        Ok(Self::new(path))
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the state, returning the zero state if the file is missing or unreadable.
    #[must_use]
    pub fn read(&self) -> UpgradeState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!("Failed to read upgrade state {}: {e}", self.path.display());
                }
                return UpgradeState::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::debug!("Ignoring corrupt upgrade state {}: {e}", self.path.display());
            UpgradeState::default()
        })
    }

    /// Overwrite the state file atomically.
    ///
    /// # Errors
    ///
    /// Fails if the state cannot be serialized or written.
    pub fn write(&self, state: &UpgradeState) -> Result<()> {
        let content =
            serde_json::to_vec_pretty(state).context("Failed to serialize upgrade state")?;
        atomic_write(&self.path, &content)
            .with_context(|| format!("Failed to write upgrade state {}", self.path.display()))
    }
}

/// Read the state from the default location, returning it with the path it came from.
///
/// # Errors
///
/// Fails only if the default location cannot be resolved; a missing file is the
/// zero state.
pub fn read_state() -> Result<(UpgradeState, PathBuf)> {
    let store = UpgradeStateStore::open_default()?;
    Ok((store.read(), store.path.clone()))
}

/// Write `state` to `path`.
///
/// # Errors
///
/// Fails if the file cannot be written.
pub fn write_state(path: &Path, state: &UpgradeState) -> Result<()> {
    UpgradeStateStore::new(path).write(state)
}
