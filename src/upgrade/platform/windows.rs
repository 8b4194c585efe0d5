//! Windows upgrade strategy.
//!
//! Windows refuses to overwrite or delete the image of a running process but does
//! allow renaming it. The live binary is therefore moved aside to a hidden
//! sibling, the staged binary is renamed into its place, and the aside copy is
//! removed when possible. Leftovers from earlier upgrades, still locked at the
//! time, are swept on the next run.
//!
//! Elevation is not attempted: installs under `Program Files` must be upgraded
//! from an elevated shell or moved to the per-user directory.

use anyhow::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

use super::{is_dir_writable, parent_dir, run_self_check, sibling};
use crate::constants::{BINARY_NAME, SELF_CHECK_TIMEOUT};
use crate::core::KilnError;

/// Extensions Windows will launch directly.
const EXECUTABLE_EXTENSIONS: &[&str] = &["exe", "bat", "cmd", "com"];

/// Windows variant of [`super::PlatformStrategy`].
#[derive(Debug, Clone)]
pub struct WindowsStrategy {
    self_check_timeout: Duration,
}

impl Default for WindowsStrategy {
    fn default() -> Self {
        Self {
            self_check_timeout: SELF_CHECK_TIMEOUT,
        }
    }
}

impl WindowsStrategy {
    /// Override the self-check timeout.
    #[must_use]
    pub fn with_self_check_timeout(mut self, timeout: Duration) -> Self {
        self.self_check_timeout = timeout;
        self
    }

    /// Existing regular file with an executable extension.
    #[must_use]
    pub fn can_upgrade(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| EXECUTABLE_EXTENSIONS.contains(&ext.as_str()))
    }

    /// Under `Program Files*` or the Windows directory.
    #[must_use]
    pub fn is_protected(&self, path: &Path) -> bool {
        path.components().any(|component| {
            let name = component.as_os_str().to_string_lossy().to_ascii_lowercase();
            name.starts_with("program files") || name == "windows"
        })
    }

    #[must_use]
    pub fn requires_elevation(&self, path: &Path) -> bool {
        self.needs_elevation(path, is_dir_writable(parent_dir(path)))
    }

    pub(crate) fn needs_elevation(&self, path: &Path, dir_writable: bool) -> bool {
        !dir_writable && self.is_protected(path)
    }

    /// `%LOCALAPPDATA%\Programs\kiln`.
    ///
    /// # Errors
    ///
    /// Fails if the local data directory is unknown.
    pub fn fallback_install_dir_path(&self) -> Result<PathBuf> {
        let base = dirs::data_local_dir().ok_or_else(|| KilnError::ConfigError {
            message: "Could not determine the local application data directory".to_string(),
        })?;
        Ok(base.join("Programs").join(BINARY_NAME))
    }

    /// Move the live binary aside and rename the staged one into its place.
    pub(crate) async fn replace(&self, current: &Path, new_binary: &Path) -> Result<()> {
        let failed = |reason: String| KilnError::ReplacementFailed {
            path: current.display().to_string(),
            reason,
        };

        let staged = sibling(current, "new");
        debug!("Staging {} at {}", new_binary.display(), staged.display());
        if let Err(e) = fs::copy(new_binary, &staged).await {
            let _ = fs::remove_file(&staged).await;
            return Err(failed(format!("failed to stage new binary: {e}")).into());
        }

        let aside = if current.exists() {
            let aside = sibling(current, "old");
            if let Err(e) = fs::rename(current, &aside).await {
                let _ = fs::remove_file(&staged).await;
                return Err(failed(format!("failed to move running binary aside: {e}")).into());
            }
            Some(aside)
        } else {
            None
        };

        if let Err(e) = fs::rename(&staged, current).await {
            let _ = fs::remove_file(&staged).await;
            if let Some(aside) = &aside {
                if let Err(restore) = fs::rename(aside, current).await {
                    warn!("Could not move {} back: {restore}", aside.display());
                }
            }
            return Err(failed(format!("failed to move new binary into place: {e}")).into());
        }

        if let Some(aside) = aside {
            // Still mapped by this process; a later run sweeps it
            if let Err(e) = fs::remove_file(&aside).await {
                debug!("Leaving {} for later cleanup: {e}", aside.display());
            }
        }
        self.sweep_stale(current).await;

        Ok(())
    }

    /// Remove `.old` siblings left behind by earlier upgrades.
    async fn sweep_stale(&self, current: &Path) {
        let Some(name) = current.file_name().map(|name| name.to_string_lossy().to_string()) else {
            return;
        };
        let prefix = format!(".{name}.");

        let Ok(mut entries) = fs::read_dir(parent_dir(current)).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with(&prefix) && file_name.ends_with(".old") {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => debug!("Removed stale {}", entry.path().display()),
                    Err(e) => debug!("Stale {} still locked: {e}", entry.path().display()),
                }
            }
        }
    }

    pub(crate) async fn verify_installed(&self, path: &Path) -> Result<()> {
        if !self.can_upgrade(path) {
            return Err(KilnError::NotUpgradable {
                path: path.display().to_string(),
                reason: "not an executable file".to_string(),
            }
            .into());
        }
        run_self_check(path, self.self_check_timeout).await
    }

    /// Always refuses; nothing is touched.
    pub(crate) fn perform_elevated_upgrade(&self, current: &Path, _new_binary: &Path) -> Result<()> {
        Err(KilnError::ElevationUnsupported {
            path: current.display().to_string(),
        }
        .into())
    }

    /// Windows cannot replace the running process image; ask for a manual restart.
    pub(crate) fn relaunch(&self, exe: &Path, _args: &[OsString]) -> Result<()> {
        info!("Upgrade installed at {}", exe.display());
        eprintln!("kiln was upgraded; please relaunch kiln manually to use the new version.");
        Ok(())
    }
}
