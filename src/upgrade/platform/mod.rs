//! Platform-specific binary replacement.
//!
//! [`PlatformStrategy`] is a closed set of two variants selected once with
//! [`PlatformStrategy::current`]. Everything that differs between Unix and Windows
//! (executability, protected directories, how the live file is swapped, elevation
//! and process relaunch) lives in [`unix`] and [`windows`]; this module holds the
//! shared direct upgrade state machine:
//!
//! ```text
//! Backup -> Replace -> Verify -> Cleanup
//!                  \         \-> Rollback
//!                   \-> Rollback
//! ```
//!
//! Both variants compile on every target so their logic can be unit tested
//! anywhere; only the syscalls that genuinely do not exist elsewhere are
//! `cfg`-gated.
//!
//! # Writability probe
//!
//! Whether a directory is writable is decided empirically by creating and
//! deleting a uniquely named probe file. This is a heuristic: unusual ACL setups
//! can allow creation but deny deletion (reported as not writable) or deny probes
//! while allowing renames. It is not a permission oracle.

pub mod unix;
pub mod windows;

pub use unix::UnixStrategy;
pub use windows::WindowsStrategy;

use anyhow::Result;
use chrono::Utc;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::backup::BackupManager;
use crate::constants::SELF_CHECK_ARGS;
use crate::core::KilnError;

/// Upgrade behavior for the host platform.
#[derive(Debug, Clone)]
pub enum PlatformStrategy {
    Unix(UnixStrategy),
    Windows(WindowsStrategy),
}

impl PlatformStrategy {
    /// Strategy for the platform kiln was compiled for.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows(WindowsStrategy::default())
        } else {
            Self::Unix(UnixStrategy::default())
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unix(_) => "unix",
            Self::Windows(_) => "windows",
        }
    }

    /// Whether `path` is an existing, regular, executable file.
    #[must_use]
    pub fn can_upgrade(&self, path: &Path) -> bool {
        match self {
            Self::Unix(strategy) => strategy.can_upgrade(path),
            Self::Windows(strategy) => strategy.can_upgrade(path),
        }
    }

    /// Whether replacing `path` needs elevated privileges.
    ///
    /// True only when the containing directory fails the writability probe **and**
    /// `path` lies under a protected system directory.
    #[must_use]
    pub fn requires_elevation(&self, path: &Path) -> bool {
        match self {
            Self::Unix(strategy) => strategy.requires_elevation(path),
            Self::Windows(strategy) => strategy.requires_elevation(path),
        }
    }

    /// Per-user install directory offered when elevation is unavailable.
    ///
    /// Does not touch the filesystem.
    ///
    /// # Errors
    ///
    /// Fails if the home or local data directory is unknown.
    pub fn fallback_install_dir_path(&self) -> Result<PathBuf> {
        match self {
            Self::Unix(strategy) => strategy.fallback_install_dir_path(),
            Self::Windows(strategy) => strategy.fallback_install_dir_path(),
        }
    }

    /// Replace `current` with the binary at `new_binary`.
    ///
    /// Chooses the elevated path when [`Self::requires_elevation`] says so, the
    /// direct path otherwise. `new_binary` is copied, never moved, so it may live
    /// on another filesystem. When `current` does not exist yet (installing into a
    /// fresh directory) no backup is taken.
    ///
    /// # Errors
    ///
    /// Any replacement or verification failure, after the original binary has been
    /// restored. [`KilnError::RollbackFailed`] when restoring failed as well.
    pub async fn perform_upgrade(&self, current: &Path, new_binary: &Path) -> Result<()> {
        if self.requires_elevation(current) {
            info!("{} requires elevated privileges", current.display());
            return match self {
                Self::Unix(strategy) => strategy.perform_elevated_upgrade(current, new_binary).await,
                Self::Windows(strategy) => strategy.perform_elevated_upgrade(current, new_binary),
            };
        }

        self.perform_direct_upgrade(current, new_binary).await
    }

    /// Backup, replace, verify, then clean up or roll back, without elevation.
    ///
    /// # Errors
    ///
    /// See [`Self::perform_upgrade`].
    pub async fn perform_direct_upgrade(&self, current: &Path, new_binary: &Path) -> Result<()> {
        let backup = if current.exists() {
            let backup = BackupManager::new(current.to_path_buf(), Utc::now());
            backup.create_backup().await.map_err(|e| KilnError::ReplacementFailed {
                path: current.display().to_string(),
                reason: format!("{e:#}"),
            })?;
            Some(backup)
        } else {
            None
        };

        let outcome = match self.replace(current, new_binary).await {
            Ok(()) => self.verify_installed(current).await,
            Err(e) => Err(e),
        };

        let upgrade_error = match outcome {
            Ok(()) => {
                if let Some(backup) = backup {
                    if let Err(e) = backup.cleanup_backup().await {
                        warn!("Upgrade succeeded but the backup could not be removed: {e:#}");
                    }
                }
                info!("Installed new binary at {}", current.display());
                return Ok(());
            }
            Err(e) => e,
        };

        error!("Upgrade of {} failed: {upgrade_error:#}", current.display());
        match backup {
            Some(backup) => {
                if let Err(rollback_error) = backup.restore_backup().await {
                    error!("Rollback failed: {rollback_error:#}");
                    return Err(KilnError::RollbackFailed {
                        original: format!("{upgrade_error:#}"),
                        reason: format!("{rollback_error:#}"),
                        backup: backup.backup_path().display().to_string(),
                    }
                    .into());
                }
                warn!("Rolled back to the previous binary");
            }
            None => {
                if current.exists() {
                    if let Err(e) = std::fs::remove_file(current) {
                        warn!("Failed to remove unverified binary {}: {e}", current.display());
                    }
                }
            }
        }

        Err(upgrade_error)
    }

    async fn replace(&self, current: &Path, new_binary: &Path) -> Result<()> {
        match self {
            Self::Unix(strategy) => strategy.replace(current, new_binary).await,
            Self::Windows(strategy) => strategy.replace(current, new_binary).await,
        }
    }

    /// Confirm the installed file is executable and passes its self-check.
    ///
    /// # Errors
    ///
    /// [`KilnError::NotUpgradable`] or [`KilnError::VerificationFailed`].
    pub async fn verify_installed(&self, path: &Path) -> Result<()> {
        match self {
            Self::Unix(strategy) => strategy.verify_installed(path).await,
            Self::Windows(strategy) => strategy.verify_installed(path).await,
        }
    }

    /// Replace the current process with `exe`, or tell the user to relaunch.
    ///
    /// `exe` is validated with [`Self::can_upgrade`] immediately before use.
    ///
    /// # Errors
    ///
    /// Fails when `exe` is not a runnable kiln binary or the process image could
    /// not be replaced. On success on Unix this never returns.
    pub fn relaunch(&self, exe: &Path, args: &[OsString]) -> Result<()> {
        if !self.can_upgrade(exe) {
            return Err(KilnError::NotUpgradable {
                path: exe.display().to_string(),
                reason: "refusing to relaunch into a non-executable path".to_string(),
            }
            .into());
        }

        match self {
            Self::Unix(strategy) => strategy.relaunch(exe, args),
            Self::Windows(strategy) => strategy.relaunch(exe, args),
        }
    }
}

/// Whether the current user can create and delete files in `dir`.
///
/// See the module docs for the limits of this heuristic.
#[must_use]
pub fn is_dir_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(".kiln-write-probe-{}", uuid::Uuid::new_v4()));

    match std::fs::OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(file) => {
            drop(file);
            match std::fs::remove_file(&probe) {
                Ok(()) => true,
                Err(e) => {
                    debug!("Write probe {} could not be removed: {e}", probe.display());
                    false
                }
            }
        }
        Err(e) => {
            debug!("{} is not writable: {e}", dir.display());
            false
        }
    }
}

/// Directory holding `path`, or `.` for bare file names.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Sibling path in the same directory as `path`, for staging renames.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    parent_dir(path).join(format!(".{name}.{}.{suffix}", uuid::Uuid::new_v4()))
}

/// Run `<path> --version` and require a clean exit within `timeout`.
///
/// # Errors
///
/// [`KilnError::VerificationFailed`] when the binary cannot be spawned, exits
/// non-zero or runs past the timeout.
pub(crate) async fn run_self_check(path: &Path, timeout: Duration) -> Result<()> {
    let failed = |reason: String| KilnError::VerificationFailed {
        path: path.display().to_string(),
        reason,
    };

    let mut attempts = 0;
    let output = loop {
        let mut command = Command::new(path);
        command
            .args(SELF_CHECK_ARGS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, command.output()).await {
            Err(_) => return Err(failed(format!("timed out after {}s", timeout.as_secs())).into()),
            Ok(Err(e)) if is_text_file_busy(&e) && attempts < 5 => {
                // ETXTBSY: a concurrently forked child may still hold a write handle
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(Err(e)) => return Err(failed(format!("failed to run: {e}")).into()),
            Ok(Ok(output)) => break output,
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failed(format!("{} {}", output.status, stderr.trim())).into());
    }

    debug!("Self-check passed: {}", String::from_utf8_lossy(&output.stdout).trim());
    Ok(())
}

fn is_text_file_busy(error: &std::io::Error) -> bool {
    cfg!(unix) && error.raw_os_error() == Some(26)
}
