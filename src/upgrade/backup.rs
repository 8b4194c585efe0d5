use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Manages the pre-upgrade copy of the kiln binary.
///
/// The backup lives next to the original as `<name>.backup-<YYYYMMDDHHMMSS>-<id>`,
/// so it is on the same filesystem and can be renamed back atomically. Its lifecycle
/// is create, then either restore (rollback) or cleanup (success); neither path
/// leaves it behind.
///
/// # Platform Considerations
///
/// - **Unix**: Permissions and executable bits are preserved
/// - **Windows**: Restore retries a few times because the target may be briefly
///   locked by antivirus scanners or the exiting process
///
/// # Examples
///
/// ```rust,no_run
/// use kiln_cli::upgrade::backup::BackupManager;
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// let backup = BackupManager::new(PathBuf::from("/usr/local/bin/kiln"), chrono::Utc::now());
/// backup.create_backup().await?;
///
/// // ... replace the binary ...
/// # let upgrade_succeeded = true;
///
/// if upgrade_succeeded {
///     backup.cleanup_backup().await?;
/// } else {
///     backup.restore_backup().await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct BackupManager {
    original_path: PathBuf,
    backup_path: PathBuf,
}

/// Path of a backup for `original` taken at `now`.
///
/// The random suffix keeps runs started within the same second apart.
#[must_use]
pub fn backup_path_for(original: &Path, now: DateTime<Utc>) -> PathBuf {
    let name = original.file_name().unwrap_or_default().to_string_lossy();
    let id = uuid::Uuid::new_v4().simple().to_string();
    original.with_file_name(format!("{name}.backup-{}-{}", now.format("%Y%m%d%H%M%S"), &id[..8]))
}

impl BackupManager {
    /// Backup manager for `executable_path`, naming the backup after `now`.
    pub fn new(executable_path: PathBuf, now: DateTime<Utc>) -> Self {
        let backup_path = backup_path_for(&executable_path, now);
        Self {
            original_path: executable_path,
            backup_path,
        }
    }

    /// Copy the original binary to the backup path, preserving its mode.
    ///
    /// # Errors
    ///
    /// Fails if the original is missing or the copy cannot be written.
    pub async fn create_backup(&self) -> Result<()> {
        if !self.original_path.exists() {
            bail!("Original file does not exist: {}", self.original_path.display());
        }

        info!("Creating backup at {}", self.backup_path.display());
        fs::copy(&self.original_path, &self.backup_path)
            .await
            .with_context(|| format!("Failed to create backup {}", self.backup_path.display()))?;

        #[cfg(unix)]
        {
            let metadata = fs::metadata(&self.original_path)
                .await
                .context("Failed to read original file metadata")?;
            fs::set_permissions(&self.backup_path, metadata.permissions())
                .await
                .context("Failed to set backup permissions")?;
        }

        Ok(())
    }

    /// Rename the backup back over the original path.
    ///
    /// The rename replaces the live file in one step, so the path always holds a
    /// complete executable. The backup no longer exists afterwards.
    ///
    /// # Errors
    ///
    /// Fails if there is no backup or every attempt fails.
    pub async fn restore_backup(&self) -> Result<()> {
        if !self.backup_path.exists() {
            bail!("No backup found at {}", self.backup_path.display());
        }

        warn!("Restoring from backup at {}", self.backup_path.display());

        const MAX_ATTEMPTS: u32 = 3;
        let mut attempt = 1;
        loop {
            match fs::rename(&self.backup_path, &self.original_path).await {
                Ok(()) => {
                    info!("Successfully restored from backup");
                    return Ok(());
                }
                Err(e) if attempt < MAX_ATTEMPTS && cfg!(windows) => {
                    warn!("Restore attempt {attempt} failed: {e}. Retrying...");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "Failed to restore {} from {}",
                            self.original_path.display(),
                            self.backup_path.display()
                        )
                    });
                }
            }
        }
    }

    /// Delete the backup if it exists.
    ///
    /// # Errors
    ///
    /// Fails if an existing backup cannot be removed.
    pub async fn cleanup_backup(&self) -> Result<()> {
        if self.backup_path.exists() {
            debug!("Cleaning up backup at {}", self.backup_path.display());
            fs::remove_file(&self.backup_path).await.context("Failed to remove backup")?;
        }
        Ok(())
    }

    /// Whether the backup file currently exists.
    pub fn backup_exists(&self) -> bool {
        self.backup_path.exists()
    }

    /// Path of the backup file.
    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Path of the binary being backed up.
    pub fn original_path(&self) -> &Path {
        &self.original_path
    }
}
