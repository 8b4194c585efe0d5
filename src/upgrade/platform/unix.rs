//! Unix upgrade strategy.
//!
//! A running executable can be replaced on Unix by renaming a new file over its
//! path: the process keeps executing the old inode while new invocations see the
//! new file. The new binary is therefore staged as a hidden sibling (same
//! filesystem), marked executable and renamed over the live path in one step.
//!
//! Installs under protected system directories go through `sudo`, one discrete
//! command per step with its own exit status and timeout:
//!
//! 1. `cp -p <current> <backup>`
//! 2. `cp <new> <staged>`
//! 3. `chmod 755 <staged>`
//! 4. `mv -f <staged> <current>`
//! 5. self-check (unprivileged)
//! 6. `rm -f <backup>` on success, or `mv -f <backup> <current>` on failure

use anyhow::Result;
use chrono::Utc;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::{is_dir_writable, parent_dir, run_self_check, sibling};
use crate::constants::{ELEVATED_STEP_TIMEOUT, SELF_CHECK_TIMEOUT};
use crate::core::KilnError;
use crate::upgrade::backup::backup_path_for;
use crate::utils::get_home_dir;

/// Directories that normally need root to modify.
pub const PROTECTED_DIRS: &[&str] = &["/usr/local/bin", "/usr/bin", "/bin", "/opt"];

/// Unix variant of [`super::PlatformStrategy`].
#[derive(Debug, Clone)]
pub struct UnixStrategy {
    protected_dirs: Vec<PathBuf>,
    elevation_program: String,
    self_check_timeout: Duration,
    step_timeout: Duration,
}

impl Default for UnixStrategy {
    fn default() -> Self {
        Self {
            protected_dirs: PROTECTED_DIRS.iter().map(PathBuf::from).collect(),
            elevation_program: "sudo".to_string(),
            self_check_timeout: SELF_CHECK_TIMEOUT,
            step_timeout: ELEVATED_STEP_TIMEOUT,
        }
    }
}

impl UnixStrategy {
    /// Replace the protected directory list.
    #[must_use]
    pub fn with_protected_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.protected_dirs = dirs;
        self
    }

    /// Use a different privilege escalation program than `sudo`.
    #[must_use]
    pub fn with_elevation_program(mut self, program: impl Into<String>) -> Self {
        self.elevation_program = program.into();
        self
    }

    /// Override the self-check timeout.
    #[must_use]
    pub fn with_self_check_timeout(mut self, timeout: Duration) -> Self {
        self.self_check_timeout = timeout;
        self
    }

    /// Regular file with at least one execute bit set.
    #[must_use]
    pub fn can_upgrade(&self, path: &Path) -> bool {
        let Ok(metadata) = std::fs::metadata(path) else {
            return false;
        };
        if !metadata.is_file() {
            return false;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o111 != 0
        }

        #[cfg(not(unix))]
        {
            true
        }
    }

    /// Whether `path` lies under one of the protected directories.
    #[must_use]
    pub fn is_protected(&self, path: &Path) -> bool {
        self.protected_dirs.iter().any(|dir| path.starts_with(dir))
    }

    /// Elevation is needed when the directory is not writable and protected.
    #[must_use]
    pub fn requires_elevation(&self, path: &Path) -> bool {
        self.needs_elevation(path, is_dir_writable(parent_dir(path)))
    }

    pub(crate) fn needs_elevation(&self, path: &Path, dir_writable: bool) -> bool {
        !dir_writable && self.is_protected(path)
    }

    /// `~/.local/bin`.
    ///
    /// # Errors
    ///
    /// Fails if the home directory is unknown.
    pub fn fallback_install_dir_path(&self) -> Result<PathBuf> {
        Ok(get_home_dir()?.join(".local").join("bin"))
    }

    /// Stage `new_binary` beside `current` and rename it over the live path.
    pub(crate) async fn replace(&self, current: &Path, new_binary: &Path) -> Result<()> {
        let staged = sibling(current, "new");
        let failed = |reason: String| KilnError::ReplacementFailed {
            path: current.display().to_string(),
            reason,
        };

        debug!("Staging {} at {}", new_binary.display(), staged.display());
        if let Err(e) = fs::copy(new_binary, &staged).await {
            let _ = fs::remove_file(&staged).await;
            return Err(failed(format!("failed to stage new binary: {e}")).into());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::Permissions::from_mode(0o755);
            if let Err(e) = fs::set_permissions(&staged, mode).await {
                let _ = fs::remove_file(&staged).await;
                return Err(failed(format!("failed to mark new binary executable: {e}")).into());
            }
        }

        if let Err(e) = fs::rename(&staged, current).await {
            let _ = fs::remove_file(&staged).await;
            return Err(failed(format!("failed to move new binary into place: {e}")).into());
        }

        Ok(())
    }

    /// Check executability, then run the self-check.
    pub(crate) async fn verify_installed(&self, path: &Path) -> Result<()> {
        if !self.can_upgrade(path) {
            return Err(KilnError::NotUpgradable {
                path: path.display().to_string(),
                reason: "not an executable regular file".to_string(),
            }
            .into());
        }
        run_self_check(path, self.self_check_timeout).await
    }

    /// Run one privileged step through the elevation program.
    async fn privileged(&self, step: &str, args: &[&OsStr]) -> Result<()> {
        let mut command = Command::new(&self.elevation_program);
        command
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let rendered = args.iter().map(|arg| arg.to_string_lossy()).collect::<Vec<_>>().join(" ");
        debug!("Elevated step '{step}': {} {rendered}", self.elevation_program);

        let output = match tokio::time::timeout(self.step_timeout, command.output()).await {
            Ok(output) => output.map_err(|e| KilnError::PermissionDenied {
                operation: format!("{step} (could not run {}: {e})", self.elevation_program),
                path: rendered.clone(),
            })?,
            Err(_) => {
                return Err(KilnError::Timeout {
                    operation: format!("elevated step '{step}'"),
                    seconds: self.step_timeout.as_secs(),
                }
                .into());
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KilnError::ReplacementFailed {
                path: rendered,
                reason: format!("{step} failed ({}): {}", output.status, stderr.trim()),
            }
            .into());
        }
        Ok(())
    }

    /// Elevated variant of the direct upgrade, one privileged command per step.
    pub(crate) async fn perform_elevated_upgrade(
        &self,
        current: &Path,
        new_binary: &Path,
    ) -> Result<()> {
        let backup = backup_path_for(current, Utc::now());
        let staged = sibling(current, "new");
        let had_original = current.exists();

        if had_original {
            self.privileged("back up current binary", &[
                OsStr::new("cp"),
                OsStr::new("-p"),
                current.as_os_str(),
                backup.as_os_str(),
            ])
            .await?;
        }

        let outcome = self.elevated_install(current, new_binary, &staged).await;

        let upgrade_error = match outcome {
            Ok(()) => {
                if had_original {
                    let args = [OsStr::new("rm"), OsStr::new("-f"), backup.as_os_str()];
                    if let Err(e) = self.privileged("remove backup", &args).await {
                        warn!("Upgrade succeeded but the backup could not be removed: {e:#}");
                    }
                }
                info!("Installed new binary at {} with elevated privileges", current.display());
                return Ok(());
            }
            Err(e) => e,
        };

        error!("Elevated upgrade of {} failed: {upgrade_error:#}", current.display());
        if staged.exists() {
            let args = [OsStr::new("rm"), OsStr::new("-f"), staged.as_os_str()];
            let _ = self.privileged("remove staged binary", &args).await;
        }

        if had_original {
            if let Err(rollback_error) = self.restore_elevated(current, &backup).await {
                error!("Rollback failed: {rollback_error:#}");
                return Err(KilnError::RollbackFailed {
                    original: format!("{upgrade_error:#}"),
                    reason: format!("{rollback_error:#}"),
                    backup: backup.display().to_string(),
                }
                .into());
            }
            warn!("Rolled back to the previous binary");
        }

        Err(upgrade_error)
    }

    async fn elevated_install(
        &self,
        current: &Path,
        new_binary: &Path,
        staged: &Path,
    ) -> Result<()> {
        let args = [OsStr::new("cp"), new_binary.as_os_str(), staged.as_os_str()];
        self.privileged("copy new binary", &args).await?;
        self.privileged("mark new binary executable", &[
            OsStr::new("chmod"),
            OsStr::new("755"),
            staged.as_os_str(),
        ])
        .await?;
        self.privileged("move new binary into place", &[
            OsStr::new("mv"),
            OsStr::new("-f"),
            staged.as_os_str(),
            current.as_os_str(),
        ])
        .await?;
        self.verify_installed(current).await
    }

    /// Restore the backup, unprivileged when the directory allows it.
    async fn restore_elevated(&self, current: &Path, backup: &Path) -> Result<()> {
        match fs::rename(backup, current).await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("Unprivileged restore failed ({e}), retrying elevated");
                self.privileged("restore backup", &[
                    OsStr::new("mv"),
                    OsStr::new("-f"),
                    backup.as_os_str(),
                    current.as_os_str(),
                ])
                .await
            }
        }
    }

    /// Replace the current process image with `exe`.
    pub(crate) fn relaunch(&self, exe: &Path, args: &[OsString]) -> Result<()> {
        #[cfg(unix)]
        {
            use crate::constants::{RESTART_AFTER_UPGRADE_ENV, RESTART_ARGS_ENV};
            use std::os::unix::process::CommandExt;

            info!("Restarting into {}", exe.display());
            let error = std::process::Command::new(exe)
                .args(args)
                .env_remove(RESTART_AFTER_UPGRADE_ENV)
                .env_remove(RESTART_ARGS_ENV)
                .exec();
            Err(KilnError::Other {
                message: format!("Failed to restart into {}: {error}", exe.display()),
            }
            .into())
        }

        #[cfg(not(unix))]
        {
            let _ = (exe, args);
            Err(KilnError::PlatformNotSupported {
                operation: "process image replacement".to_string(),
            }
            .into())
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::{
        broken_kiln_script, fake_kiln_script, write_executable,
    };
    use crate::upgrade::platform::PlatformStrategy;
    use tempfile::TempDir;

    fn strategy() -> UnixStrategy {
        UnixStrategy::default().with_self_check_timeout(Duration::from_secs(10))
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_can_upgrade() {
        let temp = TempDir::new().unwrap();
        let exe = write_executable(&temp.path().join("kiln"), &fake_kiln_script("1.0.0"));
        let plain = temp.path().join("notes.txt");
        std::fs::write(&plain, "x").unwrap();

        let unix = strategy();
        assert!(unix.can_upgrade(&exe));
        assert!(!unix.can_upgrade(&plain));
        assert!(!unix.can_upgrade(temp.path()));
        assert!(!unix.can_upgrade(&temp.path().join("missing")));
    }

    #[test]
    fn test_requires_elevation_depends_on_writability() {
        let unix = strategy();
        let tool = Path::new("/usr/local/bin/tool");

        assert!(unix.needs_elevation(tool, false));
        assert!(!unix.needs_elevation(tool, true));
        assert!(!unix.needs_elevation(Path::new("/home/dev/bin/tool"), false));
        assert!(unix.needs_elevation(Path::new("/opt/kiln/bin/kiln"), false));
        assert!(!unix.needs_elevation(Path::new("/optional/kiln"), false));
    }

    #[test]
    fn test_requires_elevation_probes_directory() {
        let temp = TempDir::new().unwrap();
        let unix = strategy().with_protected_dirs(vec![temp.path().to_path_buf()]);

        // A writable protected directory does not need elevation
        assert!(!unix.requires_elevation(&temp.path().join("kiln")));

        // An unwritable one does (the probe fails on a missing directory)
        assert!(unix.requires_elevation(&temp.path().join("missing").join("kiln")));
    }

    #[test]
    fn test_fallback_dir() {
        let dir = strategy().fallback_install_dir_path().unwrap();
        assert!(dir.ends_with(".local/bin"));
    }

    #[tokio::test]
    async fn test_direct_upgrade_replaces_binary() {
        let temp = TempDir::new().unwrap();
        let current = write_executable(&temp.path().join("kiln"), &fake_kiln_script("1.0.0"));
        let new = write_executable(&temp.path().join("download"), &fake_kiln_script("2.0.0"));

        let platform = PlatformStrategy::Unix(strategy());
        platform.perform_direct_upgrade(&current, &new).await.unwrap();

        assert_eq!(std::fs::read_to_string(&current).unwrap(), fake_kiln_script("2.0.0"));
        assert!(platform.can_upgrade(&current));
        assert_eq!(dir_entries(temp.path()), vec!["download", "kiln"]);
    }

    #[tokio::test]
    async fn test_failed_verification_rolls_back() {
        let temp = TempDir::new().unwrap();
        let original = fake_kiln_script("1.0.0");
        let current = write_executable(&temp.path().join("kiln"), &original);
        let new = write_executable(&temp.path().join("download"), &broken_kiln_script());

        let platform = PlatformStrategy::Unix(strategy());
        let err = platform.perform_direct_upgrade(&current, &new).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<KilnError>(),
            Some(KilnError::VerificationFailed { .. })
        ));
        assert_eq!(std::fs::read_to_string(&current).unwrap(), original);
        assert!(platform.can_upgrade(&current));
        assert_eq!(dir_entries(temp.path()), vec!["download", "kiln"]);
    }

    #[tokio::test]
    async fn test_failure_between_backup_and_replace_keeps_original() {
        let temp = TempDir::new().unwrap();
        let original = fake_kiln_script("1.0.0");
        let current = write_executable(&temp.path().join("kiln"), &original);

        // The staged copy cannot be made, so the swap fails after the backup exists
        let platform = PlatformStrategy::Unix(strategy());
        let err = platform
            .perform_direct_upgrade(&current, &temp.path().join("vanished-download"))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<KilnError>(),
            Some(KilnError::ReplacementFailed { .. })
        ));
        assert_eq!(std::fs::read_to_string(&current).unwrap(), original);
        assert!(platform.can_upgrade(&current));
        assert_eq!(dir_entries(temp.path()), vec!["kiln"]);
    }

    #[tokio::test]
    async fn test_fresh_install_without_original() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("bin").join("kiln");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        let new = write_executable(&temp.path().join("download"), &fake_kiln_script("2.0.0"));

        let platform = PlatformStrategy::Unix(strategy());
        platform.perform_direct_upgrade(&target, &new).await.unwrap();
        assert!(platform.can_upgrade(&target));

        let broken = write_executable(&temp.path().join("broken"), &broken_kiln_script());
        let other = temp.path().join("bin").join("kiln-other");
        assert!(platform.perform_direct_upgrade(&other, &broken).await.is_err());
        assert!(!other.exists());
    }

    #[tokio::test]
    async fn test_elevated_upgrade_runs_discrete_steps() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("steps.log");
        let elevate = write_executable(
            &temp.path().join("fake-sudo"),
            &format!("#!/bin/sh\necho \"$1\" >> \"{}\"\nexec \"$@\"\n", log.display()),
        );
        let install = temp.path().join("install");
        std::fs::create_dir(&install).unwrap();
        let current = write_executable(&install.join("kiln"), &fake_kiln_script("1.0.0"));
        let new = write_executable(&temp.path().join("download"), &fake_kiln_script("2.0.0"));

        let unix = strategy().with_elevation_program(elevate.display().to_string());
        unix.perform_elevated_upgrade(&current, &new).await.unwrap();

        assert_eq!(std::fs::read_to_string(&current).unwrap(), fake_kiln_script("2.0.0"));
        assert_eq!(dir_entries(&install), vec!["kiln"]);
        let steps = std::fs::read_to_string(&log).unwrap();
        assert_eq!(steps.lines().collect::<Vec<_>>(), vec!["cp", "cp", "chmod", "mv", "rm"]);
    }

    #[tokio::test]
    async fn test_elevated_upgrade_restores_on_failure() {
        let temp = TempDir::new().unwrap();
        let elevate = write_executable(&temp.path().join("fake-sudo"), "#!/bin/sh\nexec \"$@\"\n");
        let install = temp.path().join("install");
        std::fs::create_dir(&install).unwrap();
        let original = fake_kiln_script("1.0.0");
        let current = write_executable(&install.join("kiln"), &original);
        let new = write_executable(&temp.path().join("download"), &broken_kiln_script());

        let unix = strategy().with_elevation_program(elevate.display().to_string());
        let err = unix.perform_elevated_upgrade(&current, &new).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<KilnError>(),
            Some(KilnError::VerificationFailed { .. })
        ));
        assert_eq!(std::fs::read_to_string(&current).unwrap(), original);
        assert_eq!(dir_entries(&install), vec!["kiln"]);
    }

    #[tokio::test]
    async fn test_elevation_refused() {
        let temp = TempDir::new().unwrap();
        let deny = write_executable(
            &temp.path().join("deny"),
            "#!/bin/sh\necho 'sorry, try again' >&2\nexit 1\n",
        );
        let original = fake_kiln_script("1.0.0");
        let current = write_executable(&temp.path().join("kiln"), &original);
        let new = write_executable(&temp.path().join("download"), &fake_kiln_script("2.0.0"));

        let unix = strategy().with_elevation_program(deny.display().to_string());
        let err = unix.perform_elevated_upgrade(&current, &new).await.unwrap_err();

        assert!(err.to_string().contains("back up current binary"));
        assert_eq!(std::fs::read_to_string(&current).unwrap(), original);
    }
}
