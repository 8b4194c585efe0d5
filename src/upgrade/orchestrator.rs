//! The `kiln upgrade` workflow.
//!
//! [`UpgradeOrchestrator::run`] drives one upgrade from version resolution to
//! service restart:
//!
//! ```text
//! CheckingVersion -> [already current] -> Planning -> (dry run) -> PermissionGate
//!   -> StoppingServices -> Downloading -> Verifying -> Replacing -> VerifyingInstall
//!   -> RestartingServices -> (SelfRestart | Done)
//! ```
//!
//! Everything before `Replacing` is free of side effects on the installed binary:
//! downloads go to a scratch directory that is removed when the run ends, and a
//! failed checksum stops the run before the live path is touched. Service
//! coordination problems are reported as warnings and never abort the swap.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::download::ArtifactDownloader;
use super::platform::{PlatformStrategy, is_dir_writable, parent_dir};
use super::release::ReleaseSource;
use super::services::ServiceCoordinator;
use super::verification::ChecksumVerifier;
use super::version::{UpgradeInfo, normalize, release_tag};
use super::version_check::VersionChecker;
use crate::constants::{DEFAULT_RESTART_ARGS, RESTART_AFTER_UPGRADE_ENV, RESTART_ARGS_ENV};
use crate::core::KilnError;
use crate::utils::platform::{artifact_name, binary_file_name, platform_label};
use crate::utils::{ensure_dir, resolve_path};

/// Options for one `kiln upgrade` run.
#[derive(Debug, Clone, Default)]
pub struct UpgradeOpts {
    /// Print the plan and stop.
    pub dry_run: bool,
    /// Upgrade even when the target equals the running version.
    pub force: bool,
    /// Skip checksum verification.
    pub no_verify: bool,
    /// Install into this directory instead of replacing the running binary.
    pub install_dir: Option<String>,
    /// Install this version instead of the latest release.
    pub target_version: Option<String>,
    /// API server forwarded to the service coordinator.
    pub server_url: Option<String>,
}

/// What an upgrade would do, shown before anything changes.
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub current_version: String,
    pub target_version: String,
    pub release_tag: String,
    pub current_exe: PathBuf,
    pub install_path: PathBuf,
    pub platform: String,
    pub can_upgrade_in_place: bool,
    pub requires_elevation: bool,
    pub fallback_dir: Option<PathBuf>,
}

impl fmt::Display for UpgradePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "Upgrade plan:".bold())?;
        writeln!(f, "  Current version: {}", self.current_version)?;
        writeln!(f, "  Target version:  {}", self.target_version)?;
        writeln!(f, "  Install path:    {}", self.install_path.display())?;
        writeln!(f, "  Platform:        {}", self.platform)?;
        writeln!(
            f,
            "  In-place:        {}",
            if self.can_upgrade_in_place { "yes" } else { "no" }
        )?;
        write!(
            f,
            "  Elevation:       {}",
            if self.requires_elevation { "required" } else { "not required" }
        )?;
        if let Some(dir) = &self.fallback_dir {
            write!(f, "\n  Fallback dir:    {}", dir.display())?;
        }
        Ok(())
    }
}

/// Result of a completed upgrade.
#[derive(Debug, Clone)]
pub struct UpgradeReport {
    pub plan: UpgradePlan,
    pub installed_path: PathBuf,
    pub restarted_services: Vec<String>,
    pub warnings: Vec<String>,
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum UpgradeOutcome {
    /// Nothing to do; no download or replacement happened.
    AlreadyCurrent(UpgradeInfo),
    /// `--dry-run`: the plan was printed and nothing changed.
    DryRun(UpgradePlan),
    Upgraded(UpgradeReport),
}

/// Drives release lookup, download, verification, replacement and service restart.
pub struct UpgradeOrchestrator<S, C> {
    checker: VersionChecker<S>,
    downloader: ArtifactDownloader,
    services: C,
    strategy: PlatformStrategy,
    current_exe: Option<PathBuf>,
}

impl<S: ReleaseSource, C: ServiceCoordinator> UpgradeOrchestrator<S, C> {
    pub fn new(checker: VersionChecker<S>, downloader: ArtifactDownloader, services: C) -> Self {
        Self {
            checker,
            downloader,
            services,
            strategy: PlatformStrategy::current(),
            current_exe: None,
        }
    }

    /// Treat `path` as the running executable instead of `current_exe()`.
    #[must_use]
    pub fn with_current_exe(mut self, path: impl Into<PathBuf>) -> Self {
        self.current_exe = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: PlatformStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> &PlatformStrategy {
        &self.strategy
    }

    fn resolve_current_exe(&self) -> Result<PathBuf> {
        let exe = match &self.current_exe {
            Some(path) => path.clone(),
            None => std::env::current_exe().context("Failed to get current executable path")?,
        };
        std::fs::canonicalize(&exe)
            .with_context(|| format!("Failed to resolve executable path {}", exe.display()))
    }

    async fn resolve_target(&self, opts: &UpgradeOpts, now: DateTime<Utc>) -> Result<UpgradeInfo> {
        let current = self.checker.current_version();
        match &opts.target_version {
            Some(target) => {
                if normalize(target).semver.is_none() {
                    return Err(KilnError::InvalidVersion {
                        version: target.clone(),
                    }
                    .into());
                }
                Ok(UpgradeInfo::explicit(current, target))
            }
            None => {
                println!("{}", "Checking for updates...".cyan());
                self.checker.check_forced(now).await
            }
        }
    }

    /// Run the upgrade workflow.
    ///
    /// # Errors
    ///
    /// Release lookup, permission, download, checksum, replacement and
    /// verification failures. When replacement or verification fails the
    /// previous binary has already been restored.
    pub async fn run(&self, opts: &UpgradeOpts, now: DateTime<Utc>) -> Result<UpgradeOutcome> {
        let current_exe = self.resolve_current_exe()?;
        let info = self.resolve_target(opts, now).await?;

        let nothing_newer = opts.target_version.is_none() && !info.update_available;
        if !opts.force && (info.targets_current() || nothing_newer) {
            println!(
                "{}",
                format!("kiln is already up to date ({})", info.current_normalized).green()
            );
            return Ok(UpgradeOutcome::AlreadyCurrent(info));
        }

        let custom_dir = match &opts.install_dir {
            Some(dir) => Some(
                resolve_path(dir).with_context(|| format!("Invalid install directory: {dir}"))?,
            ),
            None => None,
        };
        let install_path = match &custom_dir {
            Some(dir) => dir.join(binary_file_name()),
            None => current_exe.clone(),
        };

        let plan = UpgradePlan {
            current_version: info.current_normalized.clone(),
            target_version: info.latest_normalized.clone(),
            release_tag: match &opts.target_version {
                Some(_) => release_tag(&info.latest_normalized),
                None => info.latest_version.clone(),
            },
            can_upgrade_in_place: self.strategy.can_upgrade(&current_exe)
                && is_dir_writable(parent_dir(&current_exe)),
            requires_elevation: self.strategy.requires_elevation(&install_path),
            fallback_dir: self.strategy.fallback_install_dir_path().ok(),
            current_exe,
            install_path,
            platform: platform_label(),
        };
        println!("{plan}");

        if opts.dry_run {
            println!("{}", "Dry run: no changes made".yellow());
            return Ok(UpgradeOutcome::DryRun(plan));
        }

        self.check_permissions(&plan, custom_dir.as_deref())?;

        let server_url = opts.server_url.as_deref();
        let mut warnings = Vec::new();
        let running = self.stop_services(server_url, &mut warnings).await;

        let installed = self.download_and_install(&plan, opts.no_verify).await;
        let restart_exe = match &installed {
            Ok(()) => &plan.install_path,
            Err(_) => &plan.current_exe,
        };
        if let Err(e) = &installed {
            warn!("Upgrade failed: {e:#}");
        }
        let restarted = self.start_services(restart_exe, &running, server_url, &mut warnings).await;
        installed?;

        println!(
            "{}",
            format!("Upgraded kiln to {} at {}", plan.target_version, plan.install_path.display())
                .green()
                .bold()
        );

        if let Some(value) = std::env::var_os(RESTART_AFTER_UPGRADE_ENV) {
            if !value.is_empty() {
                self.self_restart(&plan.install_path)?;
            }
        }

        Ok(UpgradeOutcome::Upgraded(UpgradeReport {
            installed_path: plan.install_path.clone(),
            plan,
            restarted_services: restarted,
            warnings,
        }))
    }

    /// Fail before any download when the install location cannot be written.
    fn check_permissions(&self, plan: &UpgradePlan, custom_dir: Option<&Path>) -> Result<()> {
        if let Some(dir) = custom_dir {
            if !dir.exists() && !plan.requires_elevation {
                ensure_dir(dir)?;
            }
            return Ok(());
        }

        if !self.strategy.can_upgrade(&plan.current_exe) {
            return Err(KilnError::NotUpgradable {
                path: plan.current_exe.display().to_string(),
                reason: "the running binary is not a regular executable file".to_string(),
            }
            .into());
        }

        if plan.can_upgrade_in_place {
            return Ok(());
        }

        let fallback = plan
            .fallback_dir
            .as_ref()
            .map_or_else(|| "<user-writable dir>".to_string(), |dir| dir.display().to_string());
        if plan.requires_elevation {
            Err(KilnError::ElevationRequired {
                path: plan.current_exe.display().to_string(),
                fallback,
            }
            .into())
        } else {
            Err(KilnError::PermissionDenied {
                operation: format!("replace kiln (try --install-dir {fallback})"),
                path: parent_dir(&plan.current_exe).display().to_string(),
            }
            .into())
        }
    }

    async fn download_and_install(&self, plan: &UpgradePlan, no_verify: bool) -> Result<()> {
        let scratch = tempfile::tempdir().context("Failed to create download directory")?;
        let artifact = artifact_name();

        println!("{}", format!("Downloading {artifact} ({})...", plan.release_tag).cyan());
        let binary = self.downloader.download(&plan.release_tag, &artifact, scratch.path()).await?;

        if no_verify {
            warn!("Skipping checksum verification");
        } else {
            let sidecar = self
                .downloader
                .download_checksum(&plan.release_tag, &artifact, scratch.path())
                .await?;
            ChecksumVerifier::verify(&binary, &sidecar).await?;
            println!("{}", "Checksum verified".green());
        }

        println!("{}", format!("Installing to {}...", plan.install_path.display()).cyan());
        self.strategy.perform_upgrade(&plan.install_path, &binary).await?;

        if !self.strategy.can_upgrade(&plan.install_path) {
            return Err(KilnError::NotUpgradable {
                path: plan.install_path.display().to_string(),
                reason: "installed file is not executable".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn stop_services(&self, server_url: Option<&str>, warnings: &mut Vec<String>) -> Vec<String> {
        let running = match self.services.running_services(server_url).await {
            Ok(running) => running,
            Err(e) => {
                warn!("Could not list running services: {e:#}");
                warnings.push(format!("could not list running services: {e:#}"));
                return Vec::new();
            }
        };
        if running.is_empty() {
            return running;
        }

        info!("Stopping services: {}", running.join(", "));
        if let Err(e) = self.services.stop_all(server_url).await {
            warn!("Could not stop services: {e:#}");
            warnings.push(format!("could not stop services: {e:#}"));
        }
        running
    }

    async fn start_services(
        &self,
        exe: &Path,
        names: &[String],
        server_url: Option<&str>,
        warnings: &mut Vec<String>,
    ) -> Vec<String> {
        if names.is_empty() {
            return Vec::new();
        }

        debug!("Starting services {} with {}", names.join(", "), exe.display());
        match self.services.start(exe, names, server_url).await {
            Ok(()) => names.to_vec(),
            Err(e) => {
                warn!("Could not restart services: {e:#}");
                warnings.push(format!("could not restart services: {e:#}"));
                Vec::new()
            }
        }
    }

    /// Hand the process over to the new binary.
    ///
    /// The upgrade's own arguments are never replayed; the new binary runs the
    /// host's [`RESTART_ARGS_ENV`] command line instead.
    fn self_restart(&self, exe: &Path) -> Result<()> {
        let args = restart_args(std::env::var_os(RESTART_ARGS_ENV))?;
        self.strategy.relaunch(exe, &args)
    }
}

/// Arguments for the restarted binary from the raw [`RESTART_ARGS_ENV`] value.
///
/// # Errors
///
/// [`KilnError::ConfigError`] when the value is not a JSON array of strings.
pub fn restart_args(raw: Option<OsString>) -> Result<Vec<OsString>> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(DEFAULT_RESTART_ARGS.iter().map(OsString::from).collect()),
    };

    let args: Vec<String> =
        serde_json::from_str(&raw.to_string_lossy()).map_err(|e| KilnError::ConfigError {
            message: format!("{RESTART_ARGS_ENV} must be a JSON array of strings: {e}"),
        })?;
    Ok(args.into_iter().map(OsString::from).collect())
}
