//! Throttled release checks and update notifications.
//!
//! Two kinds of checks exist:
//!
//! - **Passive** checks run after ordinary commands (`kiln version`). They consult
//!   the network at most once per check interval, reuse the version remembered in
//!   the state file in between, and never surface errors: failures are logged at
//!   debug level and the command carries on.
//! - **Forced** checks back `kiln check` and `kiln upgrade`. They always query the
//!   release index and return failures to the caller unchanged.
//!
//! Both record successful results in the [`UpgradeStateStore`]; a failure to write
//! the state file never fails the check.

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use super::release::ReleaseSource;
use super::state::{UpgradeState, UpgradeStateStore, should_check};
use super::version::UpgradeInfo;
use crate::constants::CHECK_INTERVAL;

/// Checks the release index for newer versions of the running binary.
///
/// The clock is an explicit parameter of every check so callers and tests decide
/// what "now" is.
///
/// # Examples
///
/// ```rust,no_run
/// use kiln_cli::upgrade::release::ReleaseFetcher;
/// use kiln_cli::upgrade::version_check::{VersionChecker, display_update_notification};
///
/// # async fn example() -> anyhow::Result<()> {
/// let fetcher = ReleaseFetcher::new("https://api.github.com/repos/kiln-dev/kiln/releases")?;
/// let checker = VersionChecker::new(fetcher, env!("CARGO_PKG_VERSION"));
///
/// if let Some(info) = checker.check_passive(chrono::Utc::now()).await {
///     if info.update_available {
///         display_update_notification(&info);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct VersionChecker<S> {
    source: S,
    current_version: String,
    state_path: Option<PathBuf>,
    interval: Duration,
}

impl<S: ReleaseSource> VersionChecker<S> {
    /// Checker for `current_version` using the default state file and interval.
    pub fn new(source: S, current_version: impl Into<String>) -> Self {
        Self {
            source,
            current_version: current_version.into(),
            state_path: None,
            interval: CHECK_INTERVAL,
        }
    }

    /// Use an explicit state file instead of the default location.
    #[must_use]
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Override the minimum time between passive checks.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The version this checker compares against.
    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// The release source backing this checker.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn store(&self) -> Result<UpgradeStateStore> {
        match &self.state_path {
            Some(path) => Ok(UpgradeStateStore::new(path)),
            None => UpgradeStateStore::open_default(),
        }
    }

    fn record(&self, store: Option<&UpgradeStateStore>, now: DateTime<Utc>, latest: &str) {
        let Some(store) = store else {
            return;
        };
        let state = UpgradeState {
            last_checked: now,
            latest_version: latest.to_string(),
        };
        if let Err(e) = store.write(&state) {
            debug!("Failed to record release check: {e:#}");
        }
    }

    /// Dispatch to [`Self::check_forced`] or [`Self::check_passive`].
    ///
    /// # Errors
    ///
    /// Only forced checks fail.
    pub async fn check(&self, now: DateTime<Utc>, force: bool) -> Result<Option<UpgradeInfo>> {
        if force {
            self.check_forced(now).await.map(Some)
        } else {
            Ok(self.check_passive(now).await)
        }
    }

    /// Query the release index regardless of when it was last consulted.
    ///
    /// # Errors
    ///
    /// Returns the fetch error verbatim (network, HTTP status, validation or
    /// draft/prerelease filtering).
    pub async fn check_forced(&self, now: DateTime<Utc>) -> Result<UpgradeInfo> {
        debug!("Performing explicit release check");

        let store = self
            .store()
            .map_err(|e| debug!("Upgrade state unavailable: {e:#}"))
            .ok();

        let release = self.source.fetch_latest().await?;
        self.record(store.as_ref(), now, &release.tag);

        Ok(UpgradeInfo::from_release(&self.current_version, &release))
    }

    /// Throttled check that never fails.
    ///
    /// Returns `None` when nothing is known: the check failed, or it was throttled
    /// and no version was remembered.
    pub async fn check_passive(&self, now: DateTime<Utc>) -> Option<UpgradeInfo> {
        let store = match self.store() {
            Ok(store) => store,
            Err(e) => {
                debug!("Skipping release check, upgrade state unavailable: {e:#}");
                return None;
            }
        };

        let state = store.read();
        if !should_check(now, &state, self.interval) {
            debug!("Release check throttled, last checked at {}", state.last_checked);
            if state.latest_version.is_empty() {
                return None;
            }
            return Some(UpgradeInfo::from_cached(&self.current_version, &state.latest_version));
        }

        match self.source.fetch_latest().await {
            Ok(release) => {
                self.record(Some(&store), now, &release.tag);
                Some(UpgradeInfo::from_release(&self.current_version, &release))
            }
            Err(e) => {
                debug!("Release check failed: {e:#}");
                None
            }
        }
    }
}

/// Print the update banner to stderr.
pub fn display_update_notification(info: &UpgradeInfo) {
    let rule = "━".repeat(56);

    eprintln!();
    eprintln!("{}", rule.bright_cyan());
    eprintln!("{} A new version of kiln is available!", "📦".bright_cyan());
    eprintln!();
    eprintln!("  Current version: {}", info.current_normalized.yellow());
    eprintln!("  Latest version:  {}", info.latest_normalized.green().bold());
    if !info.release_url.is_empty() {
        eprintln!("  Release notes:   {}", info.release_url.dimmed());
    }
    eprintln!();
    eprintln!("  Run {} to upgrade", "kiln upgrade".cyan().bold());
    eprintln!();
    eprintln!("  To disable automatic update checks, set in your config file:");
    eprintln!("  {}", "[upgrade]\n  check_on_startup = false".dimmed());
    eprintln!("{}", rule.bright_cyan());
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::KilnError;
    use crate::upgrade::release::ReleaseInfo;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Release source that counts calls and optionally fails.
    struct CountingSource {
        calls: AtomicUsize,
        tag: &'static str,
        fail: bool,
    }

    impl CountingSource {
        fn new(tag: &'static str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                tag,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new("v0.0.0")
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ReleaseSource for CountingSource {
        async fn fetch_latest(&self) -> Result<ReleaseInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(KilnError::NetworkError {
                    operation: "fetch latest release".to_string(),
                    reason: "connection refused".to_string(),
                }
                .into());
            }
            Ok(ReleaseInfo {
                tag: self.tag.to_string(),
                html_url: format!("https://example.com/releases/{}", self.tag),
                published_at: DateTime::<Utc>::UNIX_EPOCH,
                body: String::new(),
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    fn checker(source: CountingSource, temp: &TempDir) -> VersionChecker<CountingSource> {
        VersionChecker::new(source, "1.0.0").with_state_path(temp.path().join("state.json"))
    }

    #[tokio::test]
    async fn test_passive_checks_are_throttled() {
        let temp = TempDir::new().unwrap();
        let checker = checker(CountingSource::new("v1.2.0"), &temp);

        let first = checker.check_passive(now()).await.unwrap();
        let second = checker.check_passive(now() + chrono::Duration::hours(1)).await.unwrap();

        assert_eq!(checker.source().calls(), 1);
        assert!(first.update_available);
        assert!(second.update_available);
        assert_eq!(second.latest_normalized, "1.2.0");

        checker.check_passive(now() + chrono::Duration::hours(6)).await.unwrap();
        assert_eq!(checker.source().calls(), 2);
    }

    #[tokio::test]
    async fn test_forced_check_always_fetches() {
        let temp = TempDir::new().unwrap();
        let checker = checker(CountingSource::new("v1.0.0"), &temp);

        checker.check_passive(now()).await;
        let info = checker.check(now(), true).await.unwrap().unwrap();
        checker.check_forced(now()).await.unwrap();

        assert_eq!(checker.source().calls(), 3);
        assert!(!info.update_available);
    }

    #[tokio::test]
    async fn test_passive_swallows_errors_forced_returns_them() {
        let temp = TempDir::new().unwrap();
        let checker = checker(CountingSource::failing(), &temp);

        assert!(checker.check_passive(now()).await.is_none());
        assert!(checker.check(now(), false).await.unwrap().is_none());

        let err = checker.check_forced(now()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<KilnError>(), Some(KilnError::NetworkError { .. })));

        // A failed check is not recorded, so the next passive check retries
        assert!(UpgradeStateStore::new(temp.path().join("state.json")).read().is_unset());
        checker.check_passive(now()).await;
        assert_eq!(checker.source().calls(), 4);
    }

    #[tokio::test]
    async fn test_successful_check_records_state() {
        let temp = TempDir::new().unwrap();
        let checker = checker(CountingSource::new("v3.1.4"), &temp);

        checker.check_forced(now()).await.unwrap();

        let state = UpgradeStateStore::new(temp.path().join("state.json")).read();
        assert_eq!(state.last_checked, now());
        assert_eq!(state.latest_version, "v3.1.4");
    }

    #[tokio::test]
    async fn test_unwritable_state_does_not_block_check() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("file"), "x").unwrap();
        let checker = VersionChecker::new(CountingSource::new("v2.0.0"), "1.0.0")
            .with_state_path(temp.path().join("file").join("state.json"));

        let info = checker.check_passive(now()).await.unwrap();
        assert!(info.update_available);
        assert!(checker.check_forced(now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_interval_always_checks() {
        let temp = TempDir::new().unwrap();
        let checker = checker(CountingSource::new("v1.0.0"), &temp).with_interval(Duration::ZERO);

        checker.check_passive(now()).await;
        checker.check_passive(now()).await;
        assert_eq!(checker.source().calls(), 2);
    }
}
