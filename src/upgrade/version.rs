//! Version normalization and the user-facing update summary.
//!
//! Release tags are published as `v1.2.3`, while `CARGO_PKG_VERSION` is `1.2.3`.
//! Everything is normalized before comparison, and comparison only happens when
//! both sides are strict semantic versions. A development build whose version does
//! not parse is never told that an update is available.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::Serialize;

use super::release::ReleaseInfo;

/// A version string with an optional leading `v` stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedVersion {
    /// Display form without the `v` prefix.
    pub normalized: String,
    /// Strict semver parse of [`Self::normalized`], if it parses.
    pub semver: Option<Version>,
}

/// Trim whitespace and one leading `v`/`V`, then attempt a strict semver parse.
///
/// The normalized string is returned even when parsing fails so it can still be
/// displayed.
///
/// ```
/// use kiln_cli::upgrade::version::normalize;
///
/// assert_eq!(normalize("v1.2.3"), normalize("1.2.3"));
/// assert!(normalize("nightly").semver.is_none());
/// ```
#[must_use]
pub fn normalize(raw: &str) -> NormalizedVersion {
    let trimmed = raw.trim();
    let normalized = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed)
        .to_string();
    let semver = Version::parse(&normalized).ok();

    NormalizedVersion {
        normalized,
        semver,
    }
}

/// Release tag for a normalized version (`1.2.3` becomes `v1.2.3`).
#[must_use]
pub fn release_tag(normalized: &str) -> String {
    format!("v{normalized}")
}

/// Whether `latest` is strictly newer than `current`.
///
/// Always `false` unless both sides are valid semantic versions.
#[must_use]
pub fn is_newer(current: &NormalizedVersion, latest: &NormalizedVersion) -> bool {
    match (&current.semver, &latest.semver) {
        (Some(current), Some(latest)) => latest > current,
        _ => false,
    }
}

/// Summary of the running version against the latest known release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeInfo {
    pub current_version: String,
    pub current_normalized: String,
    pub latest_version: String,
    pub latest_normalized: String,
    pub release_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub release_notes: String,
    pub update_available: bool,
    pub current_is_semver: bool,
}

impl UpgradeInfo {
    fn build(current: &str, latest: &str) -> Self {
        let current_version = normalize(current);
        let latest_version = normalize(latest);
        let update_available = is_newer(&current_version, &latest_version);

        Self {
            current_version: current.to_string(),
            current_is_semver: current_version.semver.is_some(),
            current_normalized: current_version.normalized,
            latest_version: latest.to_string(),
            latest_normalized: latest_version.normalized,
            release_url: String::new(),
            published_at: None,
            release_notes: String::new(),
            update_available,
        }
    }

    /// Summary from a freshly fetched release.
    #[must_use]
    pub fn from_release(current: &str, release: &ReleaseInfo) -> Self {
        Self {
            release_url: release.html_url.clone(),
            published_at: Some(release.published_at),
            release_notes: release.body.clone(),
            ..Self::build(current, &release.tag)
        }
    }

    /// Summary from the version remembered in the state file, without network access.
    #[must_use]
    pub fn from_cached(current: &str, latest: &str) -> Self {
        Self::build(current, latest)
    }

    /// Synthetic summary for an explicitly requested version.
    ///
    /// The user asked for this version by name, so it is always treated as
    /// available regardless of ordering.
    #[must_use]
    pub fn explicit(current: &str, target: &str) -> Self {
        Self {
            update_available: true,
            ..Self::build(current, target)
        }
    }

    /// Whether the target is the version that is already running.
    #[must_use]
    pub fn targets_current(&self) -> bool {
        self.latest_normalized == self.current_normalized
    }
}

/// Format version information for `kiln check` output.
#[must_use]
pub fn format_version_info(info: &UpgradeInfo) -> String {
    if info.update_available {
        let mut text = format!(
            "Current version: {}\nLatest version:  {} (update available)",
            info.current_normalized, info.latest_normalized
        );
        if !info.release_url.is_empty() {
            text.push_str(&format!("\nRelease notes:   {}", info.release_url));
        }
        text
    } else if !info.current_is_semver {
        format!(
            "Current version: {} (development build, latest release is {})",
            info.current_version, info.latest_normalized
        )
    } else {
        format!("Current version: {} (up to date)", info.current_normalized)
    }
}
