//! Shared helpers for CLI command implementations.

use anyhow::Result;

use crate::upgrade::{ReleaseFetcher, UpgradeConfig, VersionChecker};

/// Version of the running binary.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Release checker for the running binary, configured from `[upgrade]`.
///
/// # Errors
///
/// Fails if the HTTP client cannot be constructed.
pub fn release_checker(config: &UpgradeConfig) -> Result<VersionChecker<ReleaseFetcher>> {
    let fetcher = ReleaseFetcher::new(&config.api_url)?;
    Ok(VersionChecker::new(fetcher, CURRENT_VERSION).with_interval(config.interval()))
}
