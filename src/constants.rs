//! Global constants used throughout the kiln codebase.
//!
//! This module contains timeout durations, size limits, environment variable
//! names and other constants that are used across multiple modules. Defining
//! them centrally keeps the upgrade engine's limits discoverable in one place.

use std::time::Duration;

/// Name of the executable shipped in every release.
pub const BINARY_NAME: &str = "kiln";

/// Default GitHub API endpoint for the release index.
///
/// `/latest` is appended when fetching the newest published release.
pub const DEFAULT_API_URL: &str = "https://api.github.com/repos/kiln-dev/kiln/releases";

/// Default base URL for release assets.
///
/// Assets live under `<base>/download/<tag>/<artifact>`.
pub const DEFAULT_DOWNLOAD_URL: &str = "https://github.com/kiln-dev/kiln/releases";

/// Minimum time between two passive (non-forced) release checks (6 hours).
pub const CHECK_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Timeout applied by the HTTP client used for release index queries (30 seconds).
pub const RELEASE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard wall-clock limit for downloading a release artifact (5 minutes).
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Hard cap on the size of a downloaded artifact (100 MB).
pub const MAX_DOWNLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Maximum number of bytes of an HTTP error body kept for diagnostics (4 KB).
pub const MAX_ERROR_BODY_BYTES: usize = 4 * 1024;

/// Timeout for running `<binary> --version` after installation (30 seconds).
pub const SELF_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for stopping or starting managed services (120 seconds).
///
/// Starting services with a freshly installed binary may trigger first-time
/// environment setup, which is why this is measured in minutes.
pub const SERVICE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for each individual privileged step (5 minutes).
///
/// Long enough for the user to answer a password prompt.
pub const ELEVATED_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Arguments passed to a freshly installed binary to verify it runs.
pub const SELF_CHECK_ARGS: &[&str] = &["--version"];

/// Overrides the location of the upgrade state file.
pub const STATE_PATH_ENV: &str = "KILN_UPGRADE_STATE_PATH";

/// Bearer token for the release API.
pub const TOKEN_ENV: &str = "KILN_GITHUB_TOKEN";

/// Fallback bearer token variable honoured when [`TOKEN_ENV`] is unset.
pub const FALLBACK_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Set by an embedding host to request an in-place restart after upgrading.
pub const RESTART_AFTER_UPGRADE_ENV: &str = "KILN_RESTART_AFTER_UPGRADE";

/// JSON array of arguments the host wants the restarted binary to run with.
pub const RESTART_ARGS_ENV: &str = "KILN_RESTART_ARGS";

/// Arguments of the restarted binary when the host supplies none.
pub const DEFAULT_RESTART_ARGS: &[&str] = &["version"];

/// Overrides the location of the global configuration file.
pub const CONFIG_PATH_ENV: &str = "KILN_CONFIG";
