//! kiln - local model workbench CLI
//!
//! This crate holds the kiln command-line tool and, most importantly, its
//! self-upgrade engine: the code that lets a running `kiln` executable replace
//! itself with a newer release without ever leaving a broken install behind.
//!
//! # Architecture Overview
//!
//! An upgrade flows through a fixed sequence of components:
//!
//! ```text
//! CLI → VersionChecker → ReleaseFetcher → ArtifactDownloader → ChecksumVerifier
//!     → ServiceCoordinator (stop) → PlatformStrategy (backup, swap, verify, rollback)
//!     → ServiceCoordinator (start with the new binary) → optional re-exec
//! ```
//!
//! # Core Modules
//!
//! - [`cli`] - argument parsing and the `upgrade`, `check` and `version` commands
//! - [`config`] - global configuration file (`~/.config/kiln/config.toml`)
//! - [`constants`] - timeouts, size limits and environment variable names
//! - [`core`] - the [`core::KilnError`] type and user-facing error formatting
//! - [`upgrade`] - the self-upgrade engine
//! - [`utils`] - atomic file writes, artifact naming and path expansion
//!
//! # Example
//!
//! ```rust,no_run
//! use kiln_cli::upgrade::{ReleaseFetcher, VersionChecker};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let fetcher = ReleaseFetcher::new("https://api.github.com/repos/kiln-dev/kiln/releases")?;
//! let checker = VersionChecker::new(fetcher, env!("CARGO_PKG_VERSION"));
//! let info = checker.check_forced(chrono::Utc::now()).await?;
//! println!("latest: {}", info.latest_normalized);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod upgrade;
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
