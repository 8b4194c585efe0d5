//! Self-upgrade engine for the kiln binary.
//!
//! This module lets kiln check for newer releases of itself, download and verify
//! a replacement, and swap it into place without ever leaving a broken install
//! behind.
//!
//! # Architecture Overview
//!
//! ## Core Components
//!
//! - **[`orchestrator::UpgradeOrchestrator`]**: the `kiln upgrade` workflow
//! - **[`VersionChecker`]**: forced and throttled release checks
//! - **[`release::ReleaseFetcher`]**: GitHub-style release index client
//! - **[`download::ArtifactDownloader`]**: size- and time-bounded artifact downloads
//! - **[`ChecksumVerifier`]**: SHA-256 verification against `.sha256` sidecars
//! - **[`platform::PlatformStrategy`]**: Unix/Windows backup, swap, verify, rollback
//! - **[`services::ServiceCoordinator`]**: stop/start access to managed services
//! - **[`state::UpgradeStateStore`]**: when the release index was last consulted
//!
//! ## Update Process Flow
//!
//! ```text
//! 1. Version Check
//!    ├── Explicit --version, or a forced release check
//!    └── Stop early when the target is already installed
//!
//! 2. Plan and Permission Gate
//!    ├── Print versions, install path, platform, elevation needs
//!    └── Fail before downloading when the install dir cannot be written
//!
//! 3. Download and Verify
//!    ├── Stop running services
//!    ├── Download artifact and .sha256 sidecar to a scratch directory
//!    └── Abort on checksum mismatch, live binary untouched
//!
//! 4. Replace
//!    ├── Backup → atomic rename → `kiln --version` self-check
//!    └── Restore the backup on any failure
//!
//! 5. Post-Update
//!    ├── Restart services with the new binary
//!    └── Optionally re-exec into the new binary
//! ```
//!
//! # Safety Mechanisms
//!
//! - At every moment the live path holds exactly one complete executable: the
//!   original, or the new one. Renames are the only transition.
//! - The backup is a same-directory copy, so restoring it is also a rename.
//! - Nothing touches the live path until the download has been verified.
//! - Service failures are warnings; they never abort a swap in progress.
//!
//! # Configuration
//!
//! See [`UpgradeConfig`] for the `[upgrade]` table of the global config file.

pub mod backup;
pub mod config;
pub mod download;
pub mod orchestrator;
pub mod platform;
pub mod release;
pub mod services;
pub mod state;
pub mod verification;
pub mod version;
pub mod version_check;

pub use config::UpgradeConfig;
pub use orchestrator::{UpgradeOpts, UpgradeOrchestrator, UpgradeOutcome};
pub use platform::PlatformStrategy;
pub use release::{ReleaseFetcher, ReleaseInfo, ReleaseSource};
pub use services::{ServiceCoordinator, Services};
pub use verification::ChecksumVerifier;
pub use version::UpgradeInfo;
pub use version_check::VersionChecker;
