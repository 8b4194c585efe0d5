//! Platform-specific utilities and cross-platform compatibility helpers
//!
//! This module hides the small platform differences the rest of kiln needs to
//! know about outside the upgrade strategies themselves:
//!
//! - Home directory resolution
//! - Release artifact naming (`<os>-<arch>` fragments and the `.exe` suffix)
//! - Tilde and environment variable expansion for user-supplied paths
//!
//! # Examples
//!
//! ```rust,no_run
//! use kiln_cli::utils::platform::{artifact_name, resolve_path};
//!
//! # fn example() -> anyhow::Result<()> {
//! let install_dir = resolve_path("~/.local/bin")?;
//! println!("{} -> {}", artifact_name(), install_dir.display());
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use regex::Regex;
use std::path::PathBuf;

use crate::constants::BINARY_NAME;

/// Returns true when compiled for Windows.
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// Get the current user's home directory with a platform-specific hint on failure.
pub fn get_home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| {
        let platform_help = if is_windows() {
            "On Windows: Check that the USERPROFILE environment variable is set"
        } else {
            "On Unix/Linux: Check that the HOME environment variable is set"
        };
        anyhow::anyhow!("Could not determine home directory.\n\n{platform_help}")
    })
}

/// Operating system fragment used in release artifact names.
///
/// Rust's `macos` is published as `darwin`; other names pass through unchanged.
#[must_use]
pub fn os_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Architecture fragment used in release artifact names.
#[must_use]
pub fn arch_name() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Platform description shown in upgrade plans, e.g. `linux/amd64`.
#[must_use]
pub fn platform_label() -> String {
    format!("{}/{}", os_name(), arch_name())
}

/// File name of the kiln executable on this platform.
#[must_use]
pub fn binary_file_name() -> String {
    format!("{BINARY_NAME}{}", std::env::consts::EXE_SUFFIX)
}

/// Release artifact name for this platform: `kiln-<os>-<arch>[.exe]`.
#[must_use]
pub fn artifact_name() -> String {
    format!("{BINARY_NAME}-{}-{}{}", os_name(), arch_name(), std::env::consts::EXE_SUFFIX)
}

/// Resolve a user-supplied path, expanding `~/` and environment variables.
///
/// Unix-style `$VAR`/`${VAR}` references are expanded everywhere; Windows
/// additionally understands `%VAR%`.
///
/// # Errors
///
/// Fails for `~user` forms, which are not supported, and for references to
/// undefined environment variables.
pub fn resolve_path(path: &str) -> Result<PathBuf> {
    let expanded = if let Some(stripped) = path.strip_prefix("~/") {
        let home = get_home_dir()?;
        home.join(stripped)
    } else if path == "~" {
        get_home_dir()?
    } else if path.starts_with('~') {
        return Err(anyhow::anyhow!(
            "Invalid path: {path}\n\n\
            Tilde expansion only supports '~/' for home directory.\n\
            Use '~/' followed by a relative path, like '~/.local/bin'"
        ));
    } else {
        PathBuf::from(path)
    };

    let path_str = expanded.to_string_lossy();

    let expanded_str = if is_windows() && path_str.contains('%') {
        // Manual Windows-style %VAR% expansion
        let mut result = path_str.to_string();
        let re = Regex::new(r"%([^%]+)%").context("Invalid environment variable pattern")?;

        for cap in re.captures_iter(&path_str) {
            if let Some(var_name) = cap.get(1) {
                if let Ok(value) = std::env::var(var_name.as_str()) {
                    result = result.replace(&format!("%{}%", var_name.as_str()), &value);
                }
            }
        }

        match shellexpand::env(&result) {
            Ok(expanded) => expanded.into_owned(),
            Err(_) => result,
        }
    } else {
        shellexpand::env(&path_str)
            .with_context(|| {
                format!(
                    "Failed to expand environment variables in path: {path_str}\n\n\
                    Check that every referenced variable is defined (use $VAR or ${{VAR}})"
                )
            })?
            .into_owned()
    };

    Ok(PathBuf::from(expanded_str))
}
