//! Error handling for kiln
//!
//! This module provides the error types and user-friendly error reporting for the
//! kiln CLI and its self-upgrade engine. It follows two principles:
//! 1. **Strongly-typed errors** so callers (and tests) can tell failure classes apart
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Error Categories
//!
//! - **Network**: [`KilnError::NetworkError`], [`KilnError::HttpStatus`], [`KilnError::Timeout`]
//! - **Validation**: [`KilnError::ReleaseInvalid`], [`KilnError::ReleaseFiltered`],
//!   [`KilnError::InvalidChecksumFile`], [`KilnError::InvalidVersion`]
//! - **Integrity**: [`KilnError::ChecksumMismatch`], [`KilnError::DownloadTooLarge`]
//! - **Permission**: [`KilnError::PermissionDenied`], [`KilnError::ElevationRequired`],
//!   [`KilnError::ElevationUnsupported`]
//! - **Replacement**: [`KilnError::ReplacementFailed`], [`KilnError::RollbackFailed`]
//! - **Verification**: [`KilnError::VerificationFailed`], [`KilnError::NotUpgradable`]
//! - **Service coordination**: [`KilnError::ServiceError`] (logged as a warning by the
//!   orchestrator, never fatal to the binary swap)
//!
//! Use [`user_friendly_error`] to turn any `anyhow::Error` into an [`ErrorContext`]
//! carrying remediation for the terminal.
//!
//! # Examples
//!
//! ```rust,no_run
//! use kiln_cli::core::{ErrorContext, KilnError};
//!
//! let context = ErrorContext::new(KilnError::ElevationUnsupported {
//!     path: r"C:\Program Files\kiln\kiln.exe".to_string(),
//! })
//! .with_suggestion("Run the terminal as Administrator");
//!
//! context.display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for kiln operations.
///
/// Variants carry owned strings rather than borrowed data so errors can be moved
/// across await points and wrapped in `anyhow::Error` freely.
#[derive(Error, Debug)]
pub enum KilnError {
    /// A network request could not be completed.
    #[error("Network error: {operation}: {reason}")]
    NetworkError {
        /// What was being attempted (e.g. "fetch latest release")
        operation: String,
        /// Underlying transport error
        reason: String,
    },

    /// The server answered with a status of 300 or above.
    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
        /// Response body, truncated for diagnostics
        body: String,
    },

    /// An operation ran past its deadline.
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// Deadline in seconds
        seconds: u64,
    },

    /// The release index returned a payload missing required fields.
    #[error("Invalid release metadata: {reason}")]
    ReleaseInvalid {
        /// What was wrong with the payload
        reason: String,
    },

    /// The latest release was a draft or prerelease and is not offered.
    #[error("Release {tag} filtered out: {reason}")]
    ReleaseFiltered {
        /// Release tag
        tag: String,
        /// "draft" or "prerelease"
        reason: String,
    },

    /// A checksum sidecar file could not be parsed.
    #[error("Invalid checksum file {path}: {reason}")]
    InvalidChecksumFile {
        /// Path of the sidecar file
        path: String,
        /// Parse failure (e.g. "invalid checksum length")
        reason: String,
    },

    /// A downloaded artifact does not match its published digest.
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Path of the verified file
        path: String,
        /// Digest from the sidecar
        expected: String,
        /// Digest computed locally
        actual: String,
    },

    /// A download exceeded the size cap.
    #[error("Download from {url} exceeds the {limit} byte limit ({size} bytes)")]
    DownloadTooLarge {
        /// Requested URL
        url: String,
        /// Declared or observed size
        size: u64,
        /// Configured cap
        limit: u64,
    },

    /// The current user lacks permission for a filesystem operation.
    #[error("Permission denied: {operation} ({path})")]
    PermissionDenied {
        /// What was being attempted
        operation: String,
        /// Path involved
        path: String,
    },

    /// The install location needs elevated privileges that were not granted.
    #[error("Installing to {path} requires elevated privileges")]
    ElevationRequired {
        /// Install path
        path: String,
        /// User-writable alternative directory
        fallback: String,
    },

    /// Elevated upgrades are not implemented on this platform.
    #[error(
        "Elevated upgrade of {path} is not yet supported on this platform: run kiln from an elevated prompt or choose a user-writable install directory"
    )]
    ElevationUnsupported {
        /// Install path
        path: String,
    },

    /// The path does not point at an upgradable executable.
    #[error("{path} is not an upgradable executable: {reason}")]
    NotUpgradable {
        /// Offending path
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// Moving or copying binaries during the swap failed.
    #[error("Failed to replace {path}: {reason}")]
    ReplacementFailed {
        /// Live binary path
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// The freshly installed binary failed its self-check.
    #[error("New binary at {path} failed verification: {reason}")]
    VerificationFailed {
        /// Live binary path
        path: String,
        /// Exit status or spawn failure
        reason: String,
    },

    /// Restoring the backup failed after the upgrade itself failed.
    #[error("Upgrade failed ({original}) and rollback also failed ({reason}); backup kept at {backup}")]
    RollbackFailed {
        /// The failure that triggered the rollback
        original: String,
        /// Why the rollback failed
        reason: String,
        /// Where the pre-upgrade binary still lives
        backup: String,
    },

    /// Talking to the service manager failed.
    #[error("Service coordination failed: {operation}: {reason}")]
    ServiceError {
        /// What was being attempted
        operation: String,
        /// Underlying failure
        reason: String,
    },

    /// A user-supplied version string is unusable.
    #[error("Invalid version: {version}")]
    InvalidVersion {
        /// The rejected version string
        version: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// The requested operation does not exist on this platform.
    #[error("Operation not supported on this platform: {operation}")]
    PlatformNotSupported {
        /// The unsupported operation
        operation: String,
    },

    /// Wrapped I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl Clone for KilnError {
    fn clone(&self) -> Self {
        match self {
            Self::NetworkError {
                operation,
                reason,
            } => Self::NetworkError {
                operation: operation.clone(),
                reason: reason.clone(),
            },
            Self::HttpStatus {
                url,
                status,
                body,
            } => Self::HttpStatus {
                url: url.clone(),
                status: *status,
                body: body.clone(),
            },
            Self::Timeout {
                operation,
                seconds,
            } => Self::Timeout {
                operation: operation.clone(),
                seconds: *seconds,
            },
            Self::ReleaseInvalid {
                reason,
            } => Self::ReleaseInvalid {
                reason: reason.clone(),
            },
            Self::ReleaseFiltered {
                tag,
                reason,
            } => Self::ReleaseFiltered {
                tag: tag.clone(),
                reason: reason.clone(),
            },
            Self::InvalidChecksumFile {
                path,
                reason,
            } => Self::InvalidChecksumFile {
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::ChecksumMismatch {
                path,
                expected,
                actual,
            } => Self::ChecksumMismatch {
                path: path.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            },
            Self::DownloadTooLarge {
                url,
                size,
                limit,
            } => Self::DownloadTooLarge {
                url: url.clone(),
                size: *size,
                limit: *limit,
            },
            Self::PermissionDenied {
                operation,
                path,
            } => Self::PermissionDenied {
                operation: operation.clone(),
                path: path.clone(),
            },
            Self::ElevationRequired {
                path,
                fallback,
            } => Self::ElevationRequired {
                path: path.clone(),
                fallback: fallback.clone(),
            },
            Self::ElevationUnsupported {
                path,
            } => Self::ElevationUnsupported {
                path: path.clone(),
            },
            Self::NotUpgradable {
                path,
                reason,
            } => Self::NotUpgradable {
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::ReplacementFailed {
                path,
                reason,
            } => Self::ReplacementFailed {
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::VerificationFailed {
                path,
                reason,
            } => Self::VerificationFailed {
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::RollbackFailed {
                original,
                reason,
                backup,
            } => Self::RollbackFailed {
                original: original.clone(),
                reason: reason.clone(),
                backup: backup.clone(),
            },
            Self::ServiceError {
                operation,
                reason,
            } => Self::ServiceError {
                operation: operation.clone(),
                reason: reason.clone(),
            },
            Self::InvalidVersion {
                version,
            } => Self::InvalidVersion {
                version: version.clone(),
            },
            Self::ConfigError {
                message,
            } => Self::ConfigError {
                message: message.clone(),
            },
            Self::PlatformNotSupported {
                operation,
            } => Self::PlatformNotSupported {
                operation: operation.clone(),
            },
            // For errors that don't implement Clone, convert to Other
            Self::IoError(e) => Self::Other {
                message: format!("IO error: {e}"),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

/// Error wrapper that adds a suggestion and details for terminal display.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: KilnError,
    /// Optional remediation shown in green
    pub suggestion: Option<String>,
    /// Optional background shown in yellow
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap an error without suggestion or details.
    #[must_use]
    pub const fn new(error: KilnError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Attach a remediation suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach background details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with suggestions where kiln knows better.
///
/// Typed [`KilnError`]s anywhere in the chain get tailored remediation; I/O
/// permission errors map to [`KilnError::PermissionDenied`]; everything else keeps
/// its full cause chain so nothing is lost.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(ctx) = error.downcast_ref::<ErrorContext>() {
        return ErrorContext {
            error: ctx.error.clone(),
            suggestion: ctx.suggestion.clone(),
            details: ctx.details.clone(),
        };
    }

    // Typed errors are often wrapped in `.context(...)`, so search the whole chain
    if let Some(kiln_error) = error.chain().find_map(|cause| cause.downcast_ref::<KilnError>()) {
        return create_error_context(kiln_error.clone());
    }

    let permission_denied = error
        .downcast_ref::<std::io::Error>()
        .is_some_and(|io_error| io_error.kind() == std::io::ErrorKind::PermissionDenied);
    if permission_denied {
        return ErrorContext::new(KilnError::PermissionDenied {
            operation: "file access".to_string(),
            path: "unknown".to_string(),
        })
        .with_suggestion(
            "Try running with elevated permissions (sudo/Administrator) or check file ownership",
        )
        .with_details("This error occurs when kiln doesn't have permission to read or write files");
    }

    // Generic error - include the full error chain for better diagnostics
    let mut message = error.to_string();

    let chain: Vec<String> =
        error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(KilnError::Other {
        message,
    })
}

fn create_error_context(error: KilnError) -> ErrorContext {
    match &error {
        KilnError::NetworkError { .. } | KilnError::Timeout { .. } => ErrorContext::new(error.clone())
            .with_suggestion("Check your internet connection and run the command again")
            .with_details("Network failures are not retried automatically; re-running the command is safe because the installed binary is untouched until the download has been verified"),

        KilnError::HttpStatus { status, .. } => {
            let suggestion = match status {
                401 | 403 => format!(
                    "The release API refused the request. Set {} to a GitHub token to raise rate limits",
                    crate::constants::TOKEN_ENV
                ),
                404 => "The requested release or asset does not exist. Check the version with 'kiln check'".to_string(),
                _ => "The release server returned an error. Try again later".to_string(),
            };
            ErrorContext::new(error.clone()).with_suggestion(suggestion)
        }

        KilnError::ReleaseFiltered { tag, reason } => ErrorContext::new(error.clone())
            .with_suggestion(format!("Pass '--version {tag}' to install it explicitly"))
            .with_details(format!("The latest release is marked {reason} and is not offered automatically")),

        KilnError::InvalidChecksumFile { .. } | KilnError::ChecksumMismatch { .. } => {
            ErrorContext::new(error.clone())
                .with_suggestion("Retry the upgrade; if the problem persists, download the release manually and compare its checksum")
                .with_details("The installed binary was not modified. A checksum failure means the download was corrupted or tampered with")
        }

        KilnError::PermissionDenied { operation, path } => ErrorContext::new(error.clone())
            .with_suggestion(match cfg!(windows) {
                true => "Run as Administrator or pass --install-dir with a user-writable directory",
                false => "Use 'sudo' or pass --install-dir with a user-writable directory",
            })
            .with_details(format!(
                "Cannot {operation} due to insufficient permissions on {path}"
            )),

        KilnError::ElevationRequired { fallback, .. } => ErrorContext::new(error.clone())
            .with_suggestion(format!(
                "Re-run with elevated privileges, or install to a user-writable directory: kiln upgrade --install-dir {fallback}"
            ))
            .with_details(format!(
                "You can also download the binary manually from {}",
                crate::constants::DEFAULT_DOWNLOAD_URL
            )),

        KilnError::ElevationUnsupported { .. } => ErrorContext::new(error.clone())
            .with_suggestion("Open an elevated terminal (Run as Administrator) or pass --install-dir with a user-writable directory"),

        KilnError::VerificationFailed { .. } | KilnError::ReplacementFailed { .. } => {
            ErrorContext::new(error.clone())
                .with_details("The previous binary was restored from its backup")
        }

        KilnError::RollbackFailed { backup, .. } => ErrorContext::new(error.clone())
            .with_suggestion(format!("Restore the previous binary manually by copying {backup} over the installed kiln"))
            .with_details("Both the upgrade and the automatic restore failed"),

        _ => ErrorContext::new(error.clone()),
    }
}
