//! Cross-platform utilities for kiln.
//!
//! - [`fs`] - directory creation and atomic file writes
//! - [`platform`] - home directory, artifact naming and path expansion

pub mod fs;
pub mod platform;

pub use fs::{atomic_write, ensure_dir};
pub use platform::{get_home_dir, is_windows, resolve_path};
