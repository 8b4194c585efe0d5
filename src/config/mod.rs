//! Configuration management for kiln.
//!
//! kiln reads a single optional, user-wide TOML file. See [`global`] for its
//! location and format. Command-line flags always override values from the file.

pub mod global;

pub use global::{GlobalConfig, config_dir};
