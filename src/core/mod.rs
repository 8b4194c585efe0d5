//! Core types shared across kiln.
//!
//! ## `error` - Error Handling
//!
//! - [`KilnError`] - Enumerated error types covering every upgrade failure class
//! - [`ErrorContext`] - User-friendly error wrapper with suggestions and details
//! - [`user_friendly_error`] - Convert any error to the user-friendly format
//!
//! Library code returns `anyhow::Result` and raises [`KilnError`] where the failure
//! class matters to callers; the CLI converts whatever bubbles up with
//! [`user_friendly_error`] right before exiting.

pub mod error;

pub use error::{ErrorContext, KilnError, user_friendly_error};
