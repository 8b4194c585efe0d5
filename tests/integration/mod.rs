//! Integration test suite for kiln
//!
//! These tests drive the compiled `kiln` binary against a local canned-response
//! release server, so no network access is needed.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **commands**: end-to-end behavior of `kiln upgrade`, `kiln check` and `kiln version`

mod commands;
