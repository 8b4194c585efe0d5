//! Test utilities for kiln
//!
//! Available to unit tests and, through the `test-utils` feature, to the
//! integration suite:
//!
//! - [`fixtures`] - fake kiln executables and release mocks for an
//!   [`httpmock::MockServer`]
//! - [`init_test_logging`] - once-only tracing setup that writes through the test harness
//!
//! # Example
//!
//! ```rust,no_run
//! use httpmock::MockServer;
//! use kiln_cli::test_utils::fixtures;
//!
//! # async fn example() {
//! let server = MockServer::start_async().await;
//! let release =
//!     fixtures::publish_release(&server, "v1.2.0", fixtures::fake_kiln_script("1.2.0").as_bytes())
//!         .await;
//! assert_eq!(release.latest.hits_async().await, 0);
//! # }
//! ```

pub mod fixtures;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Respects `RUST_LOG` when `level` is `None`; does nothing if neither is given.
///
/// ```bash
/// RUST_LOG=kiln_cli=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
