//! Tracing subscriber initialization.
//!
//! Test binaries call [`init`] at the top of every test; only the first call
//! installs a subscriber, later calls are no-ops. Output goes through the test
//! writer so `cargo test` captures it per test unless `--nocapture` is given.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "infra_tests=info,common=info";

/// Environment variable selecting JSON-formatted logs.
pub const JSON_LOGS_VAR: &str = "HARNESS_JSON_LOGS";

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`; falls back to [`DEFAULT_FILTER`]. Set
/// `HARNESS_JSON_LOGS=true` for one JSON object per event.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var(JSON_LOGS_VAR)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    // try_init fails once a subscriber is installed; that is the idempotent path.
    let _ = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_test_writer(),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init()
    };
}
