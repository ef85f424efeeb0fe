//! Log output for tests
//!
//! Tests run with `RUST_LOG=session=debug cargo test -- --nocapture` to see the
//! cache, resolver and lifecycle logs.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install an `EnvFilter` + fmt subscriber writing to the test output.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
