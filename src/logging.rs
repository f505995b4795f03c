//! Logging setup using tracing.
//!
//! Events go to stderr; filtering follows `RUST_LOG` when it is set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `default_filter` applies when `RUST_LOG` is unset or unparsable, e.g.
/// `"info"` for the server or `"warn"` for the client.
///
/// # Errors
/// Returns an error if a subscriber has already been installed.
pub fn init(default_filter: &str) -> Result<(), crate::Error> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .map_err(|err| format!("failed to initialize tracing: {}", err))?;

    Ok(())
}

/// For tests: install once, ignore later calls.
pub fn init_test() {
    let _ = init("debug");
}
