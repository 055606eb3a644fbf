use std::sync::Once;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Filter used by tests when `RUST_LOG` is not set.
const DEFAULT_TEST_FILTER: &str = "mirror=debug,info";

static TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to install the global tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Installs the global subscriber of a service.
///
/// Logs are written to stdout with the filter taken from `RUST_LOG`, falling back to `info`.
/// Records emitted through the `log` crate by dependencies are forwarded as well.
pub fn init_tracing(service_name: &str) -> Result<(), TracingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()?;

    tracing::info!(service = service_name, "tracing initialized");

    Ok(())
}

/// Installs a test subscriber once per process.
///
/// Output goes through the test writer, so it is only shown for failing tests or with
/// `--nocapture`. Calling it again is a no-op.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_TEST_FILTER.into());

        // Another subscriber may already be installed by the test harness.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_can_be_initialized_repeatedly() {
        init_test_tracing();
        init_test_tracing();

        tracing::debug!("still usable after repeated initialization");
    }
}
