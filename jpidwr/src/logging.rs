//! Structured logging setup for binaries built on this crate.

use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the level is `info`, or `debug`
/// for this crate when `verbose` is set. Calling this twice is harmless: the
/// second call leaves the first subscriber in place.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "info,jpidwr=debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init();

    if result.is_ok() {
        tracing::debug!(verbose, "Logging initialized");
    }
}
