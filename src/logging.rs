//! Diagnostic logging for the `bundles` binary

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber.
///
/// The default level is `warn`, raised to `debug` with `verbose`. `RUST_LOG`
/// overrides both. Calling this twice is harmless.
pub fn init(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };

    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
