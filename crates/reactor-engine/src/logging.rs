use reactor_utils::env::LOG_VAR;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs the process-wide subscriber: a fmt layer on stderr filtered by
/// `REACTOR_LOG` (default `info`). `verbose` forces `debug`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_VAR).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Tracing subscriber already installed");
    }
}
