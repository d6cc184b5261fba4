//! Structured logging setup using tracing.

use std::io;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize logging to stderr.
///
/// `RUST_LOG` takes precedence. Otherwise everything logs at `info`, and
/// this crate at `debug` when `verbose` is set: received queries, chosen
/// answers and upstream health changes.
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{}={}", env!("CARGO_CRATE_NAME"), level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}
