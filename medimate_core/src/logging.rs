//! Tracing setup shared by the medimate binaries.
//!
//! Everything is written to stderr: the CLI prints JSON on stdout and a
//! caller piping it into `jq` must not see log lines mixed in.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the subscriber at `info`
pub fn init() {
    init_with_level("info")
}

/// Install the subscriber with `default_level` as the filter
///
/// `RUST_LOG` takes precedence when set, e.g. `RUST_LOG=medimate_core=debug`
/// to see lock and file activity. Calling this again keeps the first
/// subscriber.
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
