//! Logging setup for certrelay binaries.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types::LogFormat;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Logs go to stderr, since
/// stdout carries the relay's outbound messages.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json_layer = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    let pretty_layer = (format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()?;

    info!(level = %level, format = ?format, "Tracing initialized");
    Ok(())
}
