//! Structured logging setup.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable output for development
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()?,
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()?,
    }
    Ok(())
}
