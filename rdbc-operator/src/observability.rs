//! Tracing subscriber setup.

use anyhow::{Context, Result};
use std::fmt as stdfmt;
use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "rdbc_operator=info,rdbc_client=info,kube=info,audit=info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line format.
    #[default]
    Text,
    /// JSON format for structured logging (ELK, Loki).
    Json,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "text" => Self::Text,
            _ => Self::default(),
        })
    }
}

impl stdfmt::Display for LogFormat {
    fn fmt(&self, f: &mut stdfmt::Formatter<'_>) -> stdfmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global tracing subscriber.
///
/// Audit events go through the same subscriber on the `audit` target.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().json().with_target(true).flatten_event(true))
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(fmt::layer().compact().with_target(true))
                .try_init()
                .context("Failed to initialize tracing subscriber")?;
        }
    }
    Ok(())
}
