//! Logging setup
//!
//! All diagnostics go to stderr through `tracing-subscriber`, so stdout stays reserved for
//! capture summaries and analysis reports. `RUST_LOG` overrides the configured level.
//!
//! # Example
//! ```no_run
//! use lpm01a_daq::{config::Settings, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! logging::init_from_settings(&settings)?;
//! info!("Application started");
//! # Ok(())
//! # }
//! ```

use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Line format of log output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, coloured; for watching a capture interactively
    Pretty,
    /// One line per event, no colours
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = DaqError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(DaqError::Configuration(format!(
                "Invalid log_format '{s}'. Must be one of: pretty, compact, json"
            ))),
        }
    }
}

/// Level and format of the subscriber installed by [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: LogFormat,
}

impl LogOptions {
    /// Read `log_level` and `log_format` from the `[application]` section.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        let level = settings
            .application
            .log_level
            .parse::<Level>()
            .map_err(|_| {
                DaqError::Configuration(format!(
                    "Invalid log_level '{}'. Must be one of: trace, debug, info, warn, error",
                    settings.application.log_level
                ))
            })?;
        Ok(Self {
            level,
            format: settings.application.log_format.parse()?,
        })
    }
}

/// Install the global subscriber described by `settings`.
pub fn init_from_settings(settings: &Settings) -> AppResult<()> {
    init(LogOptions::from_settings(settings)?);
    Ok(())
}

/// Install the global subscriber. A subscriber that is already installed is kept.
pub fn init(options: LogOptions) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(options.level).into())
        .from_env_lossy();

    let layer = match options.format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    };

    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        tracing::debug!("Global subscriber already set; keeping it");
    }
}
