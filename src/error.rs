//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate. Using the
//! `thiserror` crate, it provides a centralized way to report the failures that can occur
//! while configuring the power monitor, streaming samples to disk, and analysing a capture.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: figment extraction failures and semantic validation
//!   failures of an otherwise well-formed configuration.
//! - **`Io`** / **`Csv`**: file system and CSV (de)serialisation problems.
//! - **`Serial`**: the serial port could not be opened or driven.
//! - **`UnsupportedMode`**: an acquisition mode other than ASCII was requested.
//! - **`InvalidTransition`**: a driver operation was invoked from the wrong session state.
//! - **`InsufficientData`** / **`ZeroDuration`**: an analysis was requested over a selection
//!   that cannot define an elapsed time.
//! - **`OutOfOrder`**: a capture's host timestamps step backwards.
//! - **`Unacknowledged`**: a managed session gave up because the device ignored a command.
//!
//! Ack timeouts, malformed telemetry lines and cache misses are not errors;
//! they are reported as values (`CommandOutcome`, `TelemetryEvent::Malformed`, `None`).

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("Serial port '{0}' is closed")]
    SerialPortClosed(String),

    #[error("Acquisition mode '{0}' is not supported (only ascii is implemented)")]
    UnsupportedMode(String),

    #[error("Cannot {operation} while session is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: String,
    },

    #[error("Need at least {required} samples, selection has {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Selection spans zero elapsed time ({samples} samples at the same timestamp)")]
    ZeroDuration { samples: usize },

    #[error("Invalid time window: start {start_us} us is after end {end_us} us")]
    InvalidWindow { start_us: u64, end_us: u64 },

    #[error("Sample {index} goes back in time: {current_us} us after {previous_us} us")]
    OutOfOrder {
        index: usize,
        previous_us: u64,
        current_us: u64,
    },

    #[error("Device did not acknowledge: {0}")]
    Unacknowledged(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}
