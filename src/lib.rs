//! # LPM01A DAQ Core Library
//!
//! Acquisition and analysis of current-consumption captures from an STM32 LPM01A
//! (PowerShield) power monitor. The library is shared by the `lpm01a-daq` command-line
//! frontend (`main.rs`) and the integration tests.
//!
//! ## Crate Structure
//!
//! - **`adapters`**: [`core::LineTransport`] implementations: the real serial port and a
//!   scripted mock.
//! - **`config`**: Layered configuration (defaults, TOML file, `LPM_DAQ_*` environment) loaded
//!   with `figment`. See `config::Settings`.
//! - **`core`**: The `Sample` record, capture configuration, time windows and the transport and
//!   sink traits.
//! - **`data`**: CSV storage, the analysis engine and the embedded result cache.
//! - **`error`**: The crate-wide `DaqError` enum.
//! - **`hardware`**: The LPM01A protocol driver and telemetry decoder.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`units`**: Unit conversions.
//! - **`validation`**: Helpers for validating configuration values.

pub mod adapters;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod units;
pub mod validation;
