//! Core data model and collaborator traits.
//!
//! The acquisition driver talks to the outside world through exactly two seams:
//! a [`LineTransport`] (the serial link to the power monitor) and a [`SampleSink`]
//! (where decoded samples go). Everything the analysis engine consumes is a
//! sequence of [`Sample`]s.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One decoded current reading.
///
/// Field renames define the canonical on-disk CSV schema:
/// `Current (uA),rx timestamp (us),board timestamp (ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Current in microamps, rounded to the nearest integer.
    #[serde(rename = "Current (uA)")]
    pub current_ua: i64,
    /// Host-side elapsed time since capture start, in microseconds.
    #[serde(rename = "rx timestamp (us)")]
    pub host_timestamp_us: u64,
    /// Latest elapsed time self-reported by the board, in milliseconds.
    #[serde(rename = "board timestamp (ms)")]
    pub board_timestamp_ms: u64,
}

impl Sample {
    /// Build a sample from its three columns.
    pub fn new(host_timestamp_us: u64, board_timestamp_ms: u64, current_ua: i64) -> Self {
        Self {
            current_ua,
            host_timestamp_us,
            board_timestamp_ms,
        }
    }
}

/// Telemetry encoding requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// `format ascii_dec`: one `<mantissa><sign><exponent>` line per reading.
    #[default]
    Ascii,
    /// `format bin_hexa`. Recognised so it can be rejected explicitly.
    Binary,
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::Ascii => write!(f, "ascii"),
            AcquisitionMode::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for AcquisitionMode {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ascii" => Ok(AcquisitionMode::Ascii),
            "binary" | "bin" => Ok(AcquisitionMode::Binary),
            other => Err(DaqError::UnsupportedMode(other.to_string())),
        }
    }
}

/// Device configuration for one capture session. Immutable once the session is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Telemetry encoding.
    pub mode: AcquisitionMode,
    /// Supply voltage in millivolts.
    pub voltage_mv: u32,
    /// Sampling frequency in hertz.
    pub frequency_hz: u32,
    /// Acquisition duration in seconds; 0 means unbounded.
    pub duration_s: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Ascii,
            voltage_mv: 3300,
            frequency_hz: 5000,
            duration_s: 0,
        }
    }
}

/// Inclusive host-timestamp range in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    start_us: u64,
    end_us: u64,
}

impl TimeWindow {
    /// Create a window, rejecting `start_us > end_us`.
    pub fn new(start_us: u64, end_us: u64) -> AppResult<Self> {
        if start_us > end_us {
            return Err(DaqError::InvalidWindow { start_us, end_us });
        }
        Ok(Self { start_us, end_us })
    }

    /// The full representable range. Only computations over this window are cacheable.
    pub const fn full() -> Self {
        Self {
            start_us: 0,
            end_us: u64::MAX,
        }
    }

    /// Window built from optional CLI bounds; missing bounds fall back to the full range.
    pub fn from_bounds(start_us: Option<u64>, end_us: Option<u64>) -> AppResult<Self> {
        Self::new(start_us.unwrap_or(0), end_us.unwrap_or(u64::MAX))
    }

    /// Inclusive lower bound.
    pub fn start_us(&self) -> u64 {
        self.start_us
    }

    /// Inclusive upper bound.
    pub fn end_us(&self) -> u64 {
        self.end_us
    }

    /// Whether `timestamp_us` lies inside the window.
    pub fn contains(&self, timestamp_us: u64) -> bool {
        (self.start_us..=self.end_us).contains(&timestamp_us)
    }

    /// True when the window covers the whole representable range.
    pub fn is_full(&self) -> bool {
        *self == Self::full()
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::full()
    }
}

/// Line-oriented byte transport to the instrument.
///
/// `receive_line` performs a single poll: `Ok(None)` means no complete line arrived
/// within the transport's poll interval. Deadlines belong to the caller.
pub trait LineTransport: Send {
    /// Send one command line; the transport appends its terminator.
    fn send_line(&mut self, line: &str) -> AppResult<()>;

    /// Poll for one complete line, without its terminator.
    fn receive_line(&mut self) -> AppResult<Option<String>>;

    /// Release the underlying port. Must be safe to call more than once.
    fn close(&mut self) -> AppResult<()>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Destination for decoded samples.
pub trait SampleSink: Send {
    /// Append one sample.
    fn write_sample(&mut self, sample: &Sample) -> AppResult<()>;

    /// Flush and release. Must be safe to call more than once.
    fn close(&mut self) -> AppResult<()>;
}
