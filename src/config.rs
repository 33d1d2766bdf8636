//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/default.toml` unless another path is given)
//! 2. Environment variables (prefixed with `LPM_DAQ_`, nested keys separated by `__`)
//!
//! Every field has a default, so a missing file still produces a usable configuration.
//!
//! # Example
//! ```no_run
//! use lpm01a_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Port: {}", settings.serial.port);
//! # Ok::<(), lpm01a_daq::error::DaqError>(())
//! ```

use crate::core::{AcquisitionMode, CaptureConfig};
use crate::error::{AppResult, DaqError};
use crate::validation;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial link settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Capture defaults
    #[serde(default)]
    pub capture: CaptureSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port path (e.g. "/dev/ttyACM0", "COM3")
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// How long to wait for each command acknowledgement
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Port-level read timeout; one `receive_line` poll lasts at most this long
    #[serde(default = "default_read_poll_ms")]
    pub read_poll_ms: u64,
    /// Terminator appended to every command
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
}

/// Capture defaults, overridable from the command line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Telemetry mode; only "ascii" is implemented
    #[serde(default)]
    pub mode: AcquisitionMode,
    /// Supply voltage in mV
    #[serde(default = "default_voltage_mv")]
    pub voltage_mv: u32,
    /// Sampling frequency in Hz
    #[serde(default = "default_frequency_hz")]
    pub frequency_hz: u32,
    /// Acquisition time in seconds (0 = until stopped)
    #[serde(default)]
    pub duration_s: u32,
    /// Directory for capture files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_port() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_baud_rate() -> u32 {
    3_864_000
}

fn default_ack_timeout_ms() -> u64 {
    5000
}

fn default_read_poll_ms() -> u64 {
    100
}

fn default_line_terminator() -> String {
    "\n".to_string()
}

fn default_voltage_mv() -> u32 {
    3300
}

fn default_frequency_hz() -> u32 {
    5000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            ack_timeout_ms: default_ack_timeout_ms(),
            read_poll_ms: default_read_poll_ms(),
            line_terminator: default_line_terminator(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Ascii,
            voltage_mv: default_voltage_mv(),
            frequency_hz: default_frequency_hz(),
            duration_s: 0,
            output_dir: default_output_dir(),
        }
    }
}

impl SerialConfig {
    /// Ack wait as a `Duration`.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Read poll interval as a `Duration`.
    pub fn read_poll(&self) -> Duration {
        Duration::from_millis(self.read_poll_ms)
    }
}

impl CaptureSettings {
    /// The device configuration these settings describe.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            mode: self.mode,
            voltage_mv: self.voltage_mv,
            frequency_hz: self.frequency_hz,
            duration_s: self.duration_s,
        }
    }
}

impl Settings {
    /// Load configuration from `config/default.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `LPM_DAQ_`.
    /// Example: `LPM_DAQ_SERIAL__PORT=/dev/ttyACM1`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LPM_DAQ_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |field: &str, reason: &str| {
            DaqError::Configuration(format!("{field}: {reason}"))
        };

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        validation::is_not_empty(&self.serial.port).map_err(|e| invalid("serial.port", e))?;
        if self.serial.baud_rate == 0 {
            return Err(invalid("serial.baud_rate", "must be greater than 0"));
        }
        if self.serial.ack_timeout_ms == 0 {
            return Err(invalid("serial.ack_timeout_ms", "must be greater than 0"));
        }
        if self.serial.read_poll_ms == 0 {
            return Err(invalid("serial.read_poll_ms", "must be greater than 0"));
        }

        validation::is_valid_voltage_mv(self.capture.voltage_mv)
            .map_err(|e| invalid("capture.voltage_mv", e))?;
        validation::is_valid_frequency_hz(self.capture.frequency_hz)
            .map_err(|e| invalid("capture.frequency_hz", e))?;
        validation::is_valid_path(&self.capture.output_dir.to_string_lossy())
            .map_err(|e| invalid("capture.output_dir", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.serial.baud_rate, 3_864_000);
        assert_eq!(settings.serial.ack_timeout(), Duration::from_secs(5));
        assert_eq!(settings.capture.capture_config(), CaptureConfig::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[serial]
port = "/dev/ttyACM3"

[capture]
voltage_mv = 1800
frequency_hz = 100
duration_s = 10
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.serial.port, "/dev/ttyACM3");
        assert_eq!(settings.serial.baud_rate, 3_864_000);
        assert_eq!(settings.capture.voltage_mv, 1800);
        assert_eq!(settings.capture.frequency_hz, 100);
        assert_eq!(settings.capture.duration_s, 10);
        assert_eq!(settings.application.log_level, "info");
    }

    #[test]
    fn test_default_config_file_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let settings = Settings::load_from(path).unwrap();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "invalid".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_capture_values() {
        let mut settings = Settings::default();
        settings.capture.voltage_mv = 5000;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.capture.frequency_hz = 4321;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.serial.port = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_roundtrip_through_toml() {
        let settings = Settings::default();
        let text = toml::to_string(&settings).unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
