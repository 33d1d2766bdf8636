//! Serial transport for the LPM01A virtual COM port.
//!
//! Wraps the `serialport` crate behind [`LineTransport`]. The port is opened with a short
//! read timeout so that one `receive_line` call is one bounded poll; the driver layers its
//! own deadlines (ack waits) and cancellation checks on top.

use crate::config::SerialConfig;
use crate::core::LineTransport;
use crate::error::{AppResult, DaqError};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

/// Line-oriented serial transport.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    port_name: String,

    /// Baud rate
    baud_rate: u32,

    /// Port-level read timeout, i.e. the length of one poll
    read_poll: Duration,

    /// Line terminator appended to commands
    line_terminator: String,

    /// Byte that ends a response line
    response_delimiter: u8,

    port: Option<Box<dyn SerialPort>>,

    /// Bytes received but not yet returned as a complete line
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Create an unopened transport with default settings
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyACM0", "COM3")
    /// * `baud_rate` - Communication speed
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            read_poll: Duration::from_millis(100),
            line_terminator: "\n".to_string(),
            response_delimiter: b'\n',
            port: None,
            pending: Vec::new(),
        }
    }

    /// Create an unopened transport from the `[serial]` configuration section.
    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(config.port.clone(), config.baud_rate)
            .with_read_poll(config.read_poll())
            .with_line_terminator(config.line_terminator.clone())
    }

    /// Set the port-level read timeout
    pub fn with_read_poll(mut self, read_poll: Duration) -> Self {
        self.read_poll = read_poll;
        self
    }

    /// Set line terminator for commands
    pub fn with_line_terminator(mut self, terminator: String) -> Self {
        self.line_terminator = terminator;
        self
    }

    /// Set response delimiter byte
    pub fn with_response_delimiter(mut self, delimiter: u8) -> Self {
        self.response_delimiter = delimiter;
        self
    }

    /// Open the port. Calling this on an already open transport is a no-op.
    pub fn open(&mut self) -> AppResult<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.read_poll)
            .open()?;

        self.port = Some(port);
        self.pending.clear();
        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(())
    }

    /// Whether the port is currently open.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn take_pending_line(&mut self) -> Option<String> {
        let end = self
            .pending
            .iter()
            .position(|&b| b == self.response_delimiter)?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&raw).trim().to_string())
    }
}

impl LineTransport for SerialTransport {
    fn send_line(&mut self, line: &str) -> AppResult<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| DaqError::SerialPortClosed(self.port_name.clone()))?;

        let payload = format!("{}{}", line, self.line_terminator);
        port.write_all(payload.as_bytes())?;
        port.flush()?;

        debug!("Sent serial command: {}", line);
        Ok(())
    }

    fn receive_line(&mut self) -> AppResult<Option<String>> {
        if let Some(line) = self.take_pending_line() {
            return Ok(Some(line));
        }

        let port = self
            .port
            .as_mut()
            .ok_or_else(|| DaqError::SerialPortClosed(self.port_name.clone()))?;

        let mut buffer = [0u8; 1024];
        match port.read(&mut buffer) {
            Ok(0) => Ok(None),
            Ok(n) => {
                self.pending.extend_from_slice(&buffer[..n]);
                let line = self.take_pending_line();
                if let Some(line) = &line {
                    trace!("Received serial line: {}", line);
                }
                Ok(line)
            }
            // Port timeout is the poll interval; nothing arrived
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> AppResult<()> {
        if self.port.take().is_some() {
            self.pending.clear();
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("SerialTransport({} @ {} baud)", self.port_name, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_transport_creation() {
        let transport = SerialTransport::new("/dev/ttyACM0", 3_864_000);
        assert!(!transport.is_open());
        assert_eq!(transport.port_name, "/dev/ttyACM0");
        assert_eq!(transport.baud_rate, 3_864_000);
    }

    #[test]
    fn test_serial_transport_builder() {
        let transport = SerialTransport::new("/dev/ttyACM0", 9600)
            .with_read_poll(Duration::from_millis(20))
            .with_line_terminator("\r\n".to_string())
            .with_response_delimiter(b'\r');

        assert_eq!(transport.read_poll, Duration::from_millis(20));
        assert_eq!(transport.line_terminator, "\r\n");
        assert_eq!(transport.response_delimiter, b'\r');
    }

    #[test]
    fn test_from_config() {
        let config = SerialConfig {
            port: "COM7".to_string(),
            read_poll_ms: 50,
            ..SerialConfig::default()
        };
        let transport = SerialTransport::from_config(&config);
        assert_eq!(transport.port_name, "COM7");
        assert_eq!(transport.read_poll, Duration::from_millis(50));
        assert!(transport.describe().contains("COM7"));
    }

    #[test]
    fn test_pending_bytes_split_into_lines() {
        let mut transport = SerialTransport::new("/dev/null", 9600);
        transport
            .pending
            .extend_from_slice(b"PowerShield > ack htc\r\n12345-6\r\npartial");

        assert_eq!(
            transport.take_pending_line().as_deref(),
            Some("PowerShield > ack htc")
        );
        assert_eq!(transport.take_pending_line().as_deref(), Some("12345-6"));
        assert_eq!(transport.take_pending_line(), None);
        assert_eq!(transport.pending, b"partial");
    }

    #[test]
    fn test_unopened_port_is_an_error() {
        let mut transport = SerialTransport::new("/dev/ttyACM9", 9600);
        assert!(matches!(
            transport.send_line("htc"),
            Err(DaqError::SerialPortClosed(_))
        ));
        assert!(matches!(
            transport.receive_line(),
            Err(DaqError::SerialPortClosed(_))
        ));
        // Closing an unopened port is fine
        assert!(transport.close().is_ok());
        assert!(transport.close().is_ok());
    }
}
