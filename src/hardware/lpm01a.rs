//! STM32 LPM01A (PowerShield) Power Monitor Driver
//!
//! Protocol Overview:
//! - Format: ASCII command lines, echoed back as `PowerShield > ack <command>`
//! - Baud: 3 864 000 (USB virtual COM port)
//! - Configuration: `htc`, `format ascii_dec`, `volt <mV>m`, `freq <Hz>`, `acqtime <s>`
//! - Capture: `start` ... telemetry stream ... `stop` (answered by
//!   `PowerShield > Acquisition completed`), then `hrc` to hand control back
//!
//! # Session lifecycle
//!
//! ```text
//! Uninitialized --init--> Configured --start--> Capturing --stop--> Stopped --close--> Closed
//! ```
//!
//! `close` is valid from every state and idempotent; dropping the driver closes it too.
//!
//! # Example Usage
//!
//! ```no_run
//! use lpm01a_daq::adapters::SerialTransport;
//! use lpm01a_daq::core::CaptureConfig;
//! use lpm01a_daq::data::storage::CsvSampleWriter;
//! use lpm01a_daq::hardware::Lpm01a;
//! use std::sync::atomic::AtomicBool;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut transport = SerialTransport::new("/dev/ttyACM0", 3_864_000);
//!     transport.open()?;
//!     let sink = CsvSampleWriter::create("capture.csv")?;
//!
//!     let mut meter = Lpm01a::new(transport, sink);
//!     let cancel = AtomicBool::new(false);
//!     let summary = meter.run_session(CaptureConfig::default(), &cancel)?;
//!     println!("{} samples", summary.samples);
//!     Ok(())
//! }
//! ```

use crate::core::{AcquisitionMode, CaptureConfig, LineTransport, SampleSink};
use crate::error::{AppResult, DaqError};
use crate::hardware::telemetry::{decode_line, ClockReconciler, TelemetryEvent};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Prefix of every command acknowledgement.
pub const ACK_PREFIX: &str = "PowerShield > ack ";

/// Prefix shared by all device status messages.
pub const DEVICE_PREFIX: &str = "PowerShield >";

/// Line the device sends once an acquisition has ended.
pub const ACQUISITION_COMPLETED: &str = "PowerShield > Acquisition completed";

/// Default wait for each acknowledgement.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Capture session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Port open, device not yet configured.
    Uninitialized,
    /// Configuration acknowledged.
    Configured,
    /// Acquisition running.
    Capturing,
    /// Acquisition stopped and control handed back to the device.
    Stopped,
    /// Transport and sink released.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Whether one command got its expected response in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Command as sent.
    pub command: String,
    /// True when the expected response arrived before the timeout.
    pub acknowledged: bool,
}

/// Per-command results of `init`, in the order sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// One entry per configuration command.
    pub outcomes: Vec<CommandOutcome>,
}

impl InitReport {
    /// True when every configuration command was acknowledged.
    pub fn all_acknowledged(&self) -> bool {
        self.outcomes.iter().all(|o| o.acknowledged)
    }

    /// Commands whose acknowledgement never arrived.
    pub fn failed_commands(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.acknowledged)
            .map(|o| o.command.as_str())
            .collect()
    }
}

/// Why the capture loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The cancellation flag was raised.
    Cancelled,
    /// The device reported the end of a bounded acquisition.
    AcquisitionCompleted,
}

/// Counters from one run of the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Samples written to the sink during this run.
    pub samples: u64,
    /// Lines that could not be decoded.
    pub malformed: u64,
    /// Why the loop ended.
    pub exit: LoopExit,
}

/// Driver for one LPM01A on one transport, writing to one sink.
pub struct Lpm01a<T: LineTransport, S: SampleSink> {
    transport: T,
    sink: S,
    state: SessionState,
    config: Option<CaptureConfig>,
    ack_timeout: Duration,
    clock: ClockReconciler,
    samples_captured: u64,
    acquisition_completed: bool,
}

impl<T: LineTransport, S: SampleSink> Lpm01a<T, S> {
    /// Take ownership of an open transport and a ready sink.
    pub fn new(transport: T, sink: S) -> Self {
        Self {
            transport,
            sink,
            state: SessionState::Uninitialized,
            config: None,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            clock: ClockReconciler::default(),
            samples_captured: 0,
            acquisition_completed: false,
        }
    }

    /// Override the per-command acknowledgement timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration accepted by `init`, once configured.
    pub fn config(&self) -> Option<&CaptureConfig> {
        self.config.as_ref()
    }

    /// Samples written since the last `start`.
    pub fn samples_captured(&self) -> u64 {
        self.samples_captured
    }

    fn require(&self, expected: SessionState, operation: &'static str) -> AppResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DaqError::InvalidTransition {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    /// Send `command` and wait for its response.
    ///
    /// With `expected_response = None` the response is the standard acknowledgement
    /// `PowerShield > ack <command>`. Unrelated lines are skipped. Returns `Ok(false)` if the
    /// response does not arrive within the ack timeout; transport failures are errors.
    pub fn send_command_wait_for_response(
        &mut self,
        command: &str,
        expected_response: Option<&str>,
    ) -> AppResult<bool> {
        let expected = match expected_response {
            Some(literal) => literal.to_string(),
            None => format!("{ACK_PREFIX}{command}"),
        };

        let deadline = Instant::now() + self.ack_timeout;
        self.transport.send_line(command)?;

        while Instant::now() < deadline {
            let Some(line) = self.transport.receive_line()? else {
                continue;
            };
            if line == expected {
                debug!("'{}' acknowledged", command);
                return Ok(true);
            }
            if line == ACQUISITION_COMPLETED {
                self.acquisition_completed = true;
            }
            trace!("Skipping '{}' while waiting for '{}'", line, expected);
        }

        warn!(
            "No '{}' within {:?} after sending '{}'",
            expected, self.ack_timeout, command
        );
        Ok(false)
    }

    fn command_outcome(&mut self, command: String) -> AppResult<CommandOutcome> {
        let acknowledged = self.send_command_wait_for_response(&command, None)?;
        Ok(CommandOutcome {
            command,
            acknowledged,
        })
    }

    /// Configure the device.
    ///
    /// Sends `htc`, `format ascii_dec`, `volt`, `freq` and `acqtime` in order. A missing
    /// acknowledgement does not abort the sequence; it is reported in the returned
    /// [`InitReport`]. The session becomes `Configured` only if every command was
    /// acknowledged.
    pub fn init(&mut self, config: CaptureConfig) -> AppResult<InitReport> {
        self.require(SessionState::Uninitialized, "init")?;
        if config.mode != AcquisitionMode::Ascii {
            return Err(DaqError::UnsupportedMode(config.mode.to_string()));
        }

        info!(
            "Configuring LPM01A on {}: {} mV, {} Hz, {} s",
            self.transport.describe(),
            config.voltage_mv,
            config.frequency_hz,
            config.duration_s
        );

        let commands = [
            "htc".to_string(),
            "format ascii_dec".to_string(),
            format!("volt {}m", config.voltage_mv),
            format!("freq {}", config.frequency_hz),
            format!("acqtime {}", config.duration_s),
        ];

        let mut report = InitReport::default();
        for command in commands {
            report.outcomes.push(self.command_outcome(command)?);
        }

        if report.all_acknowledged() {
            self.config = Some(config);
            self.state = SessionState::Configured;
            info!("LPM01A configured");
        } else {
            warn!(
                "LPM01A configuration incomplete, unacknowledged: {}",
                report.failed_commands().join(", ")
            );
        }
        Ok(report)
    }

    /// Start the acquisition. The session becomes `Capturing` once `start` is acknowledged.
    pub fn start(&mut self) -> AppResult<CommandOutcome> {
        self.require(SessionState::Configured, "start")?;

        let outcome = self.command_outcome("start".to_string())?;
        if outcome.acknowledged {
            self.clock.restart(Instant::now());
            self.samples_captured = 0;
            self.acquisition_completed = false;
            self.state = SessionState::Capturing;
            info!("Acquisition started");
        }
        Ok(outcome)
    }

    /// Stop the acquisition and return control of the device.
    ///
    /// `stop` is answered by the literal completion line rather than an ack; if the capture
    /// loop already saw that line, it is not awaited again. `hrc` follows with a normal ack.
    /// The session becomes `Stopped` regardless of the outcomes.
    pub fn stop(&mut self) -> AppResult<Vec<CommandOutcome>> {
        self.require(SessionState::Capturing, "stop")?;

        let stopped = if self.acquisition_completed {
            self.transport.send_line("stop")?;
            true
        } else {
            self.send_command_wait_for_response("stop", Some(ACQUISITION_COMPLETED))?
        };
        let outcomes = vec![
            CommandOutcome {
                command: "stop".to_string(),
                acknowledged: stopped,
            },
            self.command_outcome("hrc".to_string())?,
        ];

        self.state = SessionState::Stopped;
        info!(
            "Acquisition stopped after {} samples",
            self.samples_captured
        );
        Ok(outcomes)
    }

    /// Release the sink and the transport. Safe from any state and safe to repeat.
    pub fn close(&mut self) -> AppResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        let sink_result = self.sink.close();
        if let Err(e) = &sink_result {
            warn!("Failed to close sample sink: {}", e);
        }
        let transport_result = self.transport.close();
        if let Err(e) = &transport_result {
            warn!("Failed to close {}: {}", self.transport.describe(), e);
        }

        self.state = SessionState::Closed;
        debug!("Session closed");
        sink_result.and(transport_result)
    }

    /// Stream telemetry into the sink until `cancel` is raised or the device reports that
    /// the acquisition has completed.
    ///
    /// Malformed lines are logged and skipped. Transport and sink failures end the loop with
    /// an error; the session stays `Capturing` so the caller can still `stop` and `close`.
    pub fn run_capture_loop(&mut self, cancel: &AtomicBool) -> AppResult<CaptureSummary> {
        self.require(SessionState::Capturing, "run the capture loop")?;

        let first_sample = self.samples_captured;
        let mut malformed = 0u64;

        let exit = loop {
            if cancel.load(Ordering::SeqCst) {
                break LoopExit::Cancelled;
            }
            let Some(line) = self.transport.receive_line()? else {
                continue;
            };
            if line.is_empty() {
                continue;
            }
            if line == ACQUISITION_COMPLETED {
                self.acquisition_completed = true;
                info!("Device reported acquisition completed");
                break LoopExit::AcquisitionCompleted;
            }
            if line.starts_with(DEVICE_PREFIX) {
                debug!("Device message: {}", line);
                continue;
            }

            match decode_line(&line) {
                TelemetryEvent::TimeStamp {
                    seconds,
                    milliseconds,
                } => {
                    self.clock.observe_board_time(seconds, milliseconds);
                    info!(
                        "{}. Num of received values: {}",
                        line, self.samples_captured
                    );
                }
                TelemetryEvent::Sample { current_ua } => {
                    let sample = self.clock.stamp(current_ua, Instant::now());
                    self.sink.write_sample(&sample)?;
                    self.samples_captured += 1;
                }
                TelemetryEvent::Malformed(reason) => {
                    malformed += 1;
                    warn!("Error parsing data: {}", reason);
                }
            }
        };

        Ok(CaptureSummary {
            samples: self.samples_captured - first_sample,
            malformed,
            exit,
        })
    }

    /// Run a complete capture: configure, start, stream until `cancel` is raised or the
    /// device completes, then stop and close.
    ///
    /// The device is stopped whenever the acquisition was started, and the session is always
    /// closed, including when configuration or streaming fails. If `cancel` is already raised
    /// once configuration finishes, `start` is never sent.
    pub fn run_session(
        &mut self,
        config: CaptureConfig,
        cancel: &AtomicBool,
    ) -> AppResult<CaptureSummary> {
        let result = self.drive_session(config, cancel);

        if self.state == SessionState::Capturing {
            if let Err(e) = self.stop() {
                warn!("Failed to stop acquisition: {}", e);
            }
        }
        let closed = self.close();

        let summary = result?;
        closed?;
        Ok(summary)
    }

    fn drive_session(
        &mut self,
        config: CaptureConfig,
        cancel: &AtomicBool,
    ) -> AppResult<CaptureSummary> {
        let report = self.init(config)?;
        if !report.all_acknowledged() {
            return Err(DaqError::Unacknowledged(report.failed_commands().join(", ")));
        }

        if cancel.load(Ordering::SeqCst) {
            info!("Cancelled before the acquisition started");
            return Ok(CaptureSummary {
                samples: 0,
                malformed: 0,
                exit: LoopExit::Cancelled,
            });
        }
        if !self.start()?.acknowledged {
            return Err(DaqError::Unacknowledged("start".to_string()));
        }

        let summary = self.run_capture_loop(cancel)?;

        for outcome in self.stop()? {
            if !outcome.acknowledged {
                warn!("Device did not acknowledge '{}'", outcome.command);
            }
        }
        Ok(summary)
    }
}

impl<T: LineTransport, S: SampleSink> Drop for Lpm01a<T, S> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            let _ = self.close();
        }
    }
}
