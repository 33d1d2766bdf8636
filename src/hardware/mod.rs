//! LPM01A (PowerShield) hardware support.
//!
//! - [`telemetry`]: pure decoding of ASCII telemetry lines and host/board clock bookkeeping
//! - [`lpm01a`]: the command/acknowledgement state machine and the capture loop

pub mod lpm01a;
pub mod telemetry;

pub use lpm01a::{CaptureSummary, CommandOutcome, InitReport, LoopExit, Lpm01a, SessionState};
pub use telemetry::{decode_line, ClockReconciler, TelemetryEvent};
