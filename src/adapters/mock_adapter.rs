//! Mock transport for testing
//!
//! Simulates the LPM01A side of the serial link without hardware:
//! - Scripted replies triggered by specific commands
//! - A preloaded stream of telemetry lines
//! - A call log of every command sent, for test verification
//! - Optional cancellation once the scripted stream runs dry

use crate::core::LineTransport;
use crate::error::{AppResult, DaqError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    sent: Vec<String>,
    replies: HashMap<String, Vec<String>>,
    incoming: VecDeque<String>,
    close_calls: usize,
    closed: bool,
}

/// Scripted in-memory transport
///
/// # Example
///
/// ```
/// use lpm01a_daq::adapters::MockTransport;
/// use lpm01a_daq::core::LineTransport;
///
/// let mut transport = MockTransport::new().acknowledging(&["htc"]);
/// transport.send_line("htc").unwrap();
/// assert_eq!(
///     transport.receive_line().unwrap().as_deref(),
///     Some("PowerShield > ack htc")
/// );
/// ```
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    poll_interval: Duration,
    cancel_when_drained: Option<Arc<AtomicBool>>,
}

/// Inspection handle that stays valid after the transport has been moved into a driver.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a silent mock transport
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            poll_interval: Duration::from_millis(1),
            cancel_when_drained: None,
        }
    }

    /// Queue `lines` every time `command` is sent
    pub fn reply_to(self, command: &str, lines: &[&str]) -> Self {
        self.lock().replies.insert(
            command.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    /// Reply to each command with the device's standard `PowerShield > ack <command>` line
    pub fn acknowledging(self, commands: &[&str]) -> Self {
        commands.iter().fold(self, |mock, command| {
            let ack = format!("PowerShield > ack {command}");
            mock.reply_to(command, &[ack.as_str()])
        })
    }

    /// Preload lines that arrive regardless of what is sent
    pub fn with_lines(self, lines: &[&str]) -> Self {
        self.lock()
            .incoming
            .extend(lines.iter().map(|l| l.to_string()));
        self
    }

    /// Simulated length of an empty poll
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Raise `flag` the first time a poll finds no pending line
    pub fn cancel_when_drained(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_when_drained = Some(flag);
        self
    }

    /// Get an inspection handle
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Commands sent so far, in order
    pub fn sent_commands(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Whether `close` has been called at least once
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of `close` calls
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    /// Inject a line as if the device had just sent it
    pub fn push_line(&self, line: &str) {
        self.lock().incoming.push_back(line.to_string());
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LineTransport for MockTransport {
    fn send_line(&mut self, line: &str) -> AppResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(DaqError::SerialPortClosed("mock".to_string()));
        }
        state.sent.push(line.to_string());
        if let Some(replies) = state.replies.get(line).cloned() {
            state.incoming.extend(replies);
        }
        Ok(())
    }

    fn receive_line(&mut self) -> AppResult<Option<String>> {
        let next = {
            let mut state = self.lock();
            if state.closed {
                return Err(DaqError::SerialPortClosed("mock".to_string()));
            }
            state.incoming.pop_front()
        };

        if next.is_none() {
            if let Some(flag) = &self.cancel_when_drained {
                flag.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(self.poll_interval);
        }
        Ok(next)
    }

    fn close(&mut self) -> AppResult<()> {
        let mut state = self.lock();
        state.close_calls += 1;
        state.closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("MockTransport (poll: {:?})", self.poll_interval)
    }
}
