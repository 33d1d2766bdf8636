//! LPM01A ASCII telemetry decoding and clock bookkeeping.
//!
//! Protocol Overview (`format ascii_dec`):
//! - Current readings: `<mantissa><sign><exponent>`, e.g. `12345-6` = 12345e-6 A
//! - Board time: `TimeStamp: <s>s <ms>ms, ...`, interleaved with the readings
//!
//! Decoding is a pure function returning a [`TelemetryEvent`]; the caller decides what to
//! log and whether to continue.

use crate::core::Sample;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;

static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"TimeStamp: (\d+)s (\d+)ms").expect("Invalid timestamp regex"));

/// Marker that identifies a board timestamp line.
pub const TIMESTAMP_MARKER: &str = "TimeStamp:";

/// Exponents beyond this cannot describe a physical current and would overflow.
const MAX_EXPONENT: u32 = 30;

/// Result of decoding one telemetry line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// Board-reported elapsed time.
    TimeStamp {
        /// Whole seconds.
        seconds: u64,
        /// Milliseconds within the second.
        milliseconds: u64,
    },
    /// One current reading.
    Sample {
        /// Current in microamps, rounded to the nearest integer.
        current_ua: i64,
    },
    /// The line could not be decoded.
    Malformed(String),
}

/// Decode one raw telemetry line.
pub fn decode_line(line: &str) -> TelemetryEvent {
    let line = line.trim();
    if line.contains(TIMESTAMP_MARKER) {
        decode_timestamp(line)
    } else {
        decode_current(line)
    }
}

fn decode_timestamp(line: &str) -> TelemetryEvent {
    let head = line.split(',').next().unwrap_or(line);
    let parsed = TIMESTAMP_RE.captures(head).and_then(|caps| {
        let seconds = caps[1].parse::<u64>().ok()?;
        let milliseconds = caps[2].parse::<u64>().ok()?;
        Some(TelemetryEvent::TimeStamp {
            seconds,
            milliseconds,
        })
    });
    parsed.unwrap_or_else(|| TelemetryEvent::Malformed(format!("unparsable timestamp '{line}'")))
}

fn decode_current(line: &str) -> TelemetryEvent {
    let Some(sign_at) = line.find(|c| c == '-' || c == '+') else {
        return TelemetryEvent::Malformed(format!("no exponent sign in '{line}'"));
    };
    let (mantissa_text, rest) = line.split_at(sign_at);
    let negative = rest.starts_with('-');
    let exponent_text = &rest[1..];

    let Some(mantissa) = parse_mantissa(mantissa_text) else {
        return TelemetryEvent::Malformed(format!("bad mantissa '{mantissa_text}' in '{line}'"));
    };
    let exponent = match exponent_text.parse::<u32>() {
        Ok(e) if e <= MAX_EXPONENT => e as i32,
        _ => {
            return TelemetryEvent::Malformed(format!(
                "bad exponent '{exponent_text}' in '{line}'"
            ))
        }
    };

    // A -> uA folded into the power of ten so exact inputs stay exact
    let power = if negative { -exponent } else { exponent } + 6;
    let current_ua = (mantissa as f64 * 10f64.powi(power)).round();
    if !current_ua.is_finite() || current_ua.abs() > i64::MAX as f64 {
        return TelemetryEvent::Malformed(format!("current out of range in '{line}'"));
    }

    TelemetryEvent::Sample {
        current_ua: current_ua as i64,
    }
}

/// Some encodings prefix the mantissa with two stray characters.
fn parse_mantissa(text: &str) -> Option<i64> {
    text.parse::<i64>().ok().or_else(|| {
        let mut rest = text.chars();
        rest.next()?;
        rest.next()?;
        rest.as_str().parse::<i64>().ok()
    })
}

/// Tracks the two independent clocks attached to every sample.
///
/// The host clock is a monotonic offset from capture start; the board clock is whatever the
/// device last reported. They are recorded side by side and never merged.
#[derive(Debug, Clone)]
pub struct ClockReconciler {
    capture_start: Instant,
    board_timestamp_ms: u64,
}

impl ClockReconciler {
    /// Start both clocks at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            capture_start: now,
            board_timestamp_ms: 0,
        }
    }

    /// Restart for a new capture.
    pub fn restart(&mut self, now: Instant) {
        self.capture_start = now;
        self.board_timestamp_ms = 0;
    }

    /// Record a board `TimeStamp` event.
    pub fn observe_board_time(&mut self, seconds: u64, milliseconds: u64) {
        self.board_timestamp_ms = seconds.saturating_mul(1000).saturating_add(milliseconds);
    }

    /// Latest board time in milliseconds.
    pub fn board_timestamp_ms(&self) -> u64 {
        self.board_timestamp_ms
    }

    /// Host time elapsed since capture start, in microseconds.
    pub fn host_elapsed_us(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.capture_start);
        u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
    }

    /// Stamp a reading received at `now` with both clocks.
    pub fn stamp(&self, current_ua: i64, now: Instant) -> Sample {
        Sample::new(self.host_elapsed_us(now), self.board_timestamp_ms, current_ua)
    }
}

impl Default for ClockReconciler {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Device-style encoding of a microamp value: mantissa in uA, exponent 6.
    fn encode_current(current_ua: i64) -> String {
        format!("{current_ua}-6")
    }

    fn current(line: &str) -> i64 {
        match decode_line(line) {
            TelemetryEvent::Sample { current_ua } => current_ua,
            other => panic!("expected a sample for '{line}', got {other:?}"),
        }
    }

    #[test]
    fn decodes_negative_exponent() {
        assert_eq!(current("12345-6"), 12345);
        assert_eq!(current("5009-07"), 501);
        assert_eq!(current("1-3"), 1000);
    }

    #[test]
    fn decodes_positive_exponent() {
        assert_eq!(current("3+0"), 3_000_000);
        assert_eq!(current("2+1"), 20_000_000);
    }

    #[test]
    fn encoded_values_roundtrip() {
        for ua in [0, 1, 7, 999, 12_345, 250_000, 1_000_000] {
            assert_eq!(current(&encode_current(ua)), ua);
        }
    }

    #[test]
    fn strips_two_character_prefix() {
        assert_eq!(current("xx1234-3"), 1_234_000);
        assert_eq!(current("\u{1}\u{2}12345-6"), 12345);
    }

    #[test]
    fn strips_multibyte_prefix() {
        // Lossy UTF-8 decoding turns stray bytes into 3-byte replacement characters
        assert_eq!(current("\u{FFFD}\u{FFFD}12345-6"), 12345);
        assert_eq!(current("éé12345-6"), 12345);
        assert!(matches!(
            decode_line("\u{FFFD}\u{FFFD}\u{FFFD}12345-6"),
            TelemetryEvent::Malformed(_)
        ));
    }

    #[test]
    fn trims_line_endings() {
        assert_eq!(current("12345-6\r\n"), 12345);
    }

    #[test]
    fn missing_sign_is_malformed() {
        assert!(matches!(decode_line("12345"), TelemetryEvent::Malformed(_)));
        assert!(matches!(
            decode_line("PowerShield > ack start"),
            TelemetryEvent::Malformed(_)
        ));
    }

    #[test]
    fn bad_parts_are_malformed() {
        assert!(matches!(decode_line("abcdef-6"), TelemetryEvent::Malformed(_)));
        assert!(matches!(decode_line("123-x"), TelemetryEvent::Malformed(_)));
        assert!(matches!(decode_line("123-"), TelemetryEvent::Malformed(_)));
        assert!(matches!(decode_line("123-999"), TelemetryEvent::Malformed(_)));
    }

    #[test]
    fn decodes_timestamp_line() {
        assert_eq!(
            decode_line("TimeStamp: 12s 345ms, buff 3%"),
            TelemetryEvent::TimeStamp {
                seconds: 12,
                milliseconds: 345
            }
        );
    }

    #[test]
    fn garbled_timestamp_is_malformed() {
        assert!(matches!(
            decode_line("TimeStamp: soon"),
            TelemetryEvent::Malformed(_)
        ));
    }

    #[test]
    fn reconciler_tracks_both_clocks() {
        let start = Instant::now();
        let mut clock = ClockReconciler::new(start);
        assert_eq!(clock.board_timestamp_ms(), 0);

        clock.observe_board_time(2, 250);
        assert_eq!(clock.board_timestamp_ms(), 2_250);

        let sample = clock.stamp(42, start + Duration::from_millis(1_500));
        assert_eq!(sample.host_timestamp_us, 1_500_000);
        assert_eq!(sample.board_timestamp_ms, 2_250);
        assert_eq!(sample.current_ua, 42);
    }

    #[test]
    fn reconciler_never_goes_negative() {
        let start = Instant::now();
        let clock = ClockReconciler::new(start + Duration::from_secs(1));
        assert_eq!(clock.host_elapsed_us(start), 0);
    }

    #[test]
    fn restart_resets_board_clock() {
        let start = Instant::now();
        let mut clock = ClockReconciler::new(start);
        clock.observe_board_time(5, 0);
        clock.restart(start);
        assert_eq!(clock.board_timestamp_ms(), 0);
    }
}
