//! Constant-factor unit conversions used by the driver and the analysis engine.

/// Microamps per amp.
pub const UA_PER_A: f64 = 1_000_000.0;
/// Milliamps per amp.
pub const MA_PER_A: f64 = 1_000.0;
/// Seconds per hour.
pub const S_PER_H: f64 = 3_600.0;
/// Milliseconds per second.
pub const MS_PER_S: f64 = 1_000.0;
/// Microseconds per second.
pub const US_PER_S: f64 = 1_000_000.0;

/// Amps to microamps.
pub fn a_to_ua(a: f64) -> f64 {
    a * UA_PER_A
}

/// Microamps to amps.
pub fn ua_to_a(ua: f64) -> f64 {
    ua / UA_PER_A
}

/// Amps (or amp-hours) to milliamps (milliamp-hours).
pub fn a_to_ma(a: f64) -> f64 {
    a * MA_PER_A
}

/// Seconds to milliseconds.
pub fn s_to_ms(s: f64) -> f64 {
    s * MS_PER_S
}

/// Seconds to hours.
pub fn s_to_h(s: f64) -> f64 {
    s / S_PER_H
}

/// Microseconds to seconds.
pub fn us_to_s(us: f64) -> f64 {
    us / US_PER_S
}

/// Microseconds to hours.
pub fn us_to_h(us: f64) -> f64 {
    s_to_h(us_to_s(us))
}
