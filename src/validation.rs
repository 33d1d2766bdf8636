//! Reusable validators for configuration values.
use std::ops::RangeInclusive;

/// Sampling frequencies (Hz) accepted by the LPM01A `freq` command.
pub const SUPPORTED_FREQUENCIES_HZ: &[u32] = &[
    1, 2, 5, 10, 20, 50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000, 20_000, 50_000, 100_000,
];

/// Supply voltage range (mV) accepted by the LPM01A `volt` command.
pub const VOLTAGE_RANGE_MV: RangeInclusive<u32> = 1_800..=3_300;

/// Validates if a given string is a valid file path.
///
/// # Arguments
///
/// * `path` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the file path is valid.
/// * `Err(&'static str)` if the file path is invalid.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates if a given string is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

/// Validates a supply voltage against the device range.
pub fn is_valid_voltage_mv(voltage_mv: u32) -> Result<(), &'static str> {
    is_in_range(voltage_mv, VOLTAGE_RANGE_MV)
        .map_err(|_| "Voltage must be between 1800 and 3300 mV")
}

/// Validates a sampling frequency against the device's discrete rate list.
pub fn is_valid_frequency_hz(frequency_hz: u32) -> Result<(), &'static str> {
    if SUPPORTED_FREQUENCIES_HZ.contains(&frequency_hz) {
        Ok(())
    } else {
        Err("Frequency is not one of the supported sampling rates")
    }
}
