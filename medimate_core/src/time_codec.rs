//! Time-of-day codec.
//!
//! Dispensers keep their schedule as integer minutes since midnight, while
//! caregivers and stored schedules use `HH:MM` strings.

use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Minutes in one day; valid encoded values are `0..MINUTES_PER_DAY`.
pub const MINUTES_PER_DAY: u16 = 24 * 60;

static TIME_OF_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-1][0-9]|2[0-3]):[0-5][0-9]$").expect("time-of-day pattern compiles")
});

/// Check a string against the 24-hour `HH:MM` pattern.
pub fn is_valid(time_of_day: &str) -> bool {
    TIME_OF_DAY.is_match(time_of_day)
}

/// Encode `"HH:MM"` as minutes since midnight.
pub fn encode(time_of_day: &str) -> Result<u16> {
    if !is_valid(time_of_day) {
        return Err(Error::InvalidFormat(time_of_day.to_string()));
    }

    let (hours, minutes) = time_of_day
        .split_once(':')
        .ok_or_else(|| Error::InvalidFormat(time_of_day.to_string()))?;
    let hours: u16 = hours
        .parse()
        .map_err(|_| Error::InvalidFormat(time_of_day.to_string()))?;
    let minutes: u16 = minutes
        .parse()
        .map_err(|_| Error::InvalidFormat(time_of_day.to_string()))?;

    Ok(hours * 60 + minutes)
}

/// Decode minutes since midnight back to `"HH:MM"`.
pub fn decode(minutes: u16) -> Result<String> {
    if minutes >= MINUTES_PER_DAY {
        return Err(Error::InvalidFormat(minutes.to_string()));
    }
    Ok(format!("{:02}:{:02}", minutes / 60, minutes % 60))
}
