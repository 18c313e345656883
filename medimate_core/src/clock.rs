//! Time source and device-local calendar helpers.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use std::sync::Mutex;

/// Source of "now" for every engine operation
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Resolve a device timezone label to a UTC offset.
///
/// `UTC`, `Z` and fixed offsets (`+05:30`, `-0800`) are understood. Region
/// names such as `Asia/Kolkata` are kept for display only and resolve to UTC.
pub fn utc_offset(timezone: &str) -> FixedOffset {
    let utc = Utc.fix();
    let tz = timezone.trim();

    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") {
        return utc;
    }

    match parse_fixed_offset(tz) {
        Some(offset) => offset,
        None => {
            tracing::debug!("Timezone {:?} is not a fixed offset, using UTC", tz);
            utc
        }
    }
}

fn parse_fixed_offset(tz: &str) -> Option<FixedOffset> {
    let tz = tz
        .strip_prefix("UTC")
        .or_else(|| tz.strip_prefix("GMT"))
        .unwrap_or(tz);
    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Calendar date of `at` in the given device timezone
pub fn local_date(at: DateTime<Utc>, timezone: &str) -> NaiveDate {
    at.with_timezone(&utc_offset(timezone)).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_offsets() {
        assert_eq!(utc_offset("+05:30").local_minus_utc(), 5 * 3600 + 30 * 60);
        assert_eq!(utc_offset("-0800").local_minus_utc(), -8 * 3600);
        assert_eq!(utc_offset("UTC+01:00").local_minus_utc(), 3600);
        assert_eq!(utc_offset("UTC").local_minus_utc(), 0);
    }

    #[test]
    fn test_region_names_fall_back_to_utc() {
        assert_eq!(utc_offset("Asia/Kolkata").local_minus_utc(), 0);
        assert_eq!(utc_offset("+99:00").local_minus_utc(), 0);
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 20, 0, 0).unwrap();
        assert_eq!(local_date(at, "UTC"), NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());
        assert_eq!(local_date(at, "+05:30"), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
    }

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(start);
        clock.advance(chrono::Duration::hours(2));
        assert_eq!(clock.now(), start + chrono::Duration::hours(2));
    }
}
