//! Timestamp and race-date utilities

use crate::{Error, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Fixed UTC offset from whole hours
pub fn fixed_offset(hours: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(hours * 3600)
        .ok_or_else(|| Error::InvalidInput(format!("Invalid UTC offset: {} hours", hours)))
}

/// Calendar date of `instant` in the given fixed offset
pub fn race_date_at(instant: DateTime<Utc>, offset_hours: i32) -> Result<NaiveDate> {
    let offset = fixed_offset(offset_hours)?;
    Ok(instant.with_timezone(&offset).date_naive())
}

/// "Today" for the race calendar, which runs on a fixed offset rather than the host zone
pub fn race_date_today(offset_hours: i32) -> Result<NaiveDate> {
    race_date_at(now(), offset_hours)
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_race_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| Error::InvalidInput(format!("Invalid race date '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn test_millis_to_duration() {
        assert_eq!(millis_to_duration(0), Duration::ZERO);
        assert_eq!(millis_to_duration(1000), Duration::from_secs(1));
    }

    #[test]
    fn test_race_date_crosses_midnight_in_offset() {
        // 16:30 UTC is already the next day at +09:00
        let instant = Utc.with_ymd_and_hms(2026, 10, 17, 16, 30, 0).unwrap();
        assert_eq!(
            race_date_at(instant, 9).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
        );
        assert_eq!(
            race_date_at(instant, 0).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
        );
    }

    #[test]
    fn test_invalid_offset_rejected() {
        assert!(fixed_offset(30).is_err());
    }

    #[test]
    fn test_parse_race_date() {
        assert_eq!(
            parse_race_date(" 2026-10-18 ").unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
        );
        assert!(parse_race_date("18/10/2026").is_err());
    }
}
