// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timestamp extraction from image file names.
//!
//! A view configures a regex and one of three strategies for reading its
//! capture groups:
//!
//! | Strategy | Groups used |
//! |---|---|
//! | `EpochSeconds` | group 1 as seconds since the epoch |
//! | `EpochMillis` | group 1 as milliseconds since the epoch |
//! | `Components` | 6 groups `Y M D h m s`, 3-5 groups `Y M D` (or `h m s` of today), 1-2 groups as an implicit epoch |

use crate::config::ConfigError;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;

/// First-group values above this are read as epoch seconds by the
/// `Components` strategy when fewer than three groups are captured.
const IMPLICIT_EPOCH_MIN: f64 = 1_000_000_000.0;

/// How the capture groups of a filename regex are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampStrategy {
    EpochSeconds,
    EpochMillis,
    Components,
}

impl TimestampStrategy {
    /// Map the `timestamp_format` value of a view.
    pub fn from_format(format: Option<&str>) -> Result<Self, ConfigError> {
        match format.map(str::trim) {
            Some("epoch_s") => Ok(Self::EpochSeconds),
            Some("epoch_ms") => Ok(Self::EpochMillis),
            None | Some("") | Some("components") => Ok(Self::Components),
            Some(other) => Err(ConfigError::Invalid(format!(
                "unknown filename timestamp format '{}'",
                other
            ))),
        }
    }
}

/// Compiled filename timestamp extractor.
#[derive(Debug, Clone)]
pub struct FilenameTimestamp {
    regex: Regex,
    strategy: TimestampStrategy,
}

impl FilenameTimestamp {
    /// Compile `pattern` for `strategy`.
    pub fn new(pattern: &str, strategy: TimestampStrategy) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern)
            .map_err(|e| ConfigError::Invalid(format!("timestamp regex '{}': {}", pattern, e)))?;
        Ok(Self { regex, strategy })
    }

    pub fn strategy(&self) -> TimestampStrategy {
        self.strategy
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Extract a UTC time from `filename`.
    ///
    /// `today` supplies the date for time-of-day-only names. Returns `None`
    /// when the regex does not match or the groups do not form a valid time.
    pub fn extract(&self, filename: &str, today: NaiveDate) -> Option<DateTime<Utc>> {
        let caps = self.regex.captures(filename)?;
        let groups: Vec<Option<&str>> = caps.iter().skip(1).map(|m| m.map(|m| m.as_str())).collect();
        if groups.is_empty() {
            return None;
        }

        match self.strategy {
            TimestampStrategy::EpochSeconds => epoch_from_secs(parse_f64(groups[0]?)?),
            TimestampStrategy::EpochMillis => epoch_from_secs(parse_f64(groups[0]?)? / 1000.0),
            TimestampStrategy::Components => from_components(&groups, today),
        }
    }
}

fn from_components(groups: &[Option<&str>], today: NaiveDate) -> Option<DateTime<Utc>> {
    if groups.len() < 3 {
        let value = parse_f64(groups[0]?)?;
        return if value > IMPLICIT_EPOCH_MIN {
            epoch_from_secs(value)
        } else {
            None
        };
    }

    let values = groups
        .iter()
        .map(|g| g.and_then(|s| s.trim().parse::<i64>().ok()))
        .collect::<Option<Vec<i64>>>()?;

    if values.len() >= 6 {
        return utc(values[0], values[1], values[2], values[3], values[4], values[5]);
    }
    if values[0] > 100 {
        // Looks like a year
        utc(values[0], values[1], values[2], 0, 0, 0)
    } else {
        use chrono::Datelike;
        utc(
            i64::from(today.year()),
            i64::from(today.month()),
            i64::from(today.day()),
            values[0],
            values[1],
            values[2],
        )
    }
}

fn utc(year: i64, month: i64, day: i64, hour: i64, min: i64, sec: i64) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(
        i32::try_from(year).ok()?,
        u32::try_from(month).ok()?,
        u32::try_from(day).ok()?,
        u32::try_from(hour).ok()?,
        u32::try_from(min).ok()?,
        u32::try_from(sec).ok()?,
    )
    .single()
}

fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Convert fractional epoch seconds to a UTC time, at microsecond precision.
pub(crate) fn epoch_from_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() >= i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 19).unwrap()
    }

    fn extractor(pattern: &str, strategy: TimestampStrategy) -> FilenameTimestamp {
        FilenameTimestamp::new(pattern, strategy).expect("regex")
    }

    #[test]
    fn test_strategy_from_format() {
        assert_eq!(
            TimestampStrategy::from_format(Some("epoch_s")).unwrap(),
            TimestampStrategy::EpochSeconds
        );
        assert_eq!(
            TimestampStrategy::from_format(Some("epoch_ms")).unwrap(),
            TimestampStrategy::EpochMillis
        );
        assert_eq!(
            TimestampStrategy::from_format(None).unwrap(),
            TimestampStrategy::Components
        );
        assert_eq!(
            TimestampStrategy::from_format(Some("")).unwrap(),
            TimestampStrategy::Components
        );
        assert!(TimestampStrategy::from_format(Some("julian")).is_err());
    }

    #[test]
    fn test_epoch_seconds() {
        let ex = extractor(r"(\d{10})_front", TimestampStrategy::EpochSeconds);
        let ts = ex.extract("1771511518_front.jpg", today()).expect("ts");
        assert_eq!(ts.timestamp(), 1_771_511_518);
    }

    #[test]
    fn test_epoch_millis() {
        let ex = extractor(r"img_(\d{13})", TimestampStrategy::EpochMillis);
        let ts = ex.extract("img_1771511518250.jpg", today()).expect("ts");
        assert_eq!(ts.timestamp(), 1_771_511_518);
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_six_components() {
        let ex = extractor(
            r"(\d{4})(\d{2})(\d{2})_(\d{2})(\d{2})(\d{2})",
            TimestampStrategy::Components,
        );
        let ts = ex.extract("cam_20260219_135525.jpg", today()).expect("ts");
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 2, 19, 13, 55, 25).unwrap());
    }

    #[test]
    fn test_three_components_date() {
        let ex = extractor(r"(\d{4})-(\d{2})-(\d{2})", TimestampStrategy::Components);
        let ts = ex.extract("2026-01-05.jpg", today()).expect("ts");
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_three_components_time_of_day_uses_today() {
        let ex = extractor(r"(\d{2})h(\d{2})m(\d{2})s", TimestampStrategy::Components);
        let ts = ex.extract("07h30m15s.jpg", today()).expect("ts");
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 2, 19, 7, 30, 15).unwrap());
    }

    #[test]
    fn test_single_group_implicit_epoch() {
        let ex = extractor(r"(\d+)\.jpg", TimestampStrategy::Components);
        let ts = ex.extract("1700000000.jpg", today()).expect("ts");
        assert_eq!(ts.timestamp(), 1_700_000_000);

        // Small values are not plausible epochs
        assert!(ex.extract("42.jpg", today()).is_none());
    }

    #[test]
    fn test_invalid_components_fail() {
        let ex = extractor(r"(\d{4})(\d{2})(\d{2})", TimestampStrategy::Components);
        assert!(ex.extract("20261341.jpg", today()).is_none());
    }

    #[test]
    fn test_no_match_or_no_groups() {
        let ex = extractor(r"(\d{10})", TimestampStrategy::EpochSeconds);
        assert!(ex.extract("front.jpg", today()).is_none());

        let ex = extractor(r"\d+", TimestampStrategy::EpochSeconds);
        assert!(ex.extract("1771511518.jpg", today()).is_none());
    }

    #[test]
    fn test_unmatched_optional_group_fails() {
        let ex = extractor(r"(\d{4})-(\d{2})-(\d{2})(T\d+)?", TimestampStrategy::Components);
        // Four groups, the optional one absent
        assert!(ex.extract("2026-02-19.jpg", today()).is_none());
    }
}
