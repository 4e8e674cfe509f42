// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record normalization.
//!
//! Converts a raw telemetry record (a JSON object whose field names differ
//! between sensor generations) into a [`CanonicalPoint`] with a fixed field
//! set. Missing or unparseable values degrade to defaults; the only failure
//! is a record that is not an object at all.
//!
//! Field resolution order, per logical field:
//! 1. the field named in the sensor's mapping, if present and non-null;
//! 2. the first present, non-null name of the fallback chain;
//! 3. the type default (`0` / `0.0`).

use crate::config::{DistanceEncoding, SensorConfig, TimestampFormat};
use crate::influx::{FieldValue, Point};
use crate::media::timestamp::epoch_from_secs;
use crate::source::value_kind;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Measurement name of telemetry points.
pub const TELEMETRY_MEASUREMENT: &str = "sensor_reading";

/// Historical names of the distance field, most specific first.
pub const DISTANCE_FALLBACK_FIELDS: &[&str] = &[
    "dist_cm",
    "distance_cm",
    "ultrasound",
    "ultrasound_cm",
    "level",
    "level_cm",
    "distance",
    "water_level",
    "distance_from_sensor",
];

/// Historical names of the battery voltage field.
pub const BATTERY_FALLBACK_FIELDS: &[&str] = &["bat_volt", "battery_voltage", "battery", "voltage"];

/// Historical names of the solar panel voltage field.
pub const SOLAR_FALLBACK_FIELDS: &[&str] = &["solar_volt", "solar_voltage", "solar"];

/// Epoch values above this are milliseconds under `epoch_auto`.
pub const EPOCH_AUTO_MS_THRESHOLD: f64 = 1e11;

/// Date/time layouts accepted by the `iso` format, tried in order.
const ISO_PATTERNS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
];

/// Normalization failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("record {key} is a {kind}, expected an object")]
    NotARecord { key: String, kind: &'static str },
}

/// Fixed-schema telemetry reading.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalPoint {
    pub sensor_id: String,
    /// Push key of the source record.
    pub source_key: String,
    pub distance_cm: i64,
    pub battery_volt: f64,
    pub solar_volt: f64,
    pub timestamp: DateTime<Utc>,
}

impl CanonicalPoint {
    /// Sink representation.
    pub fn to_point(&self) -> Point {
        Point::new(TELEMETRY_MEASUREMENT, self.timestamp)
            .tag("sensor_id", self.sensor_id.as_str())
            .field("distance_cm", FieldValue::Integer(self.distance_cm))
            .field("battery_volt", FieldValue::Float(self.battery_volt))
            .field("solar_volt", FieldValue::Float(self.solar_volt))
            .field("source_key", FieldValue::String(self.source_key.clone()))
    }
}

impl From<&CanonicalPoint> for Point {
    fn from(point: &CanonicalPoint) -> Self {
        point.to_point()
    }
}

/// Normalize one record, substituting the current time for bad timestamps.
pub fn normalize(
    key: &str,
    record: &Value,
    sensor: &SensorConfig,
) -> Result<CanonicalPoint, NormalizeError> {
    normalize_at(key, record, sensor, Utc::now())
}

/// Normalize one record with an explicit fallback time.
///
/// Deterministic: the same inputs always produce the same point.
pub fn normalize_at(
    key: &str,
    record: &Value,
    sensor: &SensorConfig,
    now: DateTime<Utc>,
) -> Result<CanonicalPoint, NormalizeError> {
    let Value::Object(fields) = record else {
        return Err(NormalizeError::NotARecord {
            key: key.to_string(),
            kind: value_kind(record),
        });
    };
    let mapping = &sensor.fields;

    let distance = resolve_field(fields, mapping.distance.as_deref(), DISTANCE_FALLBACK_FIELDS);
    let battery = resolve_field(fields, mapping.battery.as_deref(), BATTERY_FALLBACK_FIELDS);
    let solar = resolve_field(fields, mapping.solar.as_deref(), SOLAR_FALLBACK_FIELDS);
    let timestamp = fields.get(mapping.timestamp_field());

    Ok(CanonicalPoint {
        sensor_id: sensor.id.clone(),
        source_key: key.to_string(),
        distance_cm: parse_distance(distance, sensor.distance_encoding),
        battery_volt: parse_voltage(battery),
        solar_volt: parse_voltage(solar),
        timestamp: parse_timestamp(timestamp, sensor.timestamp_format, now),
    })
}

/// Look up a logical field: explicit name first, then the fallback chain.
pub fn resolve_field<'a>(
    record: &'a Map<String, Value>,
    explicit: Option<&str>,
    fallback: &[&str],
) -> Option<&'a Value> {
    let present = |name: &str| record.get(name).filter(|v| !v.is_null());
    explicit
        .and_then(present)
        .or_else(|| fallback.iter().find_map(|name| present(*name)))
}

/// Parse a distance reading to whole centimetres.
pub fn parse_distance(value: Option<&Value>, encoding: DistanceEncoding) -> i64 {
    let Some(value) = value else {
        return 0;
    };
    match (encoding, value) {
        (_, Value::Null) => 0,
        (_, Value::Number(n)) => number_to_i64(n),
        (_, Value::Bool(b)) => i64::from(*b),
        (DistanceEncoding::Numeric, Value::String(s)) => {
            s.trim().parse::<f64>().map_or(0, truncate)
        }
        (DistanceEncoding::Numeric, _) => 0,
        (_, Value::String(s)) => first_digit_run(s),
        (DistanceEncoding::String, other) => first_digit_run(&other.to_string()),
        (DistanceEncoding::Auto, _) => 0,
    }
}

/// Parse a voltage reading; anything non-numeric is `0.0`.
pub fn parse_voltage(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Parse a record timestamp; any failure yields `now`.
pub fn parse_timestamp(
    value: Option<&Value>,
    format: TimestampFormat,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let parsed = match (format, value) {
        (_, None) | (_, Some(Value::Null)) => None,
        (TimestampFormat::Iso, Some(Value::String(s))) => parse_iso(s),
        (TimestampFormat::Iso, Some(other)) => parse_iso(&other.to_string()),
        (epoch, Some(raw)) => epoch_value(raw).and_then(|v| {
            let secs = match epoch {
                TimestampFormat::EpochMs => v / 1000.0,
                TimestampFormat::EpochAuto if v > EPOCH_AUTO_MS_THRESHOLD => v / 1000.0,
                _ => v,
            };
            epoch_from_secs(secs)
        }),
    };
    parsed.unwrap_or_else(|| {
        if let Some(raw) = value.filter(|v| !v.is_null()) {
            tracing::debug!(value = %raw, ?format, "Unparseable timestamp, using current time");
        }
        now
    })
}

fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    ISO_PATTERNS
        .iter()
        .find_map(|pattern| NaiveDateTime::parse_from_str(s, pattern).ok())
        .map(|naive| naive.and_utc())
}

fn epoch_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn number_to_i64(n: &Number) -> i64 {
    if let Some(i) = n.as_i64() {
        i
    } else if let Some(u) = n.as_u64() {
        i64::try_from(u).unwrap_or(i64::MAX)
    } else {
        n.as_f64().map_or(0, truncate)
    }
}

fn truncate(v: f64) -> i64 {
    if v.is_finite() {
        v.trunc() as i64
    } else {
        0
    }
}

/// First run of ASCII digits (`"R0231"` -> 231); none or overflow -> 0.
fn first_digit_run(s: &str) -> i64 {
    let digits: String = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldMap;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 19, 12, 0, 0).unwrap()
    }

    fn sensor() -> SensorConfig {
        SensorConfig {
            enabled: true,
            ..SensorConfig::unconfigured("flood1")
        }
    }

    #[test]
    fn test_parse_distance_encodings() {
        let v = json!("R0231");
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::String), 231);
        let v = json!(42.9);
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::Numeric), 42);
        assert_eq!(parse_distance(None, DistanceEncoding::Auto), 0);
    }

    #[test]
    fn test_parse_distance_edge_cases() {
        let v = json!("no digits");
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::String), 0);
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::Auto), 0);
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::Numeric), 0);

        let v = json!("R12x34");
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::Auto), 12);

        let v = json!(" 57.8 ");
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::Numeric), 57);

        let v = json!(-3.7);
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::Auto), -3);

        let v = json!(150);
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::String), 150);

        let v = json!({"raw": 9});
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::Auto), 0);
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::String), 9);

        let v = json!("R99999999999999999999");
        assert_eq!(parse_distance(Some(&v), DistanceEncoding::String), 0);
    }

    #[test]
    fn test_parse_distance_bool_same_for_every_encoding() {
        for encoding in [
            DistanceEncoding::String,
            DistanceEncoding::Numeric,
            DistanceEncoding::Auto,
        ] {
            assert_eq!(parse_distance(Some(&json!(true)), encoding), 1, "{:?}", encoding);
            assert_eq!(parse_distance(Some(&json!(false)), encoding), 0, "{:?}", encoding);
        }
    }

    #[test]
    fn test_parse_timestamp_epoch_auto_boundary() {
        let ms = json!(150_000_000_000_i64);
        let ts = parse_timestamp(Some(&ms), TimestampFormat::EpochAuto, now());
        assert_eq!(ts.timestamp(), 150_000_000);

        let secs = json!(1_700_000_000);
        let ts = parse_timestamp(Some(&secs), TimestampFormat::EpochAuto, now());
        assert_eq!(ts.timestamp(), 1_700_000_000);

        // Exactly at the threshold is still seconds
        let edge = json!(100_000_000_000_i64);
        let ts = parse_timestamp(Some(&edge), TimestampFormat::EpochAuto, now());
        assert_eq!(ts.timestamp(), 100_000_000_000);
    }

    #[test]
    fn test_parse_timestamp_explicit_epochs() {
        let v = json!(1_700_000_000_500_i64);
        let ts = parse_timestamp(Some(&v), TimestampFormat::EpochMs, now());
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_subsec_millis(), 500);

        let v = json!("1700000000");
        let ts = parse_timestamp(Some(&v), TimestampFormat::EpochS, now());
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_timestamp_iso_patterns() {
        let expected = Utc.with_ymd_and_hms(2026, 2, 19, 13, 55, 25).unwrap();
        for raw in [
            "2026-02-19 13:55:25",
            "2026-02-19T13:55:25",
            " 2026-02-19T13:55:25Z ",
        ] {
            let v = json!(raw);
            assert_eq!(parse_timestamp(Some(&v), TimestampFormat::Iso, now()), expected);
        }

        let v = json!("2026-02-19 13:55:25.250");
        let ts = parse_timestamp(Some(&v), TimestampFormat::Iso, now());
        assert_eq!(ts.timestamp(), expected.timestamp());
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_parse_timestamp_failures_use_now() {
        let v = json!("yesterday");
        assert_eq!(parse_timestamp(Some(&v), TimestampFormat::Iso, now()), now());
        assert_eq!(parse_timestamp(Some(&v), TimestampFormat::EpochAuto, now()), now());
        assert_eq!(parse_timestamp(None, TimestampFormat::EpochS, now()), now());
        let v = json!(1e300);
        assert_eq!(parse_timestamp(Some(&v), TimestampFormat::EpochS, now()), now());
    }

    #[test]
    fn test_fallback_chain_and_defaults() {
        let record = json!({"ultrasound": "R0120", "battery": 3.9, "timestamp": 1_700_000_000});
        let point = normalize_at("-Ka001", &record, &sensor(), now()).unwrap();

        assert_eq!(point.sensor_id, "flood1");
        assert_eq!(point.source_key, "-Ka001");
        assert_eq!(point.distance_cm, 120);
        assert_eq!(point.battery_volt, 3.9);
        assert_eq!(point.solar_volt, 0.0);
        assert_eq!(point.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_explicit_mapping_wins_unless_null() {
        let mut cfg = sensor();
        cfg.fields = FieldMap {
            distance: Some("lvl".into()),
            timestamp: Some("ts".into()),
            ..Default::default()
        };

        let record = json!({"lvl": 80, "dist_cm": 10, "ts": 1_700_000_000_000_i64});
        let point = normalize_at("-k", &record, &cfg, now()).unwrap();
        assert_eq!(point.distance_cm, 80);
        assert_eq!(point.timestamp.timestamp(), 1_700_000_000);

        let record = json!({"lvl": null, "dist_cm": 10});
        let point = normalize_at("-k", &record, &cfg, now()).unwrap();
        assert_eq!(point.distance_cm, 10);
        assert_eq!(point.timestamp, now());
    }

    #[test]
    fn test_voltage_strings_and_garbage() {
        assert_eq!(parse_voltage(Some(&json!("4.12"))), 4.12);
        assert_eq!(parse_voltage(Some(&json!("n/a"))), 0.0);
        assert_eq!(parse_voltage(Some(&json!([1]))), 0.0);
        assert_eq!(parse_voltage(None), 0.0);
    }

    #[test]
    fn test_non_object_is_rejected() {
        for raw in [json!(42), json!("x"), json!([1, 2]), Value::Null] {
            assert!(matches!(
                normalize_at("-bad", &raw, &sensor(), now()),
                Err(NormalizeError::NotARecord { .. })
            ));
        }
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let record = json!({"dist_cm": "R0231", "bat_volt": 3.71, "timestamp": "garbage"});
        let first = normalize_at("-Ka9", &record, &sensor(), now()).unwrap();
        let second = normalize_at("-Ka9", &record, &sensor(), now()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_point(), second.to_point());
    }

    #[test]
    fn test_point_shape() {
        let record = json!({"dist_cm": 231, "bat_volt": 3.7, "solar_volt": 5.1, "timestamp": 1});
        let point = Point::from(&normalize_at("-Ka1", &record, &sensor(), now()).unwrap());

        assert_eq!(point.measurement, TELEMETRY_MEASUREMENT);
        assert_eq!(point.tag_value("sensor_id"), Some("flood1"));
        assert_eq!(point.field_value("distance_cm"), Some(&FieldValue::Integer(231)));
        assert_eq!(point.field_value("solar_volt"), Some(&FieldValue::Float(5.1)));
        assert_eq!(
            point.field_value("source_key").and_then(FieldValue::as_str),
            Some("-Ka1")
        );
        assert_eq!(point.timestamp.timestamp(), 1);
    }
}
