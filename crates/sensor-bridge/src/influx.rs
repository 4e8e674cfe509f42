// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB v2 Line Protocol encoding.
//!
//! Line Protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use chrono::{DateTime, Utc};
use std::fmt;

/// A value that can be stored in an InfluxDB field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 64-bit floating point.
    Float(f64),
    /// 64-bit signed integer.
    Integer(i64),
    /// UTF-8 string.
    String(String),
}

impl FieldValue {
    /// Format this value for InfluxDB Line Protocol.
    ///
    /// - Float: written as-is (e.g., `3.14`), integral values keep no suffix
    /// - Integer: suffixed with `i` (e.g., `42i`)
    /// - String: quoted with double quotes, inner quotes escaped (e.g., `"hello"`)
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
        }
    }

    /// String payload, if this is a string field.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_protocol())
    }
}

/// A single time-series point ready to be written to the sink.
///
/// Tags identify the series; two points with the same measurement, tag set
/// and timestamp overwrite each other in InfluxDB, which is what makes
/// redelivery after a failed cursor advance harmless.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name.
    pub measurement: String,
    /// Tag key-value pairs.
    pub tags: Vec<(String, String)>,
    /// Field key-value pairs (at least one).
    pub fields: Vec<(String, FieldValue)>,
    /// Point time.
    pub timestamp: DateTime<Utc>,
}

impl Point {
    /// Start a point for `measurement` at `timestamp`.
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp,
        }
    }

    /// Add a tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Add a field.
    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    /// Look up a tag value by key.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Look up a field value by key.
    pub fn field_value(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Timestamp in nanoseconds since the Unix epoch.
    ///
    /// Times outside the representable nanosecond range clamp to the
    /// nearest bound.
    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp
            .timestamp_nanos_opt()
            .unwrap_or(if self.timestamp.timestamp() < 0 {
                i64::MIN
            } else {
                i64::MAX
            })
    }
}

/// InfluxDB v2 Line Protocol writer.
///
/// Accumulates points in an internal buffer and produces Line Protocol strings
/// when flushed.
pub struct LineProtocolWriter {
    buffer: Vec<String>,
}

impl LineProtocolWriter {
    /// Create a new empty writer.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Encode every point of a batch into one request body.
    pub fn encode_batch(points: &[Point]) -> String {
        let mut writer = Self::new();
        for point in points {
            writer.write(point);
        }
        writer.flush().join("\n")
    }

    /// Write a [`Point`].
    ///
    /// Points without fields are skipped (InfluxDB rejects them).
    pub fn write(&mut self, point: &Point) {
        if point.fields.is_empty() {
            return;
        }
        let tags: Vec<(&str, &str)> = point
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let fields: Vec<(&str, &FieldValue)> =
            point.fields.iter().map(|(k, v)| (k.as_str(), v)).collect();
        self.write_point(&point.measurement, &tags, &fields, point.timestamp_ns());
    }

    /// Write a single point in Line Protocol format.
    ///
    /// # Arguments
    /// - `measurement` - The measurement name
    /// - `tags` - Tag key-value pairs (indexed, for filtering)
    /// - `fields` - Field key-value pairs (actual data), must not be empty
    /// - `timestamp_ns` - Timestamp in nanoseconds since Unix epoch
    fn write_point(
        &mut self,
        measurement: &str,
        tags: &[(&str, &str)],
        fields: &[(&str, &FieldValue)],
        timestamp_ns: i64,
    ) {
        let mut line = escape_measurement(measurement);

        // Tags sorted by key for canonical form
        let mut sorted_tags: Vec<_> = tags.iter().collect();
        sorted_tags.sort_by_key(|(k, _)| *k);
        for (key, value) in &sorted_tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');

        for (i, (key, value)) in fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        line.push(' ');
        line.push_str(&timestamp_ns.to_string());

        self.buffer.push(line);
    }

    /// Flush the buffer, returning all accumulated lines.
    pub fn flush(&mut self) -> Vec<String> {
        std::mem::take(&mut self.buffer)
    }

    /// Get the current number of buffered lines.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for LineProtocolWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape measurement name per Line Protocol spec.
/// Spaces and commas must be escaped with backslash.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape tag keys, tag values and field keys.
/// Commas, equals signs, and spaces must be escaped.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
