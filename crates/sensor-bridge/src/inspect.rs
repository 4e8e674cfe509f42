// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Source inspection report.
//!
//! Discovers every top-level group of the source, samples its newest
//! records, classifies how timestamps and distances are encoded, and
//! compares the result with the sensor catalog. Used to write or check the
//! catalog for new sensor generations.

use crate::config::{DistanceEncoding, SensorCatalog, TimestampFormat};
use crate::normalize::DISTANCE_FALLBACK_FIELDS;
use crate::source::{RecordPage, RecordSource, SourceError};
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, Write};

/// Field names the bridge knows about, across sensor generations.
const KNOWN_FIELDS: &[&str] = &[
    // Flood monitors
    "ultrasound",
    "ultrasound_cm",
    "bat_volt",
    "solar_volt",
    "load_current",
    "load_power",
    "load_volt",
    "load_current_ma",
    "load_power_mW",
    "solar_current",
    "solar_power",
    "solar_current_ma",
    "solar_power_mW",
    // LoRaWAN nodes
    "distance_cm",
    "dist_cm",
    "packet_number",
    "device_id",
    // Camera-equipped gauges
    "water_level",
    "level_cm",
    "distance_from_sensor",
    "image_url",
    "photo_url",
    "status",
    // Shared
    "timestamp",
    "simulated",
];

/// How a timestamp value is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimestampKind {
    Seconds,
    Milliseconds,
    Microseconds,
    IsoDatetime,
    Missing,
    Unparseable,
}

impl fmt::Display for TimestampKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Seconds => "seconds",
            Self::Milliseconds => "milliseconds",
            Self::Microseconds => "microseconds",
            Self::IsoDatetime => "iso-datetime",
            Self::Missing => "missing",
            Self::Unparseable => "unparseable",
        };
        f.write_str(s)
    }
}

/// How a distance value is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DistanceKind {
    Numeric,
    /// Uppercase prefix followed by digits, e.g. `R0231`.
    EncodedString,
    RawString,
    Other,
}

impl fmt::Display for DistanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Numeric => "numeric",
            Self::EncodedString => "encoded-string",
            Self::RawString => "raw-string",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Sensor generation guessed from field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFormat {
    FloodMonitor,
    LoRaWan,
    LoRaWanLike,
    WaterLevelGauge,
    Unknown,
}

impl fmt::Display for SensorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FloodMonitor => "floodmonitor",
            Self::LoRaWan => "lorawan",
            Self::LoRaWanLike => "lorawan-like",
            Self::WaterLevelGauge => "water-level-gauge",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Catalog status of a discovered group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    Enabled,
    Disabled,
    Unconfigured,
}

/// Classify a timestamp by magnitude, or as a date/time string.
pub fn classify_timestamp(value: &Value) -> TimestampKind {
    let numeric = match value {
        Value::Null => return TimestampKind::Missing,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match numeric {
        Some(ts) if ts > 1e15 => TimestampKind::Microseconds,
        Some(ts) if ts > 1e12 => TimestampKind::Milliseconds,
        Some(ts) if ts > 1e9 => TimestampKind::Seconds,
        Some(_) => TimestampKind::Unparseable,
        None => match value {
            Value::String(s) if is_iso_datetime(s) => TimestampKind::IsoDatetime,
            _ => TimestampKind::Unparseable,
        },
    }
}

fn is_iso_datetime(s: &str) -> bool {
    let s = s.trim();
    [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%SZ",
    ]
    .iter()
    .any(|p| NaiveDateTime::parse_from_str(s, p).is_ok())
}

/// Classify a distance value.
pub fn classify_distance(value: &Value) -> DistanceKind {
    match value {
        Value::Number(_) => DistanceKind::Numeric,
        Value::String(s) => {
            let digits = s.trim_start_matches(|c: char| c.is_ascii_uppercase());
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                DistanceKind::EncodedString
            } else {
                DistanceKind::RawString
            }
        }
        _ => DistanceKind::Other,
    }
}

/// Guess the sensor generation from the union of field names.
pub fn detect_format(fields: &BTreeSet<String>) -> SensorFormat {
    let has = |name: &str| fields.contains(name);
    if has("ultrasound") || has("ultrasound_cm") {
        SensorFormat::FloodMonitor
    } else if has("distance_cm") || has("dist_cm") {
        if has("device_id") || has("packet_number") {
            SensorFormat::LoRaWan
        } else {
            SensorFormat::LoRaWanLike
        }
    } else if has("level_cm") || has("water_level") {
        SensorFormat::WaterLevelGauge
    } else {
        SensorFormat::Unknown
    }
}

/// Analysis of one group's sampled records.
#[derive(Debug, Clone)]
pub struct SensorAnalysis {
    pub sensor: String,
    pub status: ConfigStatus,
    /// Number of children, from a shallow read.
    pub record_count: usize,
    pub sampled: usize,
    /// Sampled children that were not objects.
    pub non_records: usize,
    /// Distinct field sets with their frequency, most fields first.
    pub schemas: Vec<(BTreeSet<String>, usize)>,
    pub format: SensorFormat,
    pub timestamps: BTreeMap<TimestampKind, usize>,
    pub distances: BTreeMap<DistanceKind, usize>,
    /// First distance field name found in the samples.
    pub distance_field: Option<String>,
    pub unknown_fields: BTreeSet<String>,
}

impl SensorAnalysis {
    /// Catalog settings matching the observed encodings.
    pub fn suggested_encodings(&self) -> (DistanceEncoding, TimestampFormat) {
        let distance = match dominant(&self.distances) {
            Some(DistanceKind::Numeric) => DistanceEncoding::Numeric,
            Some(DistanceKind::EncodedString) => DistanceEncoding::String,
            _ => DistanceEncoding::Auto,
        };
        let timestamp = match dominant(&self.timestamps) {
            Some(TimestampKind::Seconds) => TimestampFormat::EpochS,
            Some(TimestampKind::Milliseconds) => TimestampFormat::EpochMs,
            Some(TimestampKind::IsoDatetime) => TimestampFormat::Iso,
            _ => TimestampFormat::EpochAuto,
        };
        (distance, timestamp)
    }
}

fn dominant<K: Copy>(counts: &BTreeMap<K, usize>) -> Option<K> {
    counts.iter().max_by_key(|(_, n)| **n).map(|(k, _)| *k)
}

/// Analyse a page of sampled records.
pub fn analyse_records(
    sensor: &str,
    status: ConfigStatus,
    record_count: usize,
    timestamp_field: &str,
    page: &RecordPage,
) -> SensorAnalysis {
    let mut schemas: BTreeMap<BTreeSet<String>, usize> = BTreeMap::new();
    let mut timestamps = BTreeMap::new();
    let mut distances = BTreeMap::new();
    let mut distance_field = None;
    let mut all_fields = BTreeSet::new();
    let mut non_records = 0;

    for record in page.values() {
        let Value::Object(map) = record else {
            non_records += 1;
            continue;
        };
        let fields: BTreeSet<String> = map.keys().cloned().collect();
        all_fields.extend(fields.iter().cloned());
        *schemas.entry(fields).or_default() += 1;

        let ts = classify_timestamp(map.get(timestamp_field).unwrap_or(&Value::Null));
        *timestamps.entry(ts).or_default() += 1;

        if let Some((name, value)) = DISTANCE_FALLBACK_FIELDS
            .iter()
            .find_map(|name| map.get(*name).map(|v| (*name, v)))
        {
            *distances.entry(classify_distance(value)).or_default() += 1;
            distance_field.get_or_insert_with(|| name.to_string());
        }
    }

    let mut schemas: Vec<(BTreeSet<String>, usize)> = schemas.into_iter().collect();
    schemas.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(b.1.cmp(&a.1)));

    let unknown_fields = all_fields
        .iter()
        .filter(|f| !KNOWN_FIELDS.contains(&f.as_str()))
        .cloned()
        .collect();

    SensorAnalysis {
        sensor: sensor.to_string(),
        status,
        record_count,
        sampled: page.len(),
        non_records,
        schemas,
        format: detect_format(&all_fields),
        timestamps,
        distances,
        distance_field,
        unknown_fields,
    }
}

/// Full inspection result.
#[derive(Debug, Clone, Default)]
pub struct InspectReport {
    /// Top-level groups found at the source, sorted.
    pub discovered: Vec<String>,
    /// Catalog entries with no matching group.
    pub missing: Vec<String>,
    pub sensors: Vec<SensorAnalysis>,
    /// Groups whose sampling failed, with the error.
    pub failures: Vec<(String, String)>,
}

/// Inspect the source against `catalog`, sampling `samples` records per group.
pub fn inspect<R: RecordSource + ?Sized>(
    source: &R,
    catalog: &SensorCatalog,
    samples: usize,
) -> Result<InspectReport, SourceError> {
    let mut discovered = source.child_keys("")?;
    discovered.sort();

    let mut report = InspectReport {
        missing: catalog
            .all()
            .iter()
            .map(|s| s.id.clone())
            .filter(|id| !discovered.contains(id))
            .collect(),
        ..Default::default()
    };

    for group in &discovered {
        let record_count = source.child_keys(group).map_or(0, |keys| keys.len());
        let page = match source.latest(group, samples.max(1)) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(group = %group, "Sampling failed: {}", e);
                report.failures.push((group.clone(), e.to_string()));
                continue;
            }
        };

        let config = catalog.get(group);
        let status = match config {
            Some(c) if c.enabled => ConfigStatus::Enabled,
            Some(_) => ConfigStatus::Disabled,
            None => ConfigStatus::Unconfigured,
        };
        let timestamp_field = config.map_or("timestamp", |c| c.fields.timestamp_field());
        report.sensors.push(analyse_records(
            group,
            status,
            record_count,
            timestamp_field,
            &page,
        ));
    }
    report.discovered = discovered;
    Ok(report)
}

fn counts<K: fmt::Display>(m: &BTreeMap<K, usize>) -> String {
    m.iter()
        .map(|(k, n)| format!("{}: {}", k, n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn encoding_name(e: DistanceEncoding) -> &'static str {
    match e {
        DistanceEncoding::Numeric => "numeric",
        DistanceEncoding::String => "string",
        DistanceEncoding::Auto => "auto",
    }
}

fn format_name(f: TimestampFormat) -> &'static str {
    match f {
        TimestampFormat::EpochS => "epoch_s",
        TimestampFormat::EpochMs => "epoch_ms",
        TimestampFormat::EpochAuto => "epoch_auto",
        TimestampFormat::Iso => "iso",
    }
}

impl InspectReport {
    /// Groups present at the source but absent from the catalog.
    pub fn unconfigured(&self) -> impl Iterator<Item = &SensorAnalysis> {
        self.sensors
            .iter()
            .filter(|s| s.status == ConfigStatus::Unconfigured)
    }

    /// Write the plain-text report.
    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let rule = "=".repeat(70);
        writeln!(out, "{}", rule)?;
        writeln!(out, "  Sensor discovery")?;
        writeln!(out, "{}", rule)?;
        writeln!(
            out,
            "Found {} top-level keys: {}",
            self.discovered.len(),
            self.discovered.join(", ")
        )?;

        writeln!(out, "\nCatalog comparison")?;
        for s in &self.sensors {
            let label = match s.status {
                ConfigStatus::Enabled => "enabled",
                ConfigStatus::Disabled => "disabled",
                ConfigStatus::Unconfigured => "NOT in catalog",
            };
            writeln!(out, "  {:<24} {}", s.sensor, label)?;
        }
        for id in &self.missing {
            writeln!(out, "  {:<24} in catalog but NOT found at source", id)?;
        }

        writeln!(out, "\nPer-sensor analysis")?;
        for s in &self.sensors {
            writeln!(out, "\n  {} (~{} records, {} sampled)", s.sensor, s.record_count, s.sampled)?;
            writeln!(out, "    detected type: {}", s.format)?;
            if s.schemas.len() > 1 {
                writeln!(out, "    mixed schemas: {} variants", s.schemas.len())?;
            }
            for (i, (fields, n)) in s.schemas.iter().enumerate() {
                let names: Vec<&str> = fields.iter().map(String::as_str).collect();
                writeln!(out, "    schema {} ({} records): {}", i + 1, n, names.join(", "))?;
            }
            if !s.timestamps.is_empty() {
                writeln!(out, "    timestamps: {}", counts(&s.timestamps))?;
            }
            if !s.distances.is_empty() {
                writeln!(out, "    distance: {}", counts(&s.distances))?;
            }
            if s.sampled == 0 {
                writeln!(out, "    ! no child records found")?;
            }
            if s.non_records > 0 {
                writeln!(out, "    ! {} non-object children", s.non_records)?;
            }
            if !s.unknown_fields.is_empty() {
                let names: Vec<&str> = s.unknown_fields.iter().map(String::as_str).collect();
                writeln!(out, "    unknown fields (ignored): {}", names.join(", "))?;
            }
        }

        for (group, error) in &self.failures {
            writeln!(out, "\n  {}: sampling failed: {}", group, error)?;
        }

        let mut unconfigured = self.unconfigured().peekable();
        if unconfigured.peek().is_some() {
            writeln!(out, "\nSuggested catalog additions:\n")?;
            writeln!(out, "sensors:")?;
            for s in unconfigured {
                let (distance, timestamp) = s.suggested_encodings();
                writeln!(out, "  {}:", s.sensor)?;
                writeln!(out, "    enabled: false")?;
                if let Some(field) = &s.distance_field {
                    writeln!(out, "    fields:")?;
                    writeln!(out, "      distance: {}", field)?;
                }
                writeln!(out, "    distance_encoding: {}", encoding_name(distance))?;
                writeln!(out, "    timestamp_format: {}", format_name(timestamp))?;
            }
        }
        Ok(())
    }
}
