// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One-shot historical backfill.
//!
//! Reads the whole source snapshot, normalizes every record of every
//! sensor group and writes the result in bounded batches. Cursors are not
//! read or written: running it twice rewrites the same points.

use crate::config::{SensorCatalog, SensorConfig};
use crate::normalize::normalize;
use crate::sink::{PointSink, SinkWriter};
use crate::source::{value_kind, RecordSource, SourceError};
use crate::telemetry::SyncError;
use serde_json::Value;

/// Batch size for backfill writes.
pub const BACKFILL_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub batch_size: usize,
    /// Normalize and count, but do not write.
    pub dry_run: bool,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            batch_size: BACKFILL_BATCH_SIZE,
            dry_run: false,
        }
    }
}

/// Backfill counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    /// Sensor groups processed.
    pub groups: usize,
    /// Top-level children that were not record groups.
    pub skipped_groups: usize,
    /// Records normalized into points.
    pub records: usize,
    /// Records that were not objects.
    pub skipped_records: usize,
    /// Points accepted by the sink.
    pub written: usize,
}

/// Run the backfill against `source`, writing through `writer`.
///
/// Groups with a catalog entry use its mapping, whether enabled or not;
/// other groups use the default mapping.
pub fn run_backfill<R, S>(
    source: &R,
    writer: &SinkWriter<S>,
    catalog: &SensorCatalog,
    options: &BackfillOptions,
) -> Result<BackfillReport, SyncError>
where
    R: RecordSource + ?Sized,
    S: PointSink,
{
    let mut report = BackfillReport::default();

    tracing::info!("Fetching full snapshot (this may take a while)");
    let groups = match source.get("")? {
        Value::Null => {
            tracing::info!("No data found at source");
            return Ok(report);
        }
        Value::Object(groups) => groups,
        other => {
            return Err(SourceError::Malformed(format!(
                "root is a {}, expected an object",
                value_kind(&other)
            ))
            .into())
        }
    };

    let mut points = Vec::new();
    for (group, data) in &groups {
        let Value::Object(records) = data else {
            tracing::warn!(group = %group, kind = value_kind(data), "Unexpected structure, skipping");
            report.skipped_groups += 1;
            continue;
        };
        report.groups += 1;

        let sensor = catalog
            .get(group)
            .cloned()
            .unwrap_or_else(|| SensorConfig::unconfigured(group.as_str()));
        let before = points.len();
        for (key, record) in records {
            match normalize(key, record, &sensor) {
                Ok(point) => points.push(point.to_point()),
                Err(e) => {
                    tracing::warn!(sensor = %group, "Skipping record: {}", e);
                    report.skipped_records += 1;
                }
            }
        }
        tracing::info!(sensor = %group, points = points.len() - before, "Processed sensor");
    }
    report.records = points.len();

    if options.dry_run {
        tracing::info!(points = report.records, "Dry run, nothing written");
        return Ok(report);
    }
    report.written = writer.write_chunked(points, options.batch_size)?;
    tracing::info!(
        written = report.written,
        skipped = report.skipped_records,
        "Backfill complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldMap;
    use crate::influx::FieldValue;
    use crate::sink::MemorySink;
    use crate::source::MemorySource;
    use serde_json::json;

    fn catalog() -> SensorCatalog {
        SensorCatalog::from_sensors(vec![SensorConfig {
            enabled: true,
            fields: FieldMap {
                distance: Some("lvl".into()),
                ..Default::default()
            },
            ..SensorConfig::unconfigured("flood1")
        }])
    }

    #[test]
    fn test_backfill_all_groups() {
        let source = MemorySource::new();
        source.push("flood1", "-a1", json!({"lvl": 10, "timestamp": 1_700_000_000}));
        source.push("flood1", "-a2", json!({"lvl": 11, "timestamp": 1_700_000_060}));
        source.push("other", "-b1", json!({"dist_cm": "R0042", "timestamp": 1_700_000_000}));
        source.push("other", "-b2", json!(3));
        source.set_group("meta", json!("v2"));

        let sink = MemorySink::new();
        let writer = SinkWriter::new(sink.clone());
        let options = BackfillOptions {
            batch_size: 2,
            ..Default::default()
        };
        let report = run_backfill(&source, &writer, &catalog(), &options).unwrap();

        assert_eq!(
            report,
            BackfillReport {
                groups: 2,
                skipped_groups: 1,
                records: 3,
                skipped_records: 1,
                written: 3,
            }
        );
        assert_eq!(sink.batches().len(), 2);

        let other = sink
            .points()
            .into_iter()
            .find(|p| p.tag_value("sensor_id") == Some("other"))
            .unwrap();
        assert_eq!(other.field_value("distance_cm"), Some(&FieldValue::Integer(42)));
    }

    #[test]
    fn test_backfill_dry_run_and_empty_source() {
        let source = MemorySource::new();
        let sink = MemorySink::new();
        let writer = SinkWriter::new(sink.clone());

        let report = run_backfill(&source, &writer, &catalog(), &BackfillOptions::default()).unwrap();
        assert_eq!(report, BackfillReport::default());

        source.push("flood1", "-a1", json!({"lvl": 10}));
        let options = BackfillOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run_backfill(&source, &writer, &catalog(), &options).unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.written, 0);
        assert_eq!(sink.write_calls(), 0);
    }
}
