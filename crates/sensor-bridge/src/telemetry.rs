// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry sync loop.
//!
//! Each cycle visits every enabled sensor in turn:
//!
//! 1. fetch up to `page_size` records starting at the cursor (inclusive),
//!    or the newest page when the cursor is `null`;
//! 2. drop keys at or before the cursor;
//! 3. normalize the rest, skipping records that are not objects;
//! 4. write all points in one batch;
//! 5. on success only, advance the cursor to the last key of the page.
//!
//! A failed write leaves the cursor in place, so the same page is fetched
//! again next cycle. Records that fail normalization are passed over for
//! good: the cursor moves past them with the rest of the page.

use crate::config::SensorConfig;
use crate::cursor::{CursorError, CursorStore};
use crate::influx::Point;
use crate::normalize::normalize_at;
use crate::recovery::{CursorRecovery, RecoveryError, Resolution};
use crate::sink::{PointSink, SinkError, SinkWriter};
use crate::source::{RecordSource, SourceError};
use crate::StopHandle;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;

/// Errors from one sensor poll. Never fatal to the loop.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source: {0}")]
    Source(#[from] SourceError),

    #[error("sink: {0}")]
    Sink(#[from] SinkError),

    #[error("cursor recovery: {0}")]
    Recovery(#[from] RecoveryError),
}

/// Result of polling one sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing after the cursor.
    UpToDate,
    /// A page was delivered and the cursor moved to `cursor`.
    Delivered {
        written: usize,
        skipped: usize,
        cursor: String,
    },
}

/// Loop settings.
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    pub page_size: usize,
    pub poll_interval: Duration,
    pub recovery_lookback: Duration,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            poll_interval: Duration::from_secs(1),
            recovery_lookback: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Telemetry loop statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TelemetryStats {
    /// Completed cycles.
    pub cycles: u64,
    /// Points accepted by the sink.
    pub points_written: u64,
    /// Records skipped as malformed.
    pub records_skipped: u64,
    /// Failed source reads or recoveries.
    pub poll_errors: u64,
    /// Failed batch writes.
    pub write_errors: u64,
}

/// Cursor-driven telemetry replication.
pub struct TelemetrySync<R, S> {
    source: R,
    writer: SinkWriter<S>,
    sensors: Vec<SensorConfig>,
    cursors: CursorStore,
    options: TelemetryOptions,
    stats: TelemetryStats,
}

impl<R: RecordSource, S: PointSink> TelemetrySync<R, S> {
    /// Build the loop over `sensors`. Disabled sensors are ignored.
    pub fn new(
        source: R,
        sink: S,
        sensors: Vec<SensorConfig>,
        cursors: CursorStore,
        options: TelemetryOptions,
    ) -> Self {
        let sensors = sensors.into_iter().filter(|s| s.enabled).collect();
        Self {
            source,
            writer: SinkWriter::new(sink),
            sensors,
            cursors,
            options,
            stats: TelemetryStats::default(),
        }
    }

    pub fn stats(&self) -> &TelemetryStats {
        &self.stats
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    /// Sensor ids in polling order.
    pub fn sensor_ids(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(|s| s.id.as_str())
    }

    /// Resolve cursors for every sensor and write the initial checkpoint.
    ///
    /// Resolved cursors are kept in memory even if the checkpoint fails.
    pub fn recover(&mut self) -> Result<Vec<Resolution>, CursorError> {
        let recovery = CursorRecovery::new(
            &self.source,
            self.writer.sink(),
            self.options.recovery_lookback,
        );
        let ids = self.sensors.iter().map(|s| s.id.as_str());
        recovery.resolve_all(ids, &mut self.cursors)
    }

    /// Poll one sensor once.
    pub fn poll_sensor(&mut self, sensor: &SensorConfig) -> Result<PollOutcome, SyncError> {
        let id = sensor.id.as_str();

        if !self.cursors.contains(id) {
            let recovery = CursorRecovery::new(
                &self.source,
                self.writer.sink(),
                self.options.recovery_lookback,
            );
            let resolution = recovery.resolve(id, &self.cursors)?;
            tracing::info!(sensor = %id, tier = ?resolution.tier, "Cursor resolved");
            self.cursors.set(id, resolution.cursor);
            if let Err(e) = self.cursors.checkpoint() {
                tracing::warn!(sensor = %id, "Cursor checkpoint failed: {}", e);
            }
        }

        let cursor = self.cursors.get(id).map(str::to_string);
        let page = match cursor.as_deref() {
            Some(start) => self.source.range_from(id, start, self.options.page_size)?,
            None => self.source.latest(id, self.options.page_size)?,
        };

        let fresh: Vec<_> = page
            .iter()
            .filter(|(key, _)| cursor.as_deref().map_or(true, |c| key.as_str() > c))
            .collect();
        let Some((last_key, _)) = fresh.last() else {
            return Ok(PollOutcome::UpToDate);
        };
        let last_key = last_key.to_string();

        let now = Utc::now();
        let mut points: Vec<Point> = Vec::with_capacity(fresh.len());
        let mut skipped = 0;
        for (key, record) in &fresh {
            match normalize_at(key, record, sensor, now) {
                Ok(point) => points.push(point.to_point()),
                Err(e) => {
                    tracing::warn!(sensor = %id, key = %key, "Skipping record: {}", e);
                    skipped += 1;
                }
            }
        }

        let written = self.writer.write(&points)?;
        self.stats.points_written += written as u64;
        self.stats.records_skipped += skipped as u64;

        if let Err(e) = self.cursors.advance(id, &last_key) {
            tracing::warn!(sensor = %id, "Cursor advanced but not persisted: {}", e);
        }

        Ok(PollOutcome::Delivered {
            written,
            skipped,
            cursor: last_key,
        })
    }

    /// Poll every sensor once. Returns the number of points written.
    pub fn run_cycle(&mut self, stop: &StopHandle) -> usize {
        let sensors = std::mem::take(&mut self.sensors);
        let mut total = 0;

        for sensor in &sensors {
            if !stop.is_running() {
                break;
            }
            match self.poll_sensor(sensor) {
                Ok(PollOutcome::Delivered {
                    written,
                    skipped,
                    cursor,
                }) => {
                    total += written;
                    tracing::info!(
                        sensor = %sensor.id,
                        written,
                        skipped,
                        cursor = %cursor,
                        "Delivered telemetry page"
                    );
                }
                Ok(PollOutcome::UpToDate) => {
                    tracing::debug!(sensor = %sensor.id, "Up to date");
                }
                Err(SyncError::Sink(e)) => {
                    self.stats.write_errors += 1;
                    tracing::error!(sensor = %sensor.id, "Write failed, page will be retried: {}", e);
                }
                Err(SyncError::Source(e)) => {
                    self.stats.poll_errors += 1;
                    tracing::warn!(sensor = %sensor.id, "Poll failed: {}", e);
                }
                Err(SyncError::Recovery(e)) => {
                    self.stats.poll_errors += 1;
                    tracing::warn!(sensor = %sensor.id, "Cursor unresolved, will retry: {}", e);
                }
            }
        }

        self.sensors = sensors;
        self.stats.cycles += 1;
        total
    }

    /// Run until `stop` is triggered.
    pub fn run(&mut self, stop: &StopHandle) {
        tracing::info!(
            sensors = self.sensors.len(),
            interval_ms = self.options.poll_interval.as_millis() as u64,
            "Telemetry sync started"
        );
        while stop.is_running() {
            self.run_cycle(stop);
            stop.sleep(self.options.poll_interval);
        }
        tracing::info!(
            cycles = self.stats.cycles,
            points_written = self.stats.points_written,
            records_skipped = self.stats.records_skipped,
            "Telemetry sync stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::source::MemorySource;
    use serde_json::json;

    fn sensor(id: &str) -> SensorConfig {
        SensorConfig {
            enabled: true,
            ..SensorConfig::unconfigured(id)
        }
    }

    fn sync(
        source: &MemorySource,
        sink: &MemorySink,
        sensors: Vec<SensorConfig>,
        cursors: CursorStore,
    ) -> TelemetrySync<MemorySource, MemorySink> {
        TelemetrySync::new(
            source.clone(),
            sink.clone(),
            sensors,
            cursors,
            TelemetryOptions::default(),
        )
    }

    #[test]
    fn test_cursor_only_page_is_up_to_date() {
        let source = MemorySource::new();
        source.push("flood1", "-Ka001", json!({"dist_cm": 1}));
        let sink = MemorySink::new();
        let mut cursors = CursorStore::in_memory();
        cursors.set("flood1", Some("-Ka001".into()));

        let mut sync = sync(&source, &sink, vec![sensor("flood1")], cursors);
        let outcome = sync.poll_sensor(&sensor("flood1")).unwrap();
        assert_eq!(outcome, PollOutcome::UpToDate);
        assert_eq!(sink.write_calls(), 0);
    }

    #[test]
    fn test_null_cursor_takes_newest_page() {
        let source = MemorySource::new();
        for i in 1..=3 {
            source.push("flood1", &format!("-Ka00{}", i), json!({"dist_cm": i}));
        }
        let sink = MemorySink::new();
        let mut cursors = CursorStore::in_memory();
        cursors.set("flood1", None);

        let mut sync = sync(&source, &sink, vec![sensor("flood1")], cursors);
        let outcome = sync.poll_sensor(&sensor("flood1")).unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Delivered {
                written: 3,
                skipped: 0,
                cursor: "-Ka003".into()
            }
        );
        assert_eq!(sync.cursors().get("flood1"), Some("-Ka003"));
    }

    #[test]
    fn test_poison_page_still_advances() {
        let source = MemorySource::new();
        source.push("flood1", "-Ka001", json!({"dist_cm": 1}));
        source.push("flood1", "-Ka002", json!("garbage"));
        source.push("flood1", "-Ka003", json!(17));
        let sink = MemorySink::new();
        let mut cursors = CursorStore::in_memory();
        cursors.set("flood1", Some("-Ka001".into()));

        let mut sync = sync(&source, &sink, vec![sensor("flood1")], cursors);
        let outcome = sync.poll_sensor(&sensor("flood1")).unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Delivered {
                written: 0,
                skipped: 2,
                cursor: "-Ka003".into()
            }
        );
        assert_eq!(sink.write_calls(), 0);
        assert_eq!(sync.stats().records_skipped, 2);
    }

    #[test]
    fn test_unresolved_sensor_is_recovered_on_poll() {
        let source = MemorySource::new();
        source.push("flood1", "-Ka001", json!({"dist_cm": 1}));
        source.push("flood1", "-Ka002", json!({"dist_cm": 2}));
        let sink = MemorySink::new();

        let mut sync = sync(&source, &sink, vec![sensor("flood1")], CursorStore::in_memory());
        // Fresh start: cursor jumps to the newest key, nothing replayed
        assert_eq!(
            sync.poll_sensor(&sensor("flood1")).unwrap(),
            PollOutcome::UpToDate
        );
        assert_eq!(sync.cursors().get("flood1"), Some("-Ka002"));
        assert!(sink.points().is_empty());
    }

    #[test]
    fn test_sink_outage_at_startup_does_not_skip_records() {
        let source = MemorySource::new();
        for key in ["-Ka001", "-Ka002", "-Ka003", "-Ka004", "-Ka005"] {
            source.push("flood1", key, json!({"dist_cm": 1}));
        }
        let sink = MemorySink::new();
        sink.seed(vec![Point::new(crate::normalize::TELEMETRY_MEASUREMENT, Utc::now())
            .tag("sensor_id", "flood1")
            .field("source_key", crate::influx::FieldValue::String("-Ka002".into()))]);
        sink.fail_queries(true);

        let mut sync = sync(&source, &sink, vec![sensor("flood1")], CursorStore::in_memory());
        assert!(sync.recover().unwrap().is_empty());
        assert!(!sync.cursors().contains("flood1"));

        let stop = StopHandle::new();
        assert_eq!(sync.run_cycle(&stop), 0);
        assert!(!sync.cursors().contains("flood1"));
        assert_eq!(sync.stats().poll_errors, 1);

        sink.fail_queries(false);
        assert_eq!(sync.run_cycle(&stop), 3);
        assert_eq!(sync.cursors().get("flood1"), Some("-Ka005"));
        let keys: Vec<String> = sink
            .points()
            .iter()
            .filter_map(|p| p.field_value("source_key").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect();
        assert_eq!(keys, vec!["-Ka002", "-Ka003", "-Ka004", "-Ka005"]);
    }

    #[test]
    fn test_failing_sensor_does_not_block_others() {
        let source = MemorySource::new();
        source.push("a", "-k1", json!({"dist_cm": 1}));
        source.push("a", "-k2", json!({"dist_cm": 2}));
        source.push("b", "-k1", json!({"dist_cm": 1}));
        source.push("b", "-k2", json!({"dist_cm": 2}));
        let sink = MemorySink::new();
        let mut cursors = CursorStore::in_memory();
        cursors.set("a", Some("-k1".into()));
        cursors.set("b", Some("-k1".into()));

        let mut sync = sync(&source, &sink, vec![sensor("a"), sensor("b")], cursors);
        source.fail_next_read("a");
        let stop = StopHandle::new();
        assert_eq!(sync.run_cycle(&stop), 1);

        assert_eq!(sync.cursors().get("a"), Some("-k1"));
        assert_eq!(sync.cursors().get("b"), Some("-k2"));
        assert_eq!(sync.stats().poll_errors, 1);
        assert_eq!(sync.stats().cycles, 1);
    }

    #[test]
    fn test_disabled_sensors_are_not_polled() {
        let source = MemorySource::new();
        let sink = MemorySink::new();
        let disabled = SensorConfig::unconfigured("off");
        let sync = sync(&source, &sink, vec![disabled, sensor("on")], CursorStore::in_memory());
        assert_eq!(sync.sensor_ids().collect::<Vec<_>>(), vec!["on"]);
    }
}
