// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Media sync loop.
//!
//! Image listings are not ordered by arrival, so instead of a cursor each
//! (sensor, view) keeps a [`SeenCache`] of object names already ingested.
//! Per cycle and view:
//!
//! 1. list today's and yesterday's date folders (or the flat prefix);
//! 2. keep objects that are not folders, not seen, and match the glob;
//! 3. publish each one, mark it seen, and build a pointer point;
//! 4. write the view's points in one batch, un-marking them on failure.
//!
//! Publishing is repeatable, so an object is marked seen as soon as it is
//! public. A failed write is not, so its objects are listed again next cycle.

pub mod filter;
pub mod seen;
pub mod timestamp;

pub use filter::FilenameFilter;
pub use seen::{SeenCache, ViewKey};
pub use timestamp::{FilenameTimestamp, TimestampStrategy};

use crate::config::{ConfigError, MediaViewConfig, SensorConfig};
use crate::influx::{FieldValue, Point};
use crate::sink::{PointSink, SinkWriter};
use crate::source::{Artifact, ArtifactStore};
use crate::telemetry::SyncError;
use crate::StopHandle;
use chrono::{Days, Local, NaiveDate, Utc};
use std::time::Duration;

/// Measurement name of image pointer points.
pub const IMAGE_MEASUREMENT: &str = "sensor_image";

/// Listing prefixes for one view, each with its date partition.
///
/// Date-partitioned views scan `<prefix>/<today>/` and
/// `<prefix>/<yesterday>/`; flat views scan `<prefix>/`.
pub fn scan_prefixes(
    prefix: &str,
    date_folders: bool,
    today: NaiveDate,
) -> Vec<(String, Option<NaiveDate>)> {
    let base = prefix.trim_end_matches('/');
    let join = |tail: &str| {
        if base.is_empty() {
            tail.to_string()
        } else {
            format!("{}/{}", base, tail)
        }
    };

    if !date_folders {
        return vec![(join(""), None)];
    }
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    [today, yesterday]
        .into_iter()
        .map(|date| (join(&format!("{}/", date.format("%Y-%m-%d"))), Some(date)))
        .collect()
}

/// A configured view, compiled for polling.
#[derive(Debug, Clone)]
struct MediaView {
    key: ViewKey,
    prefix: String,
    date_folders: bool,
    filter: FilenameFilter,
    timestamp: Option<FilenameTimestamp>,
}

impl MediaView {
    fn compile(sensor: &str, name: &str, cfg: &MediaViewConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            key: ViewKey::new(sensor, name),
            prefix: cfg.prefix.clone(),
            date_folders: cfg.date_folders,
            filter: FilenameFilter::new(&cfg.filename_pattern),
            timestamp: cfg.filename_timestamp()?,
        })
    }
}

/// Result of polling one view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewOutcome {
    /// New objects that passed the filters.
    pub candidates: usize,
    /// Pointer points written.
    pub written: usize,
    /// Objects that could not be published (retried next cycle).
    pub publish_failures: usize,
    /// Prefixes whose listing failed.
    pub list_failures: usize,
}

/// Media loop statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MediaStats {
    pub cycles: u64,
    pub images_ingested: u64,
    pub publish_errors: u64,
    pub list_errors: u64,
    pub write_errors: u64,
    /// Seen-cache entries evicted with their partition.
    pub evicted: u64,
}

/// Seen-set driven image replication.
pub struct MediaSync<A, S> {
    store: A,
    writer: SinkWriter<S>,
    views: Vec<MediaView>,
    seen: SeenCache,
    interval: Duration,
    stats: MediaStats,
}

impl<A: ArtifactStore, S: PointSink> MediaSync<A, S> {
    /// Build the loop from the views of every enabled sensor.
    pub fn new(
        store: A,
        sink: S,
        sensors: &[SensorConfig],
        interval: Duration,
    ) -> Result<Self, ConfigError> {
        let mut views = Vec::new();
        for sensor in sensors.iter().filter(|s| s.enabled) {
            for (name, cfg) in &sensor.views {
                views.push(MediaView::compile(&sensor.id, name, cfg)?);
            }
        }
        Ok(Self {
            store,
            writer: SinkWriter::new(sink),
            views,
            seen: SeenCache::new(),
            interval,
            stats: MediaStats::default(),
        })
    }

    /// Configured views, in polling order.
    pub fn view_keys(&self) -> impl Iterator<Item = &ViewKey> {
        self.views.iter().map(|v| &v.key)
    }

    pub fn has_views(&self) -> bool {
        !self.views.is_empty()
    }

    pub fn seen(&self) -> &SeenCache {
        &self.seen
    }

    pub fn stats(&self) -> &MediaStats {
        &self.stats
    }

    /// Poll the view identified by `key` once, as of `today`.
    ///
    /// Returns `None` if no such view is configured.
    pub fn poll_view(
        &mut self,
        key: &ViewKey,
        today: NaiveDate,
    ) -> Option<Result<ViewOutcome, SyncError>> {
        let view = self.views.iter().find(|v| &v.key == key)?.clone();
        Some(self.poll(&view, today))
    }

    fn poll(&mut self, view: &MediaView, today: NaiveDate) -> Result<ViewOutcome, SyncError> {
        let key = &view.key;
        let mut outcome = ViewOutcome::default();

        let mut candidates: Vec<(Artifact, Option<NaiveDate>)> = Vec::new();
        for (prefix, partition) in scan_prefixes(&view.prefix, view.date_folders, today) {
            match self.store.list(&prefix) {
                Ok(listed) => candidates.extend(
                    listed
                        .into_iter()
                        .filter(|a| !a.is_directory())
                        .filter(|a| !self.seen.contains(key, &a.name))
                        .filter(|a| view.filter.matches(a.basename()))
                        .map(|a| (a, partition)),
                ),
                Err(e) => {
                    outcome.list_failures += 1;
                    tracing::warn!(view = %key, prefix = %prefix, "Listing failed: {}", e);
                }
            }
        }
        outcome.candidates = candidates.len();

        let mut points = Vec::with_capacity(candidates.len());
        let mut marked = Vec::with_capacity(candidates.len());
        for (artifact, partition) in candidates {
            let url = match self.store.publish(&artifact) {
                Ok(url) => url,
                Err(e) => {
                    outcome.publish_failures += 1;
                    tracing::warn!(view = %key, object = %artifact.name, "Publish failed: {}", e);
                    continue;
                }
            };
            self.seen.insert(key, artifact.name.clone(), partition);

            let basename = artifact.basename();
            let from_name = view
                .timestamp
                .as_ref()
                .and_then(|t| t.extract(basename, partition.unwrap_or(today)));
            if view.timestamp.is_some() && from_name.is_none() {
                tracing::debug!(view = %key, file = %basename, "No timestamp in file name");
            }
            let ts = from_name.or(artifact.created).unwrap_or_else(Utc::now);

            points.push(
                Point::new(IMAGE_MEASUREMENT, ts)
                    .tag("sensor_id", key.sensor.as_str())
                    .tag("view", key.view.as_str())
                    .field("image_url", FieldValue::String(url))
                    .field("filename", FieldValue::String(basename.to_string())),
            );
            marked.push(artifact.name);
        }

        match self.writer.write(&points) {
            Ok(written) => outcome.written = written,
            Err(e) => {
                for name in &marked {
                    self.seen.remove(key, name);
                }
                return Err(e.into());
            }
        }
        Ok(outcome)
    }

    /// Poll every view once as of `today`. Returns the number of points written.
    pub fn run_cycle_on(&mut self, today: NaiveDate, stop: &StopHandle) -> usize {
        let evicted = self.seen.expire(today);
        if evicted > 0 {
            self.stats.evicted += evicted as u64;
            tracing::debug!(evicted, "Expired seen images from old partitions");
        }

        let views = std::mem::take(&mut self.views);
        let mut total = 0;
        for view in &views {
            if !stop.is_running() {
                break;
            }
            match self.poll(view, today) {
                Ok(outcome) => {
                    self.stats.publish_errors += outcome.publish_failures as u64;
                    self.stats.list_errors += outcome.list_failures as u64;
                    self.stats.images_ingested += outcome.written as u64;
                    total += outcome.written;
                    if outcome.written > 0 {
                        tracing::info!(view = %view.key, count = outcome.written, "Ingested new images");
                    } else {
                        tracing::debug!(view = %view.key, "No new images");
                    }
                }
                Err(e) => {
                    self.stats.write_errors += 1;
                    tracing::error!(view = %view.key, "Image write failed, will retry: {}", e);
                }
            }
        }
        self.views = views;
        self.stats.cycles += 1;
        total
    }

    /// Poll every view once, dated by the local calendar.
    pub fn run_cycle(&mut self, stop: &StopHandle) -> usize {
        self.run_cycle_on(Local::now().date_naive(), stop)
    }

    /// Run until `stop` is triggered.
    pub fn run(&mut self, stop: &StopHandle) {
        tracing::info!(
            views = self.views.len(),
            interval_s = self.interval.as_secs(),
            "Media sync started"
        );
        while stop.is_running() {
            self.run_cycle(stop);
            stop.sleep(self.interval);
        }
        tracing::info!(
            cycles = self.stats.cycles,
            images = self.stats.images_ingested,
            "Media sync stopped"
        );
    }
}
