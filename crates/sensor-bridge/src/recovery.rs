// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Startup cursor recovery.
//!
//! For each sensor, the first tier that yields an answer wins:
//!
//! 1. **Local file**: an entry in the cursor file, even a `null` one.
//! 2. **Sink**: the `source_key` of the newest telemetry point tagged with
//!    the sensor, within the lookback window. Records older than the window
//!    are invisible here, so a sensor silent for longer than the window
//!    restarts from tier 3 and never replays that history.
//! 3. **Fresh start**: the key of the newest record at the source, so no
//!    backlog is replayed on a first run. An empty group resolves to `null`.
//!
//! Tier 3 is only taken when the sink answers with no data. A failed sink
//! query or a source error in tier 3 leaves the sensor unresolved; the
//! telemetry loop retries resolution before polling it.

use crate::cursor::{CursorError, CursorStore};
use crate::normalize::TELEMETRY_MEASUREMENT;
use crate::sink::{LastValueQuery, PointSink, SinkError};
use crate::source::{RecordSource, SourceError};
use std::time::Duration;
use thiserror::Error;

/// Resolution failed; the sensor stays unresolved.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("sink query: {0}")]
    Sink(#[from] SinkError),

    #[error("source: {0}")]
    Source(#[from] SourceError),
}

/// Which tier produced a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTier {
    LocalFile,
    Sink,
    FreshStart,
    /// The source group has no records yet.
    Empty,
}

/// Outcome of resolving one sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub sensor: String,
    pub tier: RecoveryTier,
    pub cursor: Option<String>,
}

/// Cursor recovery resolver.
pub struct CursorRecovery<'a, R: ?Sized, S: ?Sized> {
    source: &'a R,
    sink: &'a S,
    lookback: Duration,
}

impl<'a, R, S> CursorRecovery<'a, R, S>
where
    R: RecordSource + ?Sized,
    S: PointSink + ?Sized,
{
    pub fn new(source: &'a R, sink: &'a S, lookback: Duration) -> Self {
        Self {
            source,
            sink,
            lookback,
        }
    }

    /// Resolve one sensor without touching the store.
    pub fn resolve(&self, sensor: &str, store: &CursorStore) -> Result<Resolution, RecoveryError> {
        let resolution = |tier, cursor: Option<String>| Resolution {
            sensor: sensor.to_string(),
            tier,
            cursor,
        };

        if store.contains(sensor) {
            return Ok(resolution(
                RecoveryTier::LocalFile,
                store.get(sensor).map(str::to_string),
            ));
        }

        if let Some(key) = self.from_sink(sensor)? {
            return Ok(resolution(RecoveryTier::Sink, Some(key)));
        }

        let newest = self.source.latest(sensor, 1)?;
        Ok(match newest.into_keys().next_back() {
            Some(key) => resolution(RecoveryTier::FreshStart, Some(key)),
            None => resolution(RecoveryTier::Empty, None),
        })
    }

    fn from_sink(&self, sensor: &str) -> Result<Option<String>, SinkError> {
        let query = LastValueQuery {
            measurement: TELEMETRY_MEASUREMENT.to_string(),
            tag_key: "sensor_id".to_string(),
            tag_value: sensor.to_string(),
            field: "source_key".to_string(),
            lookback: self.lookback,
        };
        Ok(self.sink.query_last(&query)?.filter(|v| !v.is_empty()))
    }

    /// Resolve every sensor missing from `store`, record the results in it
    /// and write the initial checkpoint.
    ///
    /// Sensors whose resolution failed are left out of both the store and
    /// the returned list. The store is updated even if the checkpoint fails.
    pub fn resolve_all<'s, I>(
        &self,
        sensors: I,
        store: &mut CursorStore,
    ) -> Result<Vec<Resolution>, CursorError>
    where
        I: IntoIterator<Item = &'s str>,
    {
        let mut resolved = Vec::new();
        for sensor in sensors {
            match self.resolve(sensor, store) {
                Ok(resolution) => {
                    tracing::info!(
                        sensor = %sensor,
                        tier = ?resolution.tier,
                        cursor = resolution.cursor.as_deref().unwrap_or("<none>"),
                        "Cursor resolved"
                    );
                    store.set(sensor, resolution.cursor.clone());
                    resolved.push(resolution);
                }
                Err(e) => {
                    tracing::warn!(sensor = %sensor, "Cursor unresolved, will retry: {}", e);
                }
            }
        }
        store.checkpoint()?;
        Ok(resolved)
    }
}
