// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series sink.
//!
//! [`PointSink`] is the boundary to the time-series store: a batch write
//! that succeeds or fails as a unit, and a "last value" query used by
//! cursor recovery. [`SinkWriter`] is the thin layer the sync loops and the
//! backfill write through.

pub mod influxdb;
pub mod memory;

pub use influxdb::InfluxSink;
pub use memory::MemorySink;

use crate::buffer::BatchBuffer;
use crate::influx::Point;
use std::time::Duration;
use thiserror::Error;

/// Sink-side errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sink returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid query response: {0}")]
    Query(String),

    #[error("invalid URL: {0}")]
    Url(String),
}

/// Most recent value of one field of one tagged series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastValueQuery {
    pub measurement: String,
    pub tag_key: String,
    pub tag_value: String,
    pub field: String,
    /// How far back to look.
    pub lookback: Duration,
}

/// Writes points to, and reads markers back from, the time-series store.
pub trait PointSink {
    /// Write all points in one request. Fails as a unit.
    fn write_batch(&self, points: &[Point]) -> Result<(), SinkError>;

    /// Latest value matching `query`, or `None` if the window has no data.
    fn query_last(&self, query: &LastValueQuery) -> Result<Option<String>, SinkError>;
}

/// Batch writer shared by the sync loops and the backfill.
pub struct SinkWriter<S> {
    sink: S,
}

impl<S: PointSink> SinkWriter<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Underlying sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Write `points` as a single batch. Returns the number of points written.
    ///
    /// An empty slice is a no-op and does not reach the sink.
    pub fn write(&self, points: &[Point]) -> Result<usize, SinkError> {
        if points.is_empty() {
            return Ok(0);
        }
        self.sink.write_batch(points)?;
        Ok(points.len())
    }

    /// Write `points` in batches of at most `batch_size`.
    ///
    /// Stops at the first failed batch; the error carries no count, so
    /// callers that need partial progress should log per batch.
    pub fn write_chunked(&self, points: Vec<Point>, batch_size: usize) -> Result<usize, SinkError> {
        let mut buffer = BatchBuffer::new(batch_size);
        let mut written = 0;
        for point in points {
            if let Some(batch) = buffer.add(point) {
                written += self.write(&batch)?;
                tracing::debug!(written, "Flushed batch");
            }
        }
        written += self.write(&buffer.flush())?;
        Ok(written)
    }

    /// Forwarded to the sink.
    pub fn query_last(&self, query: &LastValueQuery) -> Result<Option<String>, SinkError> {
        self.sink.query_last(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::influx::FieldValue;
    use chrono::{TimeZone, Utc};

    fn points(n: i64) -> Vec<Point> {
        (0..n)
            .map(|i| {
                Point::new("m", Utc.timestamp_opt(i, 0).unwrap()).field("v", FieldValue::Integer(i))
            })
            .collect()
    }

    #[test]
    fn test_write_empty_skips_sink() {
        let sink = MemorySink::new();
        let writer = SinkWriter::new(sink.clone());
        assert_eq!(writer.write(&[]).unwrap(), 0);
        assert_eq!(sink.write_calls(), 0);
    }

    #[test]
    fn test_write_is_one_batch() {
        let sink = MemorySink::new();
        let writer = SinkWriter::new(sink.clone());
        assert_eq!(writer.write(&points(7)).unwrap(), 7);
        assert_eq!(sink.batches().len(), 1);
    }

    #[test]
    fn test_write_chunked_splits_batches() {
        let sink = MemorySink::new();
        let writer = SinkWriter::new(sink.clone());
        assert_eq!(writer.write_chunked(points(7), 3).unwrap(), 7);

        let sizes: Vec<usize> = sink.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_write_chunked_stops_on_failure() {
        let sink = MemorySink::new();
        sink.fail_next_writes(1);
        let writer = SinkWriter::new(sink.clone());
        assert!(writer.write_chunked(points(5), 2).is_err());
        assert!(sink.points().is_empty());
    }
}
