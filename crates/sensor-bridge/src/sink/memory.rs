// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory sink for tests.
//!
//! Records every accepted batch and answers [`LastValueQuery`] from the
//! points written so far, honouring the lookback window. Clones share state.

use super::{LastValueQuery, PointSink, SinkError};
use crate::influx::{FieldValue, Point};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct SinkState {
    batches: Vec<Vec<Point>>,
    write_calls: usize,
    failing_writes: usize,
    failing_queries: bool,
    queries: Vec<LastValueQuery>,
}

/// Shared in-memory sink.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` batch writes.
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().failing_writes = n;
    }

    /// Make every `query_last` call fail until cleared.
    pub fn fail_queries(&self, failing: bool) {
        self.lock().failing_queries = failing;
    }

    /// Store points as if a previous process had written them.
    pub fn seed(&self, points: Vec<Point>) {
        self.lock().batches.push(points);
    }

    /// Accepted batches, in write order.
    pub fn batches(&self) -> Vec<Vec<Point>> {
        self.lock().batches.clone()
    }

    /// Every accepted point, flattened.
    pub fn points(&self) -> Vec<Point> {
        self.lock().batches.iter().flatten().cloned().collect()
    }

    /// Write attempts, failed ones included.
    pub fn write_calls(&self) -> usize {
        self.lock().write_calls
    }

    /// Queries received.
    pub fn queries(&self) -> Vec<LastValueQuery> {
        self.lock().queries.clone()
    }
}

fn field_text(value: &FieldValue) -> String {
    match value {
        FieldValue::String(s) => s.clone(),
        FieldValue::Integer(i) => i.to_string(),
        FieldValue::Float(f) => f.to_string(),
    }
}

impl PointSink for MemorySink {
    fn write_batch(&self, points: &[Point]) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.write_calls += 1;
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(SinkError::Status {
                status: 503,
                body: "sink unavailable".to_string(),
            });
        }
        state.batches.push(points.to_vec());
        Ok(())
    }

    fn query_last(&self, query: &LastValueQuery) -> Result<Option<String>, SinkError> {
        let mut state = self.lock();
        state.queries.push(query.clone());
        if state.failing_queries {
            return Err(SinkError::Status {
                status: 503,
                body: "query unavailable".to_string(),
            });
        }

        let lookback = ChronoDuration::from_std(query.lookback).unwrap_or(ChronoDuration::MAX);
        let since = Utc::now().checked_sub_signed(lookback);
        let latest = state
            .batches
            .iter()
            .flatten()
            .filter(|p| p.measurement == query.measurement)
            .filter(|p| p.tag_value(&query.tag_key) == Some(query.tag_value.as_str()))
            .filter(|p| since.map_or(true, |since| p.timestamp >= since))
            .filter_map(|p| p.field_value(&query.field).map(|v| (p.timestamp, v)))
            .max_by_key(|(ts, _)| *ts);

        Ok(latest.map(|(_, v)| field_text(v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reading(sensor: &str, key: &str, age_days: i64) -> Point {
        Point::new("sensor_reading", Utc::now() - ChronoDuration::days(age_days))
            .tag("sensor_id", sensor)
            .field("source_key", FieldValue::String(key.to_string()))
    }

    fn query(sensor: &str) -> LastValueQuery {
        LastValueQuery {
            measurement: "sensor_reading".into(),
            tag_key: "sensor_id".into(),
            tag_value: sensor.into(),
            field: "source_key".into(),
            lookback: Duration::from_secs(30 * 86_400),
        }
    }

    #[test]
    fn test_query_last_picks_newest_in_window() {
        let sink = MemorySink::new();
        sink.seed(vec![
            reading("flood1", "-Ka001", 3),
            reading("flood1", "-Ka002", 1),
            reading("flood2", "-Kb009", 0),
        ]);

        assert_eq!(sink.query_last(&query("flood1")).unwrap().as_deref(), Some("-Ka002"));
        assert_eq!(sink.query_last(&query("absent")).unwrap(), None);
        assert_eq!(sink.queries().len(), 2);
    }

    #[test]
    fn test_query_last_ignores_points_outside_window() {
        let sink = MemorySink::new();
        sink.seed(vec![reading("flood1", "-Ka001", 45)]);
        assert_eq!(sink.query_last(&query("flood1")).unwrap(), None);
    }

    #[test]
    fn test_injected_write_failures() {
        let sink = MemorySink::new();
        sink.fail_next_writes(1);
        let batch = vec![reading("s", "-k", 0)];

        assert!(sink.write_batch(&batch).is_err());
        assert!(sink.write_batch(&batch).is_ok());
        assert_eq!(sink.write_calls(), 2);
        assert_eq!(sink.points().len(), 1);
    }

    #[test]
    fn test_injected_query_failure() {
        let sink = MemorySink::new();
        sink.fail_queries(true);
        assert!(sink.query_last(&query("flood1")).is_err());
        sink.fail_queries(false);
        assert!(sink.query_last(&query("flood1")).is_ok());
    }
}
