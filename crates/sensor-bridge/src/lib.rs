// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Bridge
//!
//! Replicates flood-sensor telemetry and camera images from a Firebase
//! project into InfluxDB v2.
//!
//! This crate provides:
//! - A record normalizer mapping heterogeneous sensor payloads onto one
//!   point schema
//! - Durable per-sensor cursors with startup recovery from the sink
//! - A telemetry loop polling ordered push keys after each cursor
//! - A media loop publishing new camera images and writing pointer records
//! - A one-shot historical backfill and a source inspection report
//!
//! # Overview
//!
//! ```text
//! RecordSource --> normalize --> SinkWriter --> PointSink (InfluxDB)
//!      ^                             |
//!      +------ CursorStore <---------+  (advanced after a successful write)
//!
//! ArtifactStore --> publish --> SeenCache --> SinkWriter
//! ```
//!
//! Both loops are synchronous and run on their own thread; a shared
//! [`StopHandle`] ends them.

pub mod backfill;
pub mod buffer;
pub mod config;
pub mod cursor;
pub mod influx;
pub mod inspect;
pub mod media;
pub mod normalize;
pub mod recovery;
pub mod sink;
pub mod source;
pub mod telemetry;

pub use config::{BridgeSettings, SensorCatalog, SensorConfig};
pub use cursor::CursorStore;
pub use influx::{LineProtocolWriter, Point};
pub use media::MediaSync;
pub use normalize::{normalize, CanonicalPoint};
pub use sink::{PointSink, SinkWriter};
pub use source::{ArtifactStore, RecordSource};
pub use telemetry::TelemetrySync;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sleep granularity while waiting for a stop request.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Handle to stop the running loops.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Request every loop holding this handle to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` or until stopped. Returns `false` if stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(STOP_POLL.min(deadline - now));
        }
        false
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}
