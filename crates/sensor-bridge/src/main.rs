// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Bridge CLI
//!
//! Replicate flood-sensor telemetry and camera images into InfluxDB.
//!
//! # Usage
//!
//! ```bash
//! # Continuous sync (telemetry + images)
//! sensor-bridge --config sensor_config.yaml
//!
//! # One-shot historical import
//! sensor-bridge backfill --dry-run
//!
//! # Discover sensors and compare with the catalog
//! sensor-bridge inspect --samples 5
//! ```

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sensor_bridge::backfill::{run_backfill, BackfillOptions};
use sensor_bridge::inspect::inspect;
use sensor_bridge::sink::InfluxSink;
use sensor_bridge::source::{FirebaseDatabase, FirebaseStorage};
use sensor_bridge::telemetry::TelemetryOptions;
use sensor_bridge::{
    BridgeSettings, CursorStore, MediaSync, SensorCatalog, SinkWriter, StopHandle, TelemetrySync,
};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "sensor-bridge")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Replicate Firebase sensor telemetry and images into InfluxDB")]
#[command(long_about = None)]
struct Cli {
    #[command(flatten)]
    conn: Connection,

    /// Log level or filter directive (e.g. "debug", "sensor_bridge=trace")
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
struct Connection {
    /// Realtime database URL
    #[arg(long, env = "FIREBASE_DB_URL")]
    firebase_db_url: Option<String>,

    /// Realtime database auth token
    #[arg(long, env = "FIREBASE_AUTH", hide_env_values = true)]
    firebase_auth: Option<String>,

    /// Storage bucket holding camera images (enables media sync)
    #[arg(long, env = "FIREBASE_STORAGE_BUCKET")]
    storage_bucket: Option<String>,

    /// OAuth access token for the storage API
    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    storage_token: Option<String>,

    /// InfluxDB URL
    #[arg(long, env = "INFLUX_URL")]
    influx_url: Option<String>,

    /// InfluxDB API token
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    influx_token: Option<String>,

    /// InfluxDB organization
    #[arg(long, env = "INFLUX_ORG")]
    influx_org: Option<String>,

    /// InfluxDB bucket
    #[arg(long, env = "INFLUX_BUCKET")]
    influx_bucket: Option<String>,

    /// Sensor catalog (YAML)
    #[arg(short, long, env = "SENSOR_CONFIG", default_value = "sensor_config.yaml")]
    config: PathBuf,

    /// Cursor state file
    #[arg(long, env = "BRIDGE_STATE_FILE", default_value = "bridge_state.json")]
    state_file: PathBuf,

    /// Telemetry poll interval in seconds
    #[arg(long, env = "POLL_INTERVAL", default_value = "1")]
    poll_interval: u64,

    /// Image poll interval in seconds
    #[arg(long, env = "IMAGE_POLL_INTERVAL", default_value = "120")]
    image_interval: u64,

    /// Records fetched per sensor and cycle
    #[arg(long, env = "PAGE_SIZE", default_value = "100")]
    page_size: usize,

    /// How far back to look in InfluxDB when recovering cursors
    #[arg(long, env = "RECOVERY_LOOKBACK_DAYS", default_value = "30")]
    lookback_days: u64,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Continuous telemetry and image sync (default)
    Run,
    /// Import every record from the database once
    Backfill {
        /// Normalize and count without writing
        #[arg(long)]
        dry_run: bool,
        /// Points per write request
        #[arg(long, default_value = "500")]
        batch_size: usize,
    },
    /// Sample every sensor group and compare with the catalog
    Inspect {
        /// Records sampled per group
        #[arg(long, default_value = "3")]
        samples: usize,
    },
    /// Validate settings and the sensor catalog, then exit
    CheckConfig,
}

impl Connection {
    fn settings(&self) -> BridgeSettings {
        BridgeSettings {
            firebase_db_url: self.firebase_db_url.clone(),
            firebase_auth: self.firebase_auth.clone(),
            storage_bucket: self.storage_bucket.clone(),
            storage_token: self.storage_token.clone(),
            influx_url: self.influx_url.clone(),
            influx_token: self.influx_token.clone(),
            influx_org: self.influx_org.clone(),
            influx_bucket: self.influx_bucket.clone(),
            sensor_config: self.config.clone(),
            state_file: self.state_file.clone(),
            poll_interval: Duration::from_secs(self.poll_interval),
            image_poll_interval: Duration::from_secs(self.image_interval),
            page_size: self.page_size,
            recovery_lookback: Duration::from_secs(self.lookback_days * 24 * 3600),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    let settings = cli.conn.settings();
    match cli.command.clone().unwrap_or(Command::Run) {
        Command::Run => run(&settings),
        Command::Backfill {
            dry_run,
            batch_size,
        } => backfill(&settings, dry_run, batch_size),
        Command::Inspect { samples } => inspect_source(&settings, samples),
        Command::CheckConfig => check_config(&settings),
    }
}

fn load_catalog(settings: &BridgeSettings) -> Result<SensorCatalog> {
    let catalog = SensorCatalog::load_or_legacy(&settings.sensor_config).with_context(|| {
        format!(
            "Failed to load sensor catalog {}",
            settings.sensor_config.display()
        )
    })?;
    catalog.validate().context("Invalid sensor catalog")?;
    Ok(catalog)
}

fn open_database(settings: &BridgeSettings) -> Result<FirebaseDatabase> {
    let url = settings.database_url()?;
    FirebaseDatabase::new(url, settings.firebase_auth.clone())
        .context("Failed to create database client")
}

fn run(settings: &BridgeSettings) -> Result<()> {
    settings.validate().context("Invalid settings")?;
    let catalog = load_catalog(settings)?;
    let sensors: Vec<_> = catalog.enabled().cloned().collect();

    let database = open_database(settings)?;
    let sink = InfluxSink::new(settings.influx()?).context("Failed to create InfluxDB client")?;
    let cursors = CursorStore::open(settings.state_file.clone());

    tracing::info!(
        sensors = sensors.len(),
        state_file = %settings.state_file.display(),
        poll_interval_s = settings.poll_interval.as_secs(),
        "Starting sensor bridge"
    );

    let stop_handle = StopHandle::new();
    ctrlc_handler(stop_handle.clone());

    let media = spawn_media(settings, &sensors, sink.clone(), stop_handle.clone())?;

    let options = TelemetryOptions {
        page_size: settings.page_size,
        poll_interval: settings.poll_interval,
        recovery_lookback: settings.recovery_lookback,
    };
    let mut telemetry = TelemetrySync::new(database, sink, sensors, cursors, options);
    if let Err(e) = telemetry.recover() {
        tracing::warn!("Initial checkpoint failed: {}", e);
    }
    telemetry.run(&stop_handle);

    if let Some(handle) = media {
        if handle.join().is_err() {
            tracing::error!("Media sync thread panicked");
        }
    }

    let stats = telemetry.stats();
    tracing::info!(
        cycles = stats.cycles,
        points_written = stats.points_written,
        records_skipped = stats.records_skipped,
        poll_errors = stats.poll_errors,
        write_errors = stats.write_errors,
        "Bridge shutdown complete"
    );
    Ok(())
}

fn spawn_media(
    settings: &BridgeSettings,
    sensors: &[sensor_bridge::SensorConfig],
    sink: InfluxSink,
    stop_handle: StopHandle,
) -> Result<Option<thread::JoinHandle<()>>> {
    let Some(bucket) = settings.storage_bucket.as_deref().filter(|b| !b.is_empty()) else {
        tracing::warn!("FIREBASE_STORAGE_BUCKET not set, image sync disabled");
        return Ok(None);
    };
    let store = FirebaseStorage::new(bucket, settings.storage_token.clone())
        .context("Failed to create storage client")?;
    let mut media = MediaSync::new(store, sink, sensors, settings.image_poll_interval)
        .context("Invalid image view configuration")?;
    if !media.has_views() {
        tracing::warn!("No image views configured, image sync disabled");
        return Ok(None);
    }

    let handle = thread::Builder::new()
        .name("media-sync".to_string())
        .spawn(move || media.run(&stop_handle))
        .context("Failed to spawn media sync thread")?;
    Ok(Some(handle))
}

fn backfill(settings: &BridgeSettings, dry_run: bool, batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        bail!("batch size must be at least 1");
    }
    let catalog = load_catalog(settings)?;
    let database = open_database(settings)?;
    let sink = InfluxSink::new(settings.influx()?).context("Failed to create InfluxDB client")?;
    let writer = SinkWriter::new(sink);

    let options = BackfillOptions {
        batch_size,
        dry_run,
    };
    let report =
        run_backfill(&database, &writer, &catalog, &options).context("Backfill failed")?;
    println!(
        "Backfill: {} groups, {} records, {} written, {} skipped",
        report.groups, report.records, report.written, report.skipped_records
    );
    Ok(())
}

fn inspect_source(settings: &BridgeSettings, samples: usize) -> Result<()> {
    let catalog = SensorCatalog::load_or_legacy(&settings.sensor_config).unwrap_or_else(|e| {
        tracing::warn!("Catalog unavailable ({}), comparing against legacy sensors", e);
        SensorCatalog::legacy()
    });
    let database = open_database(settings)?;
    let report = inspect(&database, &catalog, samples).context("Inspection failed")?;
    let stdout = std::io::stdout();
    report
        .render(&mut stdout.lock())
        .context("Failed to write report")?;
    Ok(())
}

fn check_config(settings: &BridgeSettings) -> Result<()> {
    settings.validate().context("Invalid settings")?;
    let catalog = load_catalog(settings)?;
    println!("Settings OK");
    for sensor in catalog.all() {
        let views: Vec<&str> = sensor.views.keys().map(String::as_str).collect();
        println!(
            "  {:<24} {:<8} views: {}",
            sensor.id,
            if sensor.enabled { "enabled" } else { "disabled" },
            if views.is_empty() {
                "-".to_string()
            } else {
                views.join(", ")
            }
        );
    }
    Ok(())
}

/// Setup Ctrl+C handler.
fn ctrlc_handler(stop_handle: StopHandle) {
    let _ = ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, shutting down...");
        stop_handle.stop();
    });
}
