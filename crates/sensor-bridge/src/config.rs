// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Two layers:
//! - the sensor catalog, a YAML document describing every sensor group,
//!   its field mapping and its camera views;
//! - process settings (endpoints, credentials, intervals) supplied through
//!   the command line or the environment.

use crate::media::timestamp::{FilenameTimestamp, TimestampStrategy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Sensor groups used when no catalog file is present.
pub const LEGACY_SENSORS: [&str; 3] = ["floodmonitor1", "floodmonitor2", "LoRaWAN"];

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the distance reading is encoded by a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceEncoding {
    /// Plain number, truncated to an integer.
    Numeric,
    /// First run of digits in the string form (`"R0231"` -> 231).
    String,
    /// Dispatch on the runtime type of the value.
    #[default]
    Auto,
}

/// How the record timestamp is encoded by a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    /// Seconds since the Unix epoch.
    EpochS,
    /// Milliseconds since the Unix epoch.
    EpochMs,
    /// Milliseconds above 1e11, seconds otherwise.
    #[default]
    EpochAuto,
    /// Date/time string.
    Iso,
}

/// Logical field -> source field name. `None` means "use the fallback chain".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FieldMap {
    pub distance: Option<String>,
    pub battery: Option<String>,
    pub solar: Option<String>,
    pub timestamp: Option<String>,
}

impl FieldMap {
    /// Source field carrying the timestamp.
    pub fn timestamp_field(&self) -> &str {
        self.timestamp.as_deref().unwrap_or("timestamp")
    }
}

/// Where the timestamp of a camera image comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TimestampSource {
    /// The object's creation time in the storage bucket.
    #[default]
    #[serde(rename = "blob", alias = "blob-metadata", alias = "blob_metadata")]
    BlobMetadata,
    /// Parsed out of the file name with `timestamp_regex`.
    #[serde(rename = "filename")]
    Filename,
}

/// One camera view of a sensor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MediaViewConfig {
    /// Listing prefix inside the storage bucket.
    pub prefix: String,
    /// Images live in `<prefix>/YYYY-MM-DD/` subfolders.
    pub date_folders: bool,
    /// Case-insensitive glob applied to the file name.
    pub filename_pattern: String,
    pub timestamp_source: TimestampSource,
    /// Regex whose capture groups hold the timestamp.
    pub timestamp_regex: Option<String>,
    /// `epoch_s`, `epoch_ms`, or absent for positional date/time groups.
    pub timestamp_format: Option<String>,
}

impl Default for MediaViewConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            date_folders: true,
            filename_pattern: "*.jpg".to_string(),
            timestamp_source: TimestampSource::BlobMetadata,
            timestamp_regex: None,
            timestamp_format: None,
        }
    }
}

impl MediaViewConfig {
    /// Compile the filename timestamp extractor, if this view uses one.
    pub fn filename_timestamp(&self) -> Result<Option<FilenameTimestamp>, ConfigError> {
        if self.timestamp_source != TimestampSource::Filename {
            return Ok(None);
        }
        let Some(pattern) = self.timestamp_regex.as_deref() else {
            return Ok(None);
        };
        let strategy = TimestampStrategy::from_format(self.timestamp_format.as_deref())?;
        FilenameTimestamp::new(pattern, strategy).map(Some)
    }
}

/// Per-sensor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Sensor group key in the source database (the catalog map key).
    #[serde(skip)]
    pub id: String,
    pub enabled: bool,
    pub fields: FieldMap,
    pub distance_encoding: DistanceEncoding,
    pub timestamp_format: TimestampFormat,
    /// Camera views keyed by view name.
    #[serde(rename = "image_paths")]
    pub views: BTreeMap<String, MediaViewConfig>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            enabled: false,
            fields: FieldMap::default(),
            distance_encoding: DistanceEncoding::Auto,
            timestamp_format: TimestampFormat::EpochAuto,
            views: BTreeMap::new(),
        }
    }
}

impl SensorConfig {
    /// Default mapping for a group that has no catalog entry.
    pub fn unconfigured(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    sensors: Option<BTreeMap<String, SensorConfig>>,
}

/// The full sensor catalog, ordered by sensor id.
#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    sensors: Vec<SensorConfig>,
}

impl SensorCatalog {
    /// Parse a catalog from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        let sensors = file
            .sensors
            .unwrap_or_default()
            .into_iter()
            .map(|(id, mut cfg)| {
                cfg.id = id;
                cfg
            })
            .collect();
        let catalog = Self { sensors };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Parse a catalog from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load the catalog, falling back to the legacy sensor set when the file
    /// does not exist.
    pub fn load_or_legacy(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(
                "Sensor config not found at {}, using legacy sensor set",
                path.display()
            );
            return Ok(Self::legacy());
        }
        let catalog = Self::from_file(path)?;
        let enabled: Vec<&str> = catalog.enabled().map(|s| s.id.as_str()).collect();
        if enabled.is_empty() {
            tracing::warn!("No enabled sensors in {}", path.display());
        } else {
            tracing::info!(count = enabled.len(), sensors = ?enabled, "Loaded sensor catalog");
        }
        Ok(catalog)
    }

    /// The legacy sensor set, all enabled with default mappings.
    pub fn legacy() -> Self {
        Self {
            sensors: LEGACY_SENSORS
                .iter()
                .map(|id| SensorConfig {
                    enabled: true,
                    ..SensorConfig::unconfigured(*id)
                })
                .collect(),
        }
    }

    /// Build a catalog directly from sensor configs.
    pub fn from_sensors(sensors: Vec<SensorConfig>) -> Self {
        Self { sensors }
    }

    /// Validate regexes and strategies of every enabled view.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for sensor in self.enabled() {
            for (name, view) in &sensor.views {
                view.filename_timestamp().map_err(|e| {
                    ConfigError::Invalid(format!("sensor {} view {}: {}", sensor.id, name, e))
                })?;
            }
        }
        Ok(())
    }

    /// All sensors, enabled or not.
    pub fn all(&self) -> &[SensorConfig] {
        &self.sensors
    }

    /// Sensors taking part in synchronization.
    pub fn enabled(&self) -> impl Iterator<Item = &SensorConfig> {
        self.sensors.iter().filter(|s| s.enabled)
    }

    /// Look up a sensor by id.
    pub fn get(&self, id: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.id == id)
    }
}

/// InfluxDB v2 connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxDbConfig {
    /// InfluxDB URL (e.g., "http://localhost:8086").
    pub url: String,
    /// InfluxDB organization.
    pub org: String,
    /// InfluxDB bucket.
    pub bucket: String,
    /// Authentication token.
    pub token: String,
}

/// Process settings, usually populated from CLI flags and environment.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub firebase_db_url: Option<String>,
    /// Database auth token appended as the `auth` query parameter.
    pub firebase_auth: Option<String>,
    pub storage_bucket: Option<String>,
    /// OAuth bearer token for the storage API.
    pub storage_token: Option<String>,
    pub influx_url: Option<String>,
    pub influx_token: Option<String>,
    pub influx_org: Option<String>,
    pub influx_bucket: Option<String>,
    pub sensor_config: PathBuf,
    pub state_file: PathBuf,
    pub poll_interval: Duration,
    pub image_poll_interval: Duration,
    pub page_size: usize,
    pub recovery_lookback: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            firebase_db_url: None,
            firebase_auth: None,
            storage_bucket: None,
            storage_token: None,
            influx_url: None,
            influx_token: None,
            influx_org: None,
            influx_bucket: None,
            sensor_config: PathBuf::from("sensor_config.yaml"),
            state_file: PathBuf::from("bridge_state.json"),
            poll_interval: Duration::from_secs(1),
            image_poll_interval: Duration::from_secs(120),
            page_size: 100,
            recovery_lookback: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

impl BridgeSettings {
    /// Realtime database base URL.
    pub fn database_url(&self) -> Result<&str, ConfigError> {
        required(&self.firebase_db_url, "FIREBASE_DB_URL")
    }

    /// InfluxDB connection settings.
    pub fn influx(&self) -> Result<InfluxDbConfig, ConfigError> {
        Ok(InfluxDbConfig {
            url: required(&self.influx_url, "INFLUX_URL")?.to_string(),
            token: required(&self.influx_token, "INFLUX_TOKEN")?.to_string(),
            bucket: required(&self.influx_bucket, "INFLUX_BUCKET")?.to_string(),
            org: required(&self.influx_org, "INFLUX_ORG")?.to_string(),
        })
    }

    /// Check every required setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.influx()?;
        self.database_url()?;
        if self.page_size < 2 {
            return Err(ConfigError::Invalid(format!(
                "page size must be at least 2 (got {})",
                self.page_size
            )));
        }
        Ok(())
    }
}
