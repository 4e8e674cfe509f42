// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Durable per-sensor cursors.
//!
//! The cursor of a sensor is the push key of the last record known to be in
//! the sink, or `null` when nothing has been delivered yet. The file is a
//! flat JSON object:
//!
//! ```json
//! { "floodmonitor1": "-Ka003", "LoRaWAN": null }
//! ```
//!
//! Writes go to a sibling `.tmp` file which is then renamed over the
//! original, so a crash mid-write leaves the previous checkpoint intact.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cursor persistence errors.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cursor encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Cursor map, optionally backed by a file.
#[derive(Debug, Default)]
pub struct CursorStore {
    path: Option<PathBuf>,
    cursors: BTreeMap<String, Option<String>>,
}

impl CursorStore {
    /// Load cursors from `path`.
    ///
    /// A missing file is an empty store. An unreadable or corrupt file is
    /// logged and also treated as empty; recovery then falls back to the
    /// sink.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cursors = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    tracing::error!("Corrupt cursor file {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("No cursor file at {}, starting fresh", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                tracing::error!("Cannot read cursor file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        if !cursors.is_empty() {
            tracing::info!(count = cursors.len(), "Loaded cursors from {}", path.display());
        }
        Self {
            path: Some(path),
            cursors,
        }
    }

    /// Store without a backing file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether the sensor has an entry, even a `null` one.
    pub fn contains(&self, sensor: &str) -> bool {
        self.cursors.contains_key(sensor)
    }

    /// Current cursor; `None` for both "no entry" and "null entry".
    pub fn get(&self, sensor: &str) -> Option<&str> {
        self.cursors.get(sensor).and_then(|c| c.as_deref())
    }

    /// Set a cursor without persisting it.
    pub fn set(&mut self, sensor: &str, cursor: Option<String>) {
        self.cursors.insert(sensor.to_string(), cursor);
    }

    /// Advance `sensor` to `key` and persist.
    ///
    /// Keys at or before the current cursor are ignored (returns `Ok(false)`).
    /// The in-memory cursor moves even if the write to disk fails.
    pub fn advance(&mut self, sensor: &str, key: &str) -> Result<bool, CursorError> {
        if let Some(current) = self.get(sensor) {
            if key <= current {
                return Ok(false);
            }
        }
        self.set(sensor, Some(key.to_string()));
        self.checkpoint()?;
        Ok(true)
    }

    /// Write every cursor to the backing file.
    pub fn checkpoint(&self) -> Result<(), CursorError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = serde_json::to_vec_pretty(&self.cursors)?;
        let io_err = |source| CursorError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, raw).map_err(io_err)?;
        fs::rename(&tmp_path, path).map_err(io_err)?;
        Ok(())
    }

    /// All entries, in sensor order.
    pub fn entries(&self) -> &BTreeMap<String, Option<String>> {
        &self.cursors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CursorStore::open(dir.path().join("state.json"));
        assert!(store.entries().is_empty());
        assert!(!store.contains("flood1"));
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(CursorStore::open(&path).entries().is_empty());
    }

    #[test]
    fn test_null_entries_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"flood1": "-Ka003", "lora": null}"#).unwrap();

        let store = CursorStore::open(&path);
        assert_eq!(store.get("flood1"), Some("-Ka003"));
        assert!(store.contains("lora"));
        assert_eq!(store.get("lora"), None);
    }

    #[test]
    fn test_advance_persists_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut store = CursorStore::open(&path);
        assert!(store.advance("flood1", "-Ka001").unwrap());
        assert!(store.advance("flood1", "-Ka005").unwrap());
        assert!(!path.with_extension("tmp").exists());

        let reopened = CursorStore::open(&path);
        assert_eq!(reopened.get("flood1"), Some("-Ka005"));
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let mut store = CursorStore::in_memory();
        store.set("flood1", Some("-Ka005".into()));
        assert!(!store.advance("flood1", "-Ka002").unwrap());
        assert!(!store.advance("flood1", "-Ka005").unwrap());
        assert_eq!(store.get("flood1"), Some("-Ka005"));
    }

    #[test]
    fn test_checkpoint_writes_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = CursorStore::open(&path);
        store.set("lora", None);
        store.checkpoint().unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"lora": null}));
    }

    #[test]
    fn test_persist_failure_keeps_memory_advanced() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail
        let path = dir.path().join("state.json");
        fs::create_dir(&path).unwrap();

        let mut store = CursorStore {
            path: Some(path),
            cursors: BTreeMap::new(),
        };
        assert!(store.advance("flood1", "-Ka001").is_err());
        assert_eq!(store.get("flood1"), Some("-Ka001"));
    }
}
