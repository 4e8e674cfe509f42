// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Source store abstraction.
//!
//! Two read-side collaborators are used by the bridge:
//!
//! - [`RecordSource`]: the hierarchical key-value store holding telemetry,
//!   grouped by sensor and keyed by lexicographically ordered push keys;
//! - [`ArtifactStore`]: the object store holding camera images.
//!
//! Both are traits so the synchronization loops can run against the HTTP
//! implementations in [`firebase`] or the in-memory doubles in [`memory`].

pub mod firebase;
pub mod memory;

pub use firebase::{FirebaseDatabase, FirebaseStorage};
pub use memory::{MemoryArtifacts, MemorySource};

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// A page of records keyed by push key, in ascending key order.
pub type RecordPage = BTreeMap<String, Value>;

/// Source-side errors.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid URL: {0}")]
    Url(String),
}

/// Ordered reads from the telemetry store.
pub trait RecordSource {
    /// Raw value at `path` (`""` is the root). Absent paths read as `null`.
    fn get(&self, path: &str) -> Result<Value, SourceError>;

    /// Immediate child keys of `path`, without their values.
    fn child_keys(&self, path: &str) -> Result<Vec<String>, SourceError>;

    /// Up to `limit` records of `group` with key `>= start_at`.
    fn range_from(&self, group: &str, start_at: &str, limit: usize)
        -> Result<RecordPage, SourceError>;

    /// The newest `limit` records of `group`.
    fn latest(&self, group: &str, limit: usize) -> Result<RecordPage, SourceError>;
}

/// Convert a group response into a page.
///
/// `null` is an empty group; anything but an object is malformed.
pub fn page_from_value(group: &str, value: Value) -> Result<RecordPage, SourceError> {
    match value {
        Value::Null => Ok(RecordPage::new()),
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(SourceError::Malformed(format!(
            "group '{}' is a {}, expected an object",
            group,
            value_kind(&other)
        ))),
    }
}

/// Short JSON type name for log messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// An object in the image store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Full object name, including the prefix.
    pub name: String,
    /// Creation time reported by the store.
    pub created: Option<DateTime<Utc>>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, created: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            created,
        }
    }

    /// Last path component of the object name.
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Folder placeholder objects end with a slash.
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Listing and publication of image objects.
pub trait ArtifactStore {
    /// All objects whose name starts with `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<Artifact>, SourceError>;

    /// Make `artifact` publicly readable and return its public URL.
    ///
    /// Publishing an already-public object is a no-op that returns the same URL.
    fn publish(&self, artifact: &Artifact) -> Result<String, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_from_value() {
        let page = page_from_value("s", json!({"-b": {"x": 1}, "-a": {"x": 2}})).unwrap();
        let keys: Vec<&str> = page.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["-a", "-b"]);

        assert!(page_from_value("s", Value::Null).unwrap().is_empty());

        match page_from_value("s", json!([1, 2])) {
            Err(SourceError::Malformed(msg)) => assert!(msg.contains("array")),
            other => panic!("expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_artifact_helpers() {
        let a = Artifact::new("cam1/front/2026-02-19/img.jpg", None);
        assert_eq!(a.basename(), "img.jpg");
        assert!(!a.is_directory());

        let dir = Artifact::new("cam1/front/2026-02-19/", None);
        assert!(dir.is_directory());
        assert_eq!(Artifact::new("flat.jpg", None).basename(), "flat.jpg");
    }
}
