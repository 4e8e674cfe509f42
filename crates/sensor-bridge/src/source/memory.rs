// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory source doubles for tests and dry runs.
//!
//! Clones share state, so a test can keep a handle while a sync loop owns
//! another one.

use super::{page_from_value, Artifact, ArtifactStore, RecordPage, RecordSource, SourceError};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unavailable(what: &str) -> SourceError {
    SourceError::Status {
        status: 503,
        body: format!("{} unavailable", what),
    }
}

#[derive(Default)]
struct SourceState {
    /// Root object: group -> value (normally an object of records).
    groups: BTreeMap<String, Value>,
    /// Groups whose next read fails.
    failing: BTreeSet<String>,
    reads: usize,
}

/// In-memory telemetry store.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<SourceState>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn push(&self, group: &str, key: &str, record: Value) {
        let mut state = lock(&self.state);
        let entry = state
            .groups
            .entry(group.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(key.to_string(), record);
        }
    }

    /// Replace a whole group with an arbitrary value.
    pub fn set_group(&self, group: &str, value: Value) {
        lock(&self.state).groups.insert(group.to_string(), value);
    }

    /// Make the next read of `group` fail with a transient error.
    pub fn fail_next_read(&self, group: &str) {
        lock(&self.state).failing.insert(group.to_string());
    }

    /// Number of reads served (including failed ones).
    pub fn reads(&self) -> usize {
        lock(&self.state).reads
    }

    fn group_page(&self, group: &str) -> Result<RecordPage, SourceError> {
        let mut state = lock(&self.state);
        state.reads += 1;
        if state.failing.remove(group) {
            return Err(unavailable(group));
        }
        let value = state.groups.get(group).cloned().unwrap_or(Value::Null);
        page_from_value(group, value)
    }
}

impl RecordSource for MemorySource {
    fn get(&self, path: &str) -> Result<Value, SourceError> {
        let path = path.trim_matches('/');
        let state = lock(&self.state);
        if path.is_empty() {
            let root: Map<String, Value> = state
                .groups
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            return Ok(if root.is_empty() {
                Value::Null
            } else {
                Value::Object(root)
            });
        }
        let mut parts = path.split('/');
        let mut current = parts
            .next()
            .and_then(|g| state.groups.get(g))
            .cloned()
            .unwrap_or(Value::Null);
        for part in parts {
            current = current.get(part).cloned().unwrap_or(Value::Null);
        }
        Ok(current)
    }

    fn child_keys(&self, path: &str) -> Result<Vec<String>, SourceError> {
        match self.get(path)? {
            Value::Object(map) => Ok(map.keys().cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }

    fn range_from(
        &self,
        group: &str,
        start_at: &str,
        limit: usize,
    ) -> Result<RecordPage, SourceError> {
        let page = self.group_page(group)?;
        Ok(page
            .into_iter()
            .filter(|(k, _)| k.as_str() >= start_at)
            .take(limit)
            .collect())
    }

    fn latest(&self, group: &str, limit: usize) -> Result<RecordPage, SourceError> {
        let page = self.group_page(group)?;
        let skip = page.len().saturating_sub(limit);
        Ok(page.into_iter().skip(skip).collect())
    }
}

#[derive(Default)]
struct ArtifactState {
    objects: BTreeMap<String, Option<DateTime<Utc>>>,
    failing_prefixes: BTreeSet<String>,
    failing_publish: BTreeSet<String>,
    published: Vec<String>,
}

/// In-memory image store.
#[derive(Clone, Default)]
pub struct MemoryArtifacts {
    state: Arc<Mutex<ArtifactState>>,
}

impl MemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object.
    pub fn put(&self, name: &str, created: Option<DateTime<Utc>>) {
        lock(&self.state).objects.insert(name.to_string(), created);
    }

    /// Listing under `prefix` fails until cleared.
    pub fn fail_listing(&self, prefix: &str, failing: bool) {
        let mut state = lock(&self.state);
        if failing {
            state.failing_prefixes.insert(prefix.to_string());
        } else {
            state.failing_prefixes.remove(prefix);
        }
    }

    /// Publishing `name` fails until cleared.
    pub fn fail_publish(&self, name: &str, failing: bool) {
        let mut state = lock(&self.state);
        if failing {
            state.failing_publish.insert(name.to_string());
        } else {
            state.failing_publish.remove(name);
        }
    }

    /// Every successful publish call, in order.
    pub fn published(&self) -> Vec<String> {
        lock(&self.state).published.clone()
    }

    pub fn public_url(name: &str) -> String {
        format!("memory://{}", name)
    }
}

impl ArtifactStore for MemoryArtifacts {
    fn list(&self, prefix: &str) -> Result<Vec<Artifact>, SourceError> {
        let state = lock(&self.state);
        if state.failing_prefixes.contains(prefix) {
            return Err(unavailable(prefix));
        }
        Ok(state
            .objects
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, created)| Artifact::new(name.clone(), *created))
            .collect())
    }

    fn publish(&self, artifact: &Artifact) -> Result<String, SourceError> {
        let mut state = lock(&self.state);
        if state.failing_publish.contains(&artifact.name) {
            return Err(unavailable(&artifact.name));
        }
        state.published.push(artifact.name.clone());
        Ok(Self::public_url(&artifact.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> MemorySource {
        let src = MemorySource::new();
        for key in ["-Ka001", "-Ka002", "-Ka003", "-Ka004"] {
            src.push("flood1", key, json!({"dist_cm": 1}));
        }
        src
    }

    #[test]
    fn test_range_from_is_inclusive_and_bounded() {
        let src = source();
        let page = src.range_from("flood1", "-Ka002", 2).unwrap();
        let keys: Vec<&str> = page.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["-Ka002", "-Ka003"]);
    }

    #[test]
    fn test_latest_returns_newest() {
        let src = source();
        let page = src.latest("flood1", 1).unwrap();
        assert_eq!(page.keys().next().map(String::as_str), Some("-Ka004"));
        assert!(src.latest("missing", 5).unwrap().is_empty());
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let src = source();
        src.fail_next_read("flood1");
        assert!(src.latest("flood1", 1).is_err());
        assert!(src.latest("flood1", 1).is_ok());
        assert_eq!(src.reads(), 2);
    }

    #[test]
    fn test_get_paths_and_child_keys() {
        let src = source();
        src.push("lora", "-x", json!({"distance_cm": 5}));

        assert_eq!(src.child_keys("").unwrap(), vec!["flood1", "lora"]);
        assert_eq!(src.get("/lora/-x/distance_cm").unwrap(), json!(5));
        assert_eq!(src.get("absent").unwrap(), Value::Null);
    }

    #[test]
    fn test_artifacts_list_and_publish() {
        let store = MemoryArtifacts::new();
        store.put("cam/front/a.jpg", None);
        store.put("cam/side/b.jpg", None);

        let listed = store.list("cam/front/").unwrap();
        assert_eq!(listed.len(), 1);

        let url = store.publish(&listed[0]).unwrap();
        assert_eq!(url, "memory://cam/front/a.jpg");
        assert_eq!(store.published(), vec!["cam/front/a.jpg"]);

        store.fail_listing("cam/front/", true);
        assert!(store.list("cam/front/").is_err());
    }
}
