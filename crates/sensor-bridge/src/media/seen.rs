// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Membership cache of already-ingested images.
//!
//! Entries are keyed per (sensor, view). Images listed from a dated
//! partition (`<prefix>/YYYY-MM-DD/`) remember that date; once the
//! partition is older than yesterday it is no longer scanned, so its
//! entries can be evicted. Images from flat views carry no partition and
//! stay cached for the lifetime of the process.

use chrono::{Days, NaiveDate};
use std::collections::HashMap;

/// Identifies one camera view of one sensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewKey {
    pub sensor: String,
    pub view: String,
}

impl ViewKey {
    pub fn new(sensor: impl Into<String>, view: impl Into<String>) -> Self {
        Self {
            sensor: sensor.into(),
            view: view.into(),
        }
    }
}

impl std::fmt::Display for ViewKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.sensor, self.view)
    }
}

/// Seen-set with partition expiry.
#[derive(Debug, Default)]
pub struct SeenCache {
    views: HashMap<ViewKey, HashMap<String, Option<NaiveDate>>>,
}

impl SeenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` was already ingested for `key`.
    pub fn contains(&self, key: &ViewKey, name: &str) -> bool {
        self.views
            .get(key)
            .is_some_and(|names| names.contains_key(name))
    }

    /// Record `name` as ingested. `partition` is the listing date, if any.
    pub fn insert(&mut self, key: &ViewKey, name: impl Into<String>, partition: Option<NaiveDate>) {
        self.views
            .entry(key.clone())
            .or_default()
            .insert(name.into(), partition);
    }

    /// Forget `name` so it is picked up again on the next cycle.
    pub fn remove(&mut self, key: &ViewKey, name: &str) -> bool {
        self.views
            .get_mut(key)
            .is_some_and(|names| names.remove(name).is_some())
    }

    /// Evict entries from partitions older than yesterday.
    ///
    /// Returns the number of evicted entries.
    pub fn expire(&mut self, today: NaiveDate) -> usize {
        let cutoff = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        let mut evicted = 0;
        for names in self.views.values_mut() {
            let before = names.len();
            names.retain(|_, partition| partition.map_or(true, |date| date >= cutoff));
            evicted += before - names.len();
        }
        self.views.retain(|_, names| !names.is_empty());
        evicted
    }

    /// Number of cached entries for one view.
    pub fn view_len(&self, key: &ViewKey) -> usize {
        self.views.get(key).map_or(0, HashMap::len)
    }

    /// Total number of cached entries.
    pub fn len(&self) -> usize {
        self.views.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
