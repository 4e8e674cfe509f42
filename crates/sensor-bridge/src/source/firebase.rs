// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Firebase REST clients.
//!
//! - Realtime Database: `GET {db}/{path}.json` with `orderBy="$key"` range
//!   queries. See <https://firebase.google.com/docs/database/rest/retrieve-data>.
//! - Cloud Storage: JSON API object listing and ACL grants.
//!
//! Both clients are blocking; each sync loop owns its own instance.

use super::{page_from_value, Artifact, ArtifactStore, RecordPage, RecordSource, SourceError};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";
const STORAGE_PUBLIC: &str = "https://storage.googleapis.com";

fn build_client() -> Result<Client, SourceError> {
    Ok(Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

fn check(resp: Response) -> Result<Response, SourceError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().unwrap_or_default();
        Err(SourceError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// JSON string literal, as the database expects for `startAt`/`orderBy`.
fn quoted(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Realtime Database reader.
#[derive(Clone)]
pub struct FirebaseDatabase {
    client: Client,
    base_url: String,
    auth: Option<String>,
}

impl FirebaseDatabase {
    /// Create a reader for `base_url` (e.g. `https://project.firebaseio.com`).
    pub fn new(base_url: &str, auth: Option<String>) -> Result<Self, SourceError> {
        Url::parse(base_url).map_err(|e| SourceError::Url(format!("{}: {}", base_url, e)))?;
        Ok(Self {
            client: build_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn fetch(&self, path: &str, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let mut req = self.client.get(self.url(path)).query(params);
        if let Some(auth) = &self.auth {
            req = req.query(&[("auth", auth)]);
        }
        Ok(check(req.send()?)?.json::<Value>()?)
    }
}

impl RecordSource for FirebaseDatabase {
    fn get(&self, path: &str) -> Result<Value, SourceError> {
        self.fetch(path, &[])
    }

    fn child_keys(&self, path: &str) -> Result<Vec<String>, SourceError> {
        match self.fetch(path, &[("shallow", "true".to_string())])? {
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
        let value = self.fetch(
            group,
            &[
                ("orderBy", quoted("$key")),
                ("startAt", quoted(start_at)),
                ("limitToFirst", limit.to_string()),
            ],
        )?;
        page_from_value(group, value)
    }

    fn latest(&self, group: &str, limit: usize) -> Result<RecordPage, SourceError> {
        let value = self.fetch(
            group,
            &[
                ("orderBy", quoted("$key")),
                ("limitToLast", limit.to_string()),
            ],
        )?;
        page_from_value(group, value)
    }
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectEntry>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
    #[serde(rename = "timeCreated")]
    time_created: Option<DateTime<Utc>>,
}

/// Cloud Storage bucket holding camera images.
#[derive(Clone)]
pub struct FirebaseStorage {
    client: Client,
    bucket: String,
    token: Option<String>,
}

impl FirebaseStorage {
    pub fn new(bucket: &str, token: Option<String>) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client()?,
            bucket: bucket.trim_start_matches("gs://").trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = Url::parse(STORAGE_API).map_err(|e| SourceError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Url(STORAGE_API.to_string()))?
            .push("b")
            .push(&self.bucket)
            .extend(segments);
        Ok(url)
    }

    /// Public download URL of an object.
    pub fn public_url(&self, name: &str) -> Result<String, SourceError> {
        let mut url = Url::parse(STORAGE_PUBLIC).map_err(|e| SourceError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Url(STORAGE_PUBLIC.to_string()))?
            .push(&self.bucket)
            .extend(name.split('/'));
        Ok(url.to_string())
    }
}

impl ArtifactStore for FirebaseStorage {
    fn list(&self, prefix: &str) -> Result<Vec<Artifact>, SourceError> {
        let url = self.api_url(&["o"])?;
        let mut artifacts = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("prefix", prefix.to_string()),
                ("fields", "items(name,timeCreated),nextPageToken".to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }
            let req = self.authorized(self.client.get(url.clone()).query(&params));
            let page: ObjectList = check(req.send()?)?.json()?;

            artifacts.extend(
                page.items
                    .into_iter()
                    .map(|o| Artifact::new(o.name, o.time_created)),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(artifacts)
    }

    fn publish(&self, artifact: &Artifact) -> Result<String, SourceError> {
        let url = self.api_url(&["o", &artifact.name, "acl"])?;
        let req = self
            .authorized(self.client.post(url))
            .json(&json!({"entity": "allUsers", "role": "READER"}));
        check(req.send()?)?;
        self.public_url(&artifact.name)
    }
}
