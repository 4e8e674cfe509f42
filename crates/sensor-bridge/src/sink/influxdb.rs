// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB v2 HTTP sink.
//!
//! - Writes: `POST /api/v2/write?org=..&bucket=..&precision=ns` with a Line
//!   Protocol body.
//! - Queries: `POST /api/v2/query?org=..` with a Flux body, CSV response.
//!
//! See: <https://docs.influxdata.com/influxdb/v2/api/>

use super::{LastValueQuery, PointSink, SinkError};
use crate::config::InfluxDbConfig;
use crate::influx::{LineProtocolWriter, Point};
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// InfluxDB v2 client.
#[derive(Clone)]
pub struct InfluxSink {
    client: Client,
    config: InfluxDbConfig,
    write_url: Url,
    query_url: Url,
}

impl InfluxSink {
    pub fn new(config: InfluxDbConfig) -> Result<Self, SinkError> {
        let base = config.url.trim_end_matches('/');
        let parse = |path: &str| {
            Url::parse(&format!("{}{}", base, path))
                .map_err(|e| SinkError::Url(format!("{}: {}", config.url, e)))
        };
        let write_url = parse("/api/v2/write")?;
        let query_url = parse("/api/v2/query")?;
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            config,
            write_url,
            query_url,
        })
    }

    pub fn config(&self) -> &InfluxDbConfig {
        &self.config
    }

    fn token(&self) -> String {
        format!("Token {}", self.config.token)
    }
}

fn check(resp: Response) -> Result<Response, SinkError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl PointSink for InfluxSink {
    fn write_batch(&self, points: &[Point]) -> Result<(), SinkError> {
        let body = LineProtocolWriter::encode_batch(points);
        if body.is_empty() {
            return Ok(());
        }
        let resp = self
            .client
            .post(self.write_url.clone())
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(AUTHORIZATION, self.token())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()?;
        check(resp)?;
        Ok(())
    }

    fn query_last(&self, query: &LastValueQuery) -> Result<Option<String>, SinkError> {
        let flux = last_value_flux(&self.config.bucket, query);
        tracing::debug!(%flux, "Querying last value");
        let resp = self
            .client
            .post(self.query_url.clone())
            .query(&[("org", self.config.org.as_str())])
            .header(AUTHORIZATION, self.token())
            .header(CONTENT_TYPE, "application/vnd.flux")
            .header(ACCEPT, "application/csv")
            .body(flux)
            .send()?;
        let csv = check(resp)?.text()?;
        first_value(&csv)
    }
}

/// Quote a Flux string literal.
fn flux_string(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "\\${");
    format!("\"{}\"", escaped)
}

/// Build the "latest value of one field of one series" Flux query.
pub fn last_value_flux(bucket: &str, query: &LastValueQuery) -> String {
    format!(
        "from(bucket: {bucket})\n\
         \x20 |> range(start: -{secs}s)\n\
         \x20 |> filter(fn: (r) => r._measurement == {measurement})\n\
         \x20 |> filter(fn: (r) => r[{tag_key}] == {tag_value})\n\
         \x20 |> filter(fn: (r) => r._field == {field})\n\
         \x20 |> last()",
        bucket = flux_string(bucket),
        secs = query.lookback.as_secs().max(1),
        measurement = flux_string(&query.measurement),
        tag_key = flux_string(&query.tag_key),
        tag_value = flux_string(&query.tag_value),
        field = flux_string(&query.field),
    )
}

/// `_value` of the first data row of a Flux CSV response.
///
/// Annotation rows (`#...`) and blank table separators are skipped; each
/// table repeats its header row.
pub fn first_value(csv: &str) -> Result<Option<String>, SinkError> {
    let mut value_col: Option<usize> = None;
    let mut header: Option<Vec<String>> = None;

    for line in csv.lines().map(|l| l.trim_end_matches('\r')) {
        if line.trim().is_empty() {
            // Next table starts with a fresh header
            header = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let cells = split_csv_row(line);
        if header.is_none() {
            let idx = cells.iter().position(|c| c == "_value").ok_or_else(|| {
                SinkError::Query(format!("no _value column in header: {}", line))
            })?;
            value_col = Some(idx);
            header = Some(cells);
            continue;
        }
        if header.as_ref() == Some(&cells) {
            continue;
        }
        let idx = value_col.unwrap_or_default();
        return Ok(cells.into_iter().nth(idx).filter(|v| !v.is_empty()));
    }
    Ok(None)
}

/// Split one RFC 4180 row; quoted cells may contain commas and `""`.
fn split_csv_row(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            ('"', _) => quoted = !quoted,
            (',', false) => cells.push(std::mem::take(&mut cell)),
            (c, _) => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}
