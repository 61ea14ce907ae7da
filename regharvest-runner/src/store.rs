//! Conflict-aware persistence for harvested circulars.
//!
//! One row per logical circular, keyed on `(source, detail_url)`. Writes
//! are latest-wins: a key collision overwrites the prior row's non-key
//! fields. One bad record never aborts a batch — the failure is logged
//! and counted, and the remaining records proceed.

use std::time::Duration;

use regharvest_core::CircularRecord;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::config::StoreConfig;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A write colliding with the uniqueness constraint on a backend that
    /// rejects instead of merging. Benign: the row is already present.
    #[error("row already present (unique key collision)")]
    Conflict,

    #[error("store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("store unreachable: {0}")]
    Network(String),

    #[error("failed to build store client: {0}")]
    Client(String),
}

/// Write seam for the pipeline: upsert one record, latest-wins on the
/// `(source, detail_url)` key.
pub trait CircularWriter {
    fn upsert(&self, record: &CircularRecord) -> Result<(), StoreError>;
}

/// Per-batch outcome. `stored` counts writes that were applied, whether
/// they inserted or overwrote; `skipped` counts writes that were not.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub stored: usize,
    pub skipped: usize,
}

/// Drive a batch through the writer with skip-and-continue semantics.
/// Empty input returns `(0, 0)` without touching the writer.
pub fn upsert_batch(writer: &dyn CircularWriter, records: &[CircularRecord]) -> UpsertSummary {
    let mut summary = UpsertSummary::default();
    for record in records {
        match writer.upsert(record) {
            Ok(()) => summary.stored += 1,
            Err(StoreError::Conflict) => summary.skipped += 1,
            Err(e) => {
                warn!(title = record.short_title(), error = %e, "store write failed; continuing batch");
                summary.skipped += 1;
            }
        }
    }
    summary
}

/// PostgREST-style store client. Upserts POST one-row JSON arrays with
/// `on_conflict=source,detail_url` and `Prefer: resolution=merge-duplicates`,
/// which is the hosted store's latest-wins upsert form.
pub struct RestStore {
    client: reqwest::blocking::Client,
    rows_url: String,
    api_key: String,
}

impl RestStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| StoreError::Client(e.to_string()))?;
        Ok(Self {
            client,
            rows_url: format!(
                "{}/rest/v1/{}",
                config.url.trim_end_matches('/'),
                config.table
            ),
            api_key: config.service_key.clone(),
        })
    }

    /// One-row select used by the `check` handshake to verify credentials
    /// and table access before a first run.
    pub fn probe(&self) -> Result<(), StoreError> {
        let response = self
            .client
            .get(&self.rows_url)
            .query(&[("select", "source"), ("limit", "1")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|e| StoreError::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(StoreError::Http {
            status: status.as_u16(),
            body: truncate_body(response.text().unwrap_or_default()),
        })
    }
}

impl CircularWriter for RestStore {
    fn upsert(&self, record: &CircularRecord) -> Result<(), StoreError> {
        let response = self
            .client
            .post(&self.rows_url)
            .query(&[("on_conflict", "source,detail_url")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[record])
            .send()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        let lowered = body.to_ascii_lowercase();
        if status == 409 || lowered.contains("duplicate") || lowered.contains("conflict") {
            return Err(StoreError::Conflict);
        }
        Err(StoreError::Http {
            status,
            body: truncate_body(body),
        })
    }
}

fn truncate_body(body: String) -> String {
    match body.char_indices().nth(200) {
        Some((i, _)) => body[..i].to_string(),
        None => body,
    }
}
