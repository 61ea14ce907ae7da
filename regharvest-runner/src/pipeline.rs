//! Sequential harvest → store orchestration.
//!
//! Sources run strictly one after another with a fixed pause between
//! them — the remote sites rate-limit independently, and hitting them
//! simultaneously buys nothing but blocks. One source failing fatally is
//! recorded in its report entry and never stops the remaining sources;
//! batches already stored for an earlier source stay stored.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use regharvest_core::{CircularSource, Source};
use serde::Serialize;
use tracing::{info, warn};

use crate::store::{upsert_batch, CircularWriter};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Harvest window in days.
    pub days: u32,
    /// Pause between consecutive sources; skipped after the last one.
    pub inter_source_pause: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            days: 14,
            inter_source_pause: Duration::from_secs(2),
        }
    }
}

/// One source's outcome for this run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub scraped: usize,
    pub stored: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-run summary keyed by source. Surfaced to the caller and the log,
/// never persisted.
#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub sources: BTreeMap<Source, SourceReport>,
}

impl Report {
    pub fn total_scraped(&self) -> usize {
        self.sources.values().map(|r| r.scraped).sum()
    }

    pub fn total_stored(&self) -> usize {
        self.sources.values().map(|r| r.stored).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.sources.values().map(|r| r.skipped).sum()
    }

    pub fn has_errors(&self) -> bool {
        self.sources.values().any(|r| r.error.is_some())
    }
}

/// Run every adapter in order, upserting each source's batch as it
/// completes. Never fails: per-source errors land in the report.
pub fn run_pipeline(
    adapters: &mut [Box<dyn CircularSource>],
    writer: &dyn CircularWriter,
    options: &PipelineOptions,
) -> Report {
    let mut report = Report::default();
    let last = adapters.len().saturating_sub(1);

    for (i, adapter) in adapters.iter_mut().enumerate() {
        let source = adapter.source();
        info!(source = %source, days = options.days, "harvesting");

        let entry = match adapter.fetch(options.days) {
            Ok(records) => {
                let summary = upsert_batch(writer, &records);
                info!(
                    source = %source,
                    scraped = records.len(),
                    stored = summary.stored,
                    skipped = summary.skipped,
                    "source complete"
                );
                SourceReport {
                    scraped: records.len(),
                    stored: summary.stored,
                    skipped: summary.skipped,
                    error: None,
                }
            }
            Err(e) => {
                warn!(source = %source, error = %e, "source failed; continuing with remaining sources");
                SourceReport {
                    error: Some(e.to_string()),
                    ..SourceReport::default()
                }
            }
        };
        report.sources.insert(source, entry);

        if i < last && !options.inter_source_pause.is_zero() {
            thread::sleep(options.inter_source_pause);
        }
    }

    report
}
