//! Harvest orchestration and persistence.
//!
//! Sequences the three source adapters, upserts each source's batch into
//! the store, and aggregates a per-run report. The store is a hosted
//! relational table reached over a PostgREST-style API; the only
//! capabilities required of it are upsert-by-composite-key and simple
//! predicate selects.

pub mod config;
pub mod pipeline;
pub mod store;

pub use config::{ConfigError, StoreConfig};
pub use pipeline::{run_pipeline, PipelineOptions, Report, SourceReport};
pub use store::{upsert_batch, CircularWriter, RestStore, StoreError, UpsertSummary};
