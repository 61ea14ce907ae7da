//! Core domain for the regulatory circular harvesting pipeline.
//!
//! This crate holds the canonical record shape, date normalization, the
//! cookie-bearing HTTP session layer, and the three source adapters
//! (SEBI, BSE, NSE). Orchestration and persistence live in
//! `regharvest-runner`.

pub mod dates;
pub mod record;
pub mod sources;

pub use record::{CircularRecord, Source};
pub use sources::{CircularSource, SourceError};
