//! Source adapters and the structured errors they raise.
//!
//! Each adapter owns its session exclusively for the duration of one
//! `fetch` call; no HTTP state is shared across adapters or across runs.

pub mod bse;
pub mod html;
pub mod nse;
pub mod sebi;
pub mod session;

pub use bse::BseScraper;
pub use nse::NseScraper;
pub use sebi::SebiScraper;
pub use session::{HttpBackend, HttpSession, SessionProfile, SessionRequest};

use crate::record::{CircularRecord, Source};
use thiserror::Error;

/// Structured error types for source acquisition.
///
/// `Unavailable` is the "zero records this run" signal: adapters swallow it
/// after logging. Anything else escaping `fetch` is fatal for that source
/// and is caught at the orchestrator boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network unreachable: {0}")]
    Network(String),

    #[error("endpoint returned HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("source blocked or rate-limited after {attempts} attempts")]
    Unavailable { attempts: u32 },

    #[error("response shape changed: {0}")]
    ParseMismatch(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl SourceError {
    /// Errors the adapter absorbs as "this source returned zero records
    /// this run" rather than failing the pipeline.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable { .. })
    }
}

/// Adapter contract: translate one regulator's listing/detail formats into
/// canonical records for the last `days` days.
pub trait CircularSource {
    fn source(&self) -> Source;

    fn fetch(&mut self, days: u32) -> Result<Vec<CircularRecord>, SourceError>;
}
