//! Canonical record shape shared by every adapter and the store.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The regulators we harvest from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    Sebi,
    Bse,
    Nse,
}

impl Source {
    /// Uppercase wire form, also the default `department` value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Sebi => "SEBI",
            Source::Bse => "BSE",
            Source::Nse => "NSE",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized circular, as produced by an adapter and persisted by the
/// store. Field names match the store's column names 1:1 so a record
/// serializes directly as a row.
///
/// `(source, detail_url)` is the dedup key: it is the most stable
/// cross-visit identifier the sources expose. `circular_number` is
/// inconsistently populated and titles drift after publication, so neither
/// participates in identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircularRecord {
    pub source: Source,
    pub title: String,
    pub circular_number: Option<String>,
    /// Always normalized `YYYY-MM-DD`; unparseable source dates fall back to
    /// the harvest date rather than failing the record.
    pub published_date: NaiveDate,
    /// Canonical absolute URL, or empty when the source provides none.
    pub detail_url: String,
    pub pdf_url: Option<String>,
    /// `"Circular"` when the source has no taxonomy of its own.
    pub category: String,
    /// Source name when the source reports no department.
    pub department: String,
}

impl CircularRecord {
    /// The `(source, detail_url)` pair identifying one logical circular
    /// across repeated harvests.
    pub fn dedup_key(&self) -> (Source, &str) {
        (self.source, &self.detail_url)
    }

    /// Title truncated for log lines, safe on char boundaries.
    pub fn short_title(&self) -> &str {
        match self.title.char_indices().nth(50) {
            Some((i, _)) => &self.title[..i],
            None => &self.title,
        }
    }
}

/// `Some(trimmed)` unless the value is missing or blank, in which case the
/// given default applies. Keeps required display fields non-null for the
/// read service.
pub fn text_or_default(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}
