//! Best-effort date normalization.
//!
//! The three sources publish dates in at least eight textual forms plus a
//! compact all-digit one. Dates are display metadata, not a precondition
//! for storing a record, so normalization never fails: when nothing
//! matches, the harvest date stands in.

use chrono::{Duration, NaiveDate};

/// Normalize `text` against an ordered list of `chrono` format patterns.
///
/// The first matching pattern wins — callers supply their source's
/// preferred ordering, which matters for ambiguous forms like `%d/%m/%Y`
/// vs `%m/%d/%Y`. An 8-character all-digit value is tried as `YYYYMMDD`
/// ahead of the list. On exhaustion the `fallback` date is returned.
pub fn normalize_date(text: &str, formats: &[&str], fallback: NaiveDate) -> NaiveDate {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return fallback;
    }
    if trimmed.len() == 8 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
            return date;
        }
    }
    for format in formats {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date;
        }
    }
    fallback
}

/// Inclusive `[today - days, today]` harvest window, used to filter rows
/// client-side when a listing endpoint does not filter server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        Self {
            from: today - Duration::days(i64::from(days)),
            to: today,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }
}
