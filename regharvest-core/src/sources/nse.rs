//! NSE circulars adapter.
//!
//! NSE runs the heaviest bot defense of the three sources: the JSON API
//! refuses anything that has not first collected the bot-manager cookies
//! from a homepage GET, and a 403 invalidates the whole cookie set —
//! partial refresh does not work, so the session clears everything and
//! redoes the full warmup before retrying. In exchange the listing is the
//! friendliest: rows carry a directly usable document link, so no per-row
//! detail fetch is needed. Dates arrive either compact (`20260820`) or
//! long-form (`February 20, 2026`), tried in that order.

use chrono::{Local, NaiveDate};
use serde::Deserialize;
use tracing::{info, warn};

use crate::dates::{self, DateWindow};
use crate::record::{text_or_default, CircularRecord, Source};

use super::html;
use super::session::{HttpBackend, HttpSession, ReqwestBackend, SessionProfile, SessionRequest};
use super::{CircularSource, SourceError};

const NSE_BASE: &str = "https://www.nseindia.com";
const CIRCULARS_API: &str = "https://www.nseindia.com/api/circulars";
const ARCHIVES_BASE: &str = "https://nsearchives.nseindia.com";
const LISTING_PAGE: &str =
    "https://www.nseindia.com/companies-listing/circular-for-listed-companies-equity-market";

/// Long-form first; the compact 8-digit form is special-cased ahead of
/// this list by the normalizer.
const DATE_FORMATS: &[&str] = &[
    "%B %d, %Y", "%d-%b-%Y", "%d-%m-%Y", "%Y-%m-%d", "%d/%m/%Y", "%d %b %Y", "%d-%B-%Y",
];

#[derive(Debug, Default, Deserialize)]
struct NseListing {
    #[serde(default)]
    data: Vec<NseItem>,
}

#[derive(Debug, Default, Deserialize)]
struct NseItem {
    #[serde(default)]
    sub: Option<String>,
    #[serde(rename = "cirDate", default)]
    date_compact: Option<String>,
    #[serde(rename = "cirDisplayDate", default)]
    date_display: Option<String>,
    #[serde(rename = "circFilelink", default)]
    file_link: Option<String>,
    #[serde(rename = "circDisplayNo", default)]
    display_no: Option<String>,
    #[serde(rename = "circCategory", default)]
    category: Option<String>,
    #[serde(rename = "circDepartment", default)]
    department: Option<String>,
}

pub struct NseScraper<B: HttpBackend = ReqwestBackend> {
    session: HttpSession<B>,
    /// Fixed harvest date; `None` means the current local date per run.
    harvest_date: Option<NaiveDate>,
}

impl NseScraper {
    pub fn new() -> Result<Self, SourceError> {
        let profile = SessionProfile::new(format!("{NSE_BASE}/"))
            .header("Accept", "application/json, text/plain, */*")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", LISTING_PAGE)
            .header("X-Requested-With", "XMLHttpRequest");
        Ok(Self {
            session: HttpSession::connect(profile)?,
            harvest_date: None,
        })
    }
}

impl<B: HttpBackend> CircularSource for NseScraper<B> {
    fn source(&self) -> Source {
        Source::Nse
    }

    fn fetch(&mut self, days: u32) -> Result<Vec<CircularRecord>, SourceError> {
        // Without the bot-manager cookies the API call is pointless.
        if let Err(e) = self.session.warmup() {
            warn!(error = %e, "NSE cookie acquisition failed; zero records this run");
            return Ok(Vec::new());
        }

        let today = self
            .harvest_date
            .unwrap_or_else(|| Local::now().date_naive());
        let window = DateWindow::last_days(today, days);
        let request = SessionRequest::get(CIRCULARS_API)
            .query("from_date", window.from.format("%d-%m-%Y").to_string())
            .query("to_date", window.to.format("%d-%m-%Y").to_string());

        let listing: NseListing = match self.session.request_json(&request) {
            Ok(listing) => listing,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "NSE listing unavailable this run");
                return Ok(Vec::new());
            }
            // A drifted payload shape is indistinguishable from a blocked
            // response for this source; both mean zero records this run.
            Err(SourceError::ParseMismatch(reason)) => {
                warn!(%reason, "NSE payload shape changed; zero records this run");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let records = collect_rows(listing, today);
        info!(count = records.len(), "NSE listing parsed");
        Ok(records)
    }
}

/// The API filters by date server-side, so every row maps straight to a
/// record. The file link doubles as the detail URL; there is no separate
/// detail page.
fn collect_rows(listing: NseListing, harvest_date: NaiveDate) -> Vec<CircularRecord> {
    listing
        .data
        .into_iter()
        .map(|item| {
            let date_text = item
                .date_display
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .or(item.date_compact.as_deref())
                .unwrap_or("");
            let pdf_url = item
                .file_link
                .as_deref()
                .and_then(|link| html::absolutize(ARCHIVES_BASE, link));
            CircularRecord {
                source: Source::Nse,
                title: text_or_default(item.sub, "Untitled"),
                circular_number: item.display_no.filter(|s| !s.trim().is_empty()),
                published_date: dates::normalize_date(date_text, DATE_FORMATS, harvest_date),
                detail_url: pdf_url.clone().unwrap_or_default(),
                pdf_url,
                category: text_or_default(item.category, "Circular"),
                department: text_or_default(item.department, "NSE"),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const LISTING_FIXTURE: &str = include_str!("../../tests/fixtures/nse_circulars.json");

    fn harvest_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 26).unwrap()
    }

    #[test]
    fn compact_and_display_dates_both_normalize() {
        let listing: NseListing = serde_json::from_str(LISTING_FIXTURE).unwrap();
        let records = collect_rows(listing, harvest_date());
        assert_eq!(records.len(), 3);

        // display date preferred when present
        assert_eq!(records[0].published_date.to_string(), "2026-08-20");
        // compact-only row parses via the 8-digit special case
        assert_eq!(records[1].published_date.to_string(), "2026-08-22");
    }

    #[test]
    fn relative_file_links_join_against_the_archives_host() {
        let listing: NseListing = serde_json::from_str(LISTING_FIXTURE).unwrap();
        let records = collect_rows(listing, harvest_date());

        assert_eq!(
            records[0].pdf_url.as_deref(),
            Some("https://nsearchives.nseindia.com/content/circulars/CMTR61234.pdf")
        );
        // absolute links pass through untouched
        assert_eq!(
            records[1].pdf_url.as_deref(),
            Some("https://nsearchives.nseindia.com/content/circulars/CML44109.pdf")
        );
        // the file link doubles as the dedup detail_url
        assert_eq!(records[0].detail_url, records[0].pdf_url.clone().unwrap());
    }

    #[test]
    fn missing_taxonomy_fields_take_documented_defaults() {
        let listing: NseListing = serde_json::from_str(LISTING_FIXTURE).unwrap();
        let records = collect_rows(listing, harvest_date());

        let sparse = &records[2];
        assert_eq!(sparse.title, "Untitled");
        assert_eq!(sparse.category, "Circular");
        assert_eq!(sparse.department, "NSE");
        assert_eq!(sparse.circular_number, None);
        assert_eq!(sparse.pdf_url, None);
        assert_eq!(sparse.detail_url, "");
        // no usable date at all: harvest date stands in
        assert_eq!(sparse.published_date, harvest_date());
    }

    #[test]
    fn payload_without_data_key_yields_zero_rows() {
        let listing: NseListing = serde_json::from_str(r#"{"fromDate": "12-08-2026"}"#).unwrap();
        assert!(collect_rows(listing, harvest_date()).is_empty());
    }
}
