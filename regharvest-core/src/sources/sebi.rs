//! SEBI circulars adapter.
//!
//! The listing lives behind an AJAX endpoint gated on a `JSESSIONID`
//! cookie handed out by the public listing page. The query is a
//! form-encoded POST carrying the date range and the Legal/Circulars
//! category filters; HTTP 530 means the session expired and is retried
//! once after re-warming. The response body is HTML fragments delimited by
//! a `#@#` sentinel — only the first fragment carries the row table.
//! PDFs are not linked from the listing: each row's detail page embeds a
//! viewer iframe whose `file` query parameter is the document URL.

use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use regex::Regex;
use tracing::{info, warn};

use crate::dates::{self, DateWindow};
use crate::record::{CircularRecord, Source};

use super::html;
use super::session::{HttpBackend, HttpSession, ReqwestBackend, SessionProfile, SessionRequest};
use super::{CircularSource, SourceError};

const BASE_URL: &str = "https://www.sebi.gov.in";
const LISTING_URL: &str =
    "https://www.sebi.gov.in/sebiweb/home/HomeAction.do?doListing=yes&sid=1&ssid=7&smid=0";
const AJAX_URL: &str = "https://www.sebi.gov.in/sebiweb/ajax/home/getnewslistinfo.jsp";

/// Fragment delimiter in the AJAX response; everything after the first
/// occurrence is pagination chrome.
const FRAGMENT_SENTINEL: &str = "#@#";

/// SEBI's session-expired status.
const SESSION_EXPIRED_STATUS: u16 = 530;

/// Listing dates render as "Aug 20, 2026"; the rest are occasional drift.
const DATE_FORMATS: &[&str] = &["%b %d, %Y", "%B %d, %Y", "%d-%m-%Y", "%d/%m/%Y", "%Y-%m-%d"];

const DETAIL_PAUSE: Duration = Duration::from_millis(500);

static CIRCULAR_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(\d+)\.html").unwrap());

pub struct SebiScraper<B: HttpBackend = ReqwestBackend> {
    session: HttpSession<B>,
    detail_pause: Duration,
    /// Fixed harvest date; `None` means the current local date per run.
    harvest_date: Option<NaiveDate>,
}

impl SebiScraper {
    pub fn new() -> Result<Self, SourceError> {
        let profile = SessionProfile::new(LISTING_URL)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .expired_status(SESSION_EXPIRED_STATUS)
            // one session re-acquisition, then a single retry of the POST
            .max_attempts(2);
        Ok(Self {
            session: HttpSession::connect(profile)?,
            detail_pause: DETAIL_PAUSE,
            harvest_date: None,
        })
    }
}

impl<B: HttpBackend> CircularSource for SebiScraper<B> {
    fn source(&self) -> Source {
        Source::Sebi
    }

    fn fetch(&mut self, days: u32) -> Result<Vec<CircularRecord>, SourceError> {
        if let Err(e) = self.session.warmup() {
            warn!(error = %e, "SEBI warmup failed; proceeding without session cookie");
        }

        let today = self
            .harvest_date
            .unwrap_or_else(|| Local::now().date_naive());
        let window = DateWindow::last_days(today, days);

        let body = match self.session.request_with_retry(&listing_request(&window)) {
            Ok(body) => body,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "SEBI listing unavailable this run");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut records = parse_listing(&body, today);
        info!(count = records.len(), "SEBI listing parsed");

        for record in &mut records {
            if record.detail_url.is_empty() {
                continue;
            }
            match self
                .session
                .request_with_retry(&SessionRequest::get(&record.detail_url))
            {
                Ok(page) => record.pdf_url = extract_pdf_url(&page),
                Err(e) => {
                    warn!(title = record.short_title(), error = %e, "SEBI detail fetch failed")
                }
            }
            thread::sleep(self.detail_pause);
        }

        Ok(records)
    }
}

/// The AJAX form mirrors what the listing page posts: date range plus the
/// Legal/Circulars section identifiers. The endpoint filters server-side.
fn listing_request(window: &DateWindow) -> SessionRequest {
    SessionRequest::post(AJAX_URL)
        .header("Referer", LISTING_URL)
        .form("nextValue", "1")
        .form("next", "s")
        .form("search", "")
        .form("fromDate", window.from.format("%d-%m-%Y").to_string())
        .form("toDate", window.to.format("%d-%m-%Y").to_string())
        .form("fromYear", "")
        .form("toYear", "")
        .form("deptId", "-1")
        .form("sid", "1")
        .form("ssid", "7")
        .form("smid", "0")
        .form("ssidhidden", "7")
        .form("intmid", "-1")
        .form("sText", "Legal")
        .form("ssText", "Circulars")
        .form("smText", "")
        .form("doDirect", "-1")
}

/// First fragment only; rows are `<tr role="row">` with the date in the
/// first cell and the titled detail link in the second.
fn parse_listing(body: &str, harvest_date: NaiveDate) -> Vec<CircularRecord> {
    let fragment = body.split(FRAGMENT_SENTINEL).next().unwrap_or(body);

    let mut records = Vec::new();
    for row in html::role_rows(fragment) {
        let cells = html::cells(&row);
        if cells.len() < 2 {
            continue;
        }
        let Some(anchor) = html::first_anchor(&cells[1]) else {
            continue;
        };
        let Some(detail_url) = html::absolutize(BASE_URL, &anchor.href) else {
            continue;
        };

        let date_text = html::strip_tags(&cells[0]);
        records.push(CircularRecord {
            source: Source::Sebi,
            title: anchor.text,
            circular_number: circular_number_from_url(&detail_url),
            published_date: dates::normalize_date(&date_text, DATE_FORMATS, harvest_date),
            detail_url,
            pdf_url: None,
            category: "Circular".to_string(),
            department: "SEBI".to_string(),
        });
    }
    records
}

/// SEBI detail URLs end in `_<digits>.html`; the digits double as the
/// circular identifier.
fn circular_number_from_url(url: &str) -> Option<String> {
    CIRCULAR_ID_RE
        .captures(url)
        .map(|caps| caps[1].to_string())
}

/// The detail page embeds the PDF in a viewer iframe whose `file` query
/// parameter carries the document URL; older pages link the PDF directly.
fn extract_pdf_url(page: &str) -> Option<String> {
    if let Some(src) = html::iframe_src(page) {
        if let Some(viewer) = html::absolutize(BASE_URL, &src) {
            if let Some(file) = html::query_param(&viewer, "file") {
                return Some(file);
            }
        }
    }
    html::anchors(page)
        .into_iter()
        .find(|a| a.href.to_ascii_lowercase().ends_with(".pdf"))
        .and_then(|a| html::absolutize(BASE_URL, &a.href))
}
