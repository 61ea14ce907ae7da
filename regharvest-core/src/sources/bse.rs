//! BSE circulars adapter.
//!
//! Primary path is the JSON listing API. When that fails — redirect loop,
//! blocked request, or a payload that is not a list — the adapter falls
//! back to the rendered ASP.NET notices page: scrape the hidden
//! `__VIEWSTATE` / `__VIEWSTATEGENERATOR` / `__EVENTVALIDATION` fields and
//! resubmit them verbatim with the date range. The tokens are
//! single-use-per-render, so they are scraped immediately before posting.
//! The two paths form an ordered strategy list tried in sequence.

use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::dates::{self, DateWindow};
use crate::record::{CircularRecord, Source};

use super::html;
use super::session::{HttpBackend, HttpSession, ReqwestBackend, SessionProfile, SessionRequest};
use super::{CircularSource, SourceError};

const BSE_BASE: &str = "https://www.bseindia.com";
const API_URL: &str = "https://api.bseindia.com/BseIndiaAPI/api/GetDataCirToListComp/w";
const NOTICES_URL: &str = "https://www.bseindia.com/markets/MarketInfo/NoticesCirculars.aspx";
const DETAIL_BASE: &str =
    "https://www.bseindia.com/markets/MarketInfo/DispNewNoticesCirculars.aspx?page=";
const CORPORATES_PAGE: &str = "https://www.bseindia.com/corporates/CirularToListedComp.html";

/// Day-first forms first; BSE renders `dd/mm/yyyy` in the common case.
const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y", "%d-%m-%Y", "%d %b %Y", "%d %B %Y", "%Y-%m-%d", "%m/%d/%Y", "%b %d, %Y",
    "%B %d, %Y",
];

const DETAIL_PAUSE: Duration = Duration::from_millis(300);

static NOTICE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"page=([^&'\x22]+)").unwrap());

/// Listing payload: normally `{"Table": [...]}`, occasionally a bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BseFeed {
    Wrapped {
        #[serde(rename = "Table", default)]
        table: Vec<BseItem>,
    },
    Bare(Vec<BseItem>),
}

impl BseFeed {
    fn into_items(self) -> Vec<BseItem> {
        match self {
            BseFeed::Wrapped { table } => table,
            BseFeed::Bare(items) => items,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct BseItem {
    #[serde(rename = "mr_heading", default)]
    heading: Option<String>,
    #[serde(rename = "mr_date", default)]
    date: Option<String>,
    /// Rendered as a string or a bare number depending on the backend.
    #[serde(rename = "articleid", default)]
    article_id: Option<serde_json::Value>,
}

impl BseItem {
    fn article_id_text(&self) -> Option<String> {
        match self.article_id.as_ref()? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Result of one listing strategy: rows, or a reason to try the next one.
enum ListingOutcome {
    Rows(Vec<CircularRecord>),
    TryNext(String),
}

pub struct BseScraper<B: HttpBackend = ReqwestBackend> {
    session: HttpSession<B>,
    detail_pause: Duration,
    /// Fixed harvest date; `None` means the current local date per run.
    harvest_date: Option<NaiveDate>,
}

impl BseScraper {
    pub fn new() -> Result<Self, SourceError> {
        let profile = SessionProfile::new(format!("{BSE_BASE}/"))
            .header("Accept", "application/json, text/plain, */*")
            .header("Referer", CORPORATES_PAGE)
            .header("Origin", BSE_BASE);
        Ok(Self {
            session: HttpSession::connect(profile)?,
            detail_pause: DETAIL_PAUSE,
            harvest_date: None,
        })
    }
}

impl<B: HttpBackend> CircularSource for BseScraper<B> {
    fn source(&self) -> Source {
        Source::Bse
    }

    fn fetch(&mut self, days: u32) -> Result<Vec<CircularRecord>, SourceError> {
        if let Err(e) = self.session.warmup() {
            warn!(error = %e, "BSE warmup failed; proceeding without cookies");
        }

        let today = self
            .harvest_date
            .unwrap_or_else(|| Local::now().date_naive());
        let window = DateWindow::last_days(today, days);

        let strategies: [(&str, fn(&mut Self, &DateWindow, NaiveDate) -> ListingOutcome); 2] = [
            ("json-api", Self::listing_from_api),
            ("aspnet-postback", Self::listing_from_postback),
        ];

        let mut records = Vec::new();
        let mut found = false;
        for (name, strategy) in strategies {
            match strategy(self, &window, today) {
                ListingOutcome::Rows(rows) => {
                    info!(strategy = name, count = rows.len(), "BSE listing parsed");
                    records = rows;
                    found = true;
                    break;
                }
                ListingOutcome::TryNext(reason) => {
                    warn!(strategy = name, %reason, "BSE listing strategy failed; trying next");
                }
            }
        }
        if !found {
            warn!("BSE listing unavailable this run");
            return Ok(Vec::new());
        }

        for record in &mut records {
            if record.detail_url.is_empty() {
                continue;
            }
            match self.session.request_with_retry(
                &SessionRequest::get(&record.detail_url).header("Accept", "text/html"),
            ) {
                Ok(page) => record.pdf_url = extract_pdf_url(&page),
                Err(e) => {
                    warn!(title = record.short_title(), error = %e, "BSE detail fetch failed")
                }
            }
            thread::sleep(self.detail_pause);
        }

        Ok(records)
    }
}

impl<B: HttpBackend> BseScraper<B> {
    /// Primary strategy: the JSON listing API. The endpoint does not
    /// filter by date, so the window is applied client-side.
    fn listing_from_api(&mut self, window: &DateWindow, today: NaiveDate) -> ListingOutcome {
        let request = SessionRequest::get(API_URL);
        let feed: BseFeed = match self.session.request_json(&request) {
            Ok(feed) => feed,
            Err(e) => return ListingOutcome::TryNext(e.to_string()),
        };
        ListingOutcome::Rows(collect_api_rows(feed.into_items(), window, today))
    }

    /// Fallback strategy: the rendered notices page. The anti-forgery
    /// tokens are single-use-per-render and must go back verbatim.
    fn listing_from_postback(&mut self, window: &DateWindow, today: NaiveDate) -> ListingOutcome {
        let page = match self.session.request_with_retry(
            &SessionRequest::get(NOTICES_URL).header("Accept", "text/html,application/xhtml+xml"),
        ) {
            Ok(page) => page,
            Err(e) => return ListingOutcome::TryNext(e.to_string()),
        };

        let Some(viewstate) = html::hidden_input_value(&page, "__VIEWSTATE") else {
            return ListingOutcome::TryNext("missing __VIEWSTATE token".to_string());
        };
        let generator = html::hidden_input_value(&page, "__VIEWSTATEGENERATOR").unwrap_or_default();
        let validation = html::hidden_input_value(&page, "__EVENTVALIDATION").unwrap_or_default();

        let request = SessionRequest::post(NOTICES_URL)
            .header("Referer", NOTICES_URL)
            .header("Accept", "text/html")
            .form("__VIEWSTATE", viewstate)
            .form("__VIEWSTATEGENERATOR", generator)
            .form("__EVENTVALIDATION", validation)
            .form("ctl00$ContentPlaceHolder1$rdbPeriod", "rdbPeriod")
            .form(
                "ctl00$ContentPlaceHolder1$txtFromDt",
                window.from.format("%d/%m/%Y").to_string(),
            )
            .form(
                "ctl00$ContentPlaceHolder1$txtToDate",
                window.to.format("%d/%m/%Y").to_string(),
            )
            .form("ctl00$ContentPlaceHolder1$ddlSegName", "")
            .form("ctl00$ContentPlaceHolder1$ddlCategoryName", "")
            .form("ctl00$ContentPlaceHolder1$btnSubmit", "Submit");

        match self.session.request_with_retry(&request) {
            Ok(body) => ListingOutcome::Rows(parse_postback_rows(&body, today)),
            Err(e) => ListingOutcome::TryNext(e.to_string()),
        }
    }
}

fn collect_api_rows(
    items: Vec<BseItem>,
    window: &DateWindow,
    harvest_date: NaiveDate,
) -> Vec<CircularRecord> {
    items
        .into_iter()
        .filter_map(|item| {
            let published = dates::normalize_date(
                item.date.as_deref().unwrap_or(""),
                DATE_FORMATS,
                harvest_date,
            );
            if !window.contains(published) {
                return None;
            }
            let number = item.article_id_text();
            let detail_url = number
                .as_deref()
                .map(|id| format!("{DETAIL_BASE}{id}"))
                .unwrap_or_default();
            Some(CircularRecord {
                source: Source::Bse,
                title: item.heading.unwrap_or_else(|| "Untitled".to_string()),
                circular_number: number,
                published_date: published,
                detail_url,
                pdf_url: None,
                category: "Circular".to_string(),
                department: "BSE".to_string(),
            })
        })
        .collect()
}

/// Postback result rows carry no machine-readable date; the harvest date
/// stands in, consistent with the lossy-date fallback everywhere else.
fn parse_postback_rows(page: &str, harvest_date: NaiveDate) -> Vec<CircularRecord> {
    let mut records = Vec::new();
    for row in html::rows(page) {
        let Some(anchor) = html::first_anchor(&row) else {
            continue;
        };
        let Some(notice_id) = NOTICE_ID_RE
            .captures(&anchor.href)
            .map(|caps| caps[1].to_string())
        else {
            continue;
        };
        records.push(CircularRecord {
            source: Source::Bse,
            title: anchor.text,
            circular_number: Some(notice_id.clone()),
            published_date: harvest_date,
            detail_url: format!("{DETAIL_BASE}{notice_id}"),
            pdf_url: None,
            category: "Circular".to_string(),
            department: "BSE".to_string(),
        });
    }
    records
}

/// Attachment links come first; direct `.pdf`/`.zip` anchors are the
/// fallback.
fn extract_pdf_url(page: &str) -> Option<String> {
    let anchors = html::anchors(page);
    if let Some(anchor) = anchors.iter().find(|a| a.href.contains("DownloadAttach")) {
        return html::absolutize(BSE_BASE, &anchor.href);
    }
    anchors
        .iter()
        .find(|a| {
            let href = a.href.to_ascii_lowercase();
            href.ends_with(".pdf") || href.ends_with(".zip")
        })
        .and_then(|a| html::absolutize(BSE_BASE, &a.href))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING_FIXTURE: &str = include_str!("../../tests/fixtures/bse_listing.json");
    const NOTICES_FIXTURE: &str = include_str!("../../tests/fixtures/bse_notices.html");

    fn harvest_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 26).unwrap()
    }

    #[test]
    fn json_window_keeps_exactly_the_in_window_subset() {
        // Fixture: 5 items spanning 20 days; 3 fall inside the 14-day window.
        let feed: BseFeed = serde_json::from_str(LISTING_FIXTURE).unwrap();
        let window = DateWindow::last_days(harvest_date(), 14);
        let records = collect_api_rows(feed.into_items(), &window, harvest_date());

        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.source, Source::Bse);
            assert_eq!(record.category, "Circular");
            assert!(window.contains(record.published_date));
        }
        // dateless item takes the harvest date and therefore stays in window
        let dateless = records
            .iter()
            .find(|r| r.title == "Notice without a date")
            .unwrap();
        assert_eq!(dateless.published_date, harvest_date());
        assert_eq!(dateless.published_date.to_string(), "2026-08-26");
    }

    #[test]
    fn numeric_article_ids_become_detail_urls() {
        let feed: BseFeed = serde_json::from_str(LISTING_FIXTURE).unwrap();
        let window = DateWindow::last_days(harvest_date(), 14);
        let records = collect_api_rows(feed.into_items(), &window, harvest_date());

        let first = &records[0];
        assert_eq!(first.circular_number.as_deref(), Some("20260820-31"));
        assert_eq!(
            first.detail_url,
            "https://www.bseindia.com/markets/MarketInfo/DispNewNoticesCirculars.aspx?page=20260820-31"
        );
        let numeric = records.iter().find(|r| r.title == "Numeric id notice").unwrap();
        assert_eq!(numeric.circular_number.as_deref(), Some("98431"));
    }

    #[test]
    fn bare_list_payload_decodes_too() {
        let bare = r#"[{"mr_heading": "One", "mr_date": "20/08/2026", "articleid": "A-1"}]"#;
        let feed: BseFeed = serde_json::from_str(bare).unwrap();
        assert_eq!(feed.into_items().len(), 1);
    }

    #[test]
    fn non_list_payload_is_undecodable() {
        assert!(serde_json::from_str::<BseFeed>(r#"{"Table": "maintenance"}"#).is_err());
        assert!(serde_json::from_str::<BseFeed>(r#""gateway timeout""#).is_err());
    }

    #[test]
    fn postback_tokens_are_scraped_from_the_rendered_page() {
        assert_eq!(
            html::hidden_input_value(NOTICES_FIXTURE, "__VIEWSTATE").as_deref(),
            Some("dDwtMTYxNjY4NzU1MjtsPHZhbGlkYXRpb24+Pg==")
        );
        assert_eq!(
            html::hidden_input_value(NOTICES_FIXTURE, "__VIEWSTATEGENERATOR").as_deref(),
            Some("CA0B0334")
        );
        assert_eq!(
            html::hidden_input_value(NOTICES_FIXTURE, "__EVENTVALIDATION").as_deref(),
            Some("/wEWAgL+1JqGCQKM54rGBg==")
        );
    }

    #[test]
    fn postback_rows_take_the_harvest_date() {
        let records = parse_postback_rows(NOTICES_FIXTURE, harvest_date());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "Trading holiday calendar update");
        assert_eq!(records[0].circular_number.as_deref(), Some("20260825-12"));
        assert_eq!(
            records[0].detail_url,
            "https://www.bseindia.com/markets/MarketInfo/DispNewNoticesCirculars.aspx?page=20260825-12"
        );
        assert!(records.iter().all(|r| r.published_date == harvest_date()));
    }

    #[test]
    fn detail_prefers_download_attach_over_direct_links() {
        let page = r#"
            <a href="/xml-data/corpfiling/Att.zip">direct</a>
            <a href="DownloadAttach.aspx?id=9912&name=notice.pdf">attachment</a>
        "#;
        assert_eq!(
            extract_pdf_url(page).as_deref(),
            Some("https://www.bseindia.com/DownloadAttach.aspx?id=9912&name=notice.pdf")
        );
    }

    #[test]
    fn undecodable_api_payload_falls_back_to_the_postback_path() {
        use super::super::session::testing::ScriptedBackend;
        use super::super::session::Method;

        let detail_page = r#"<a href="DownloadAttach.aspx?id=1&name=a.pdf">attachment</a>"#;
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::ok(200, ""), // warmup
            ScriptedBackend::ok(200, "<html>maintenance</html>"), // listing API
            ScriptedBackend::ok(200, "<html>maintenance</html>"), // listing API re-fetch
            ScriptedBackend::ok(200, NOTICES_FIXTURE), // notices render for tokens
            ScriptedBackend::ok(200, NOTICES_FIXTURE), // postback result table
            ScriptedBackend::ok(200, detail_page),
            ScriptedBackend::ok(200, detail_page),
        ]);
        let profile = SessionProfile::new(format!("{BSE_BASE}/")).backoff(Duration::ZERO);
        let mut scraper = BseScraper {
            session: HttpSession::with_backend(profile, backend),
            detail_pause: Duration::ZERO,
            harvest_date: Some(harvest_date()),
        };

        let records = scraper.fetch(14).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].circular_number.as_deref(), Some("20260825-12"));
        assert!(records.iter().all(|r| r.published_date == harvest_date()));
        assert!(records.iter().all(|r| r.pdf_url.as_deref()
            == Some("https://www.bseindia.com/DownloadAttach.aspx?id=1&name=a.pdf")));

        // the resubmitted POST carried the freshly scraped anti-forgery tokens
        let post = scraper
            .session
            .backend()
            .requests
            .iter()
            .find(|r| r.method == Method::Post)
            .expect("postback request issued");
        assert!(post.form.contains(&(
            "__VIEWSTATE".into(),
            "dDwtMTYxNjY4NzU1MjtsPHZhbGlkYXRpb24+Pg==".into()
        )));
    }

    #[test]
    fn detail_falls_back_to_pdf_or_zip_anchors() {
        let page = r#"<a href="/downloads/notice_81.PDF">download</a>"#;
        assert_eq!(
            extract_pdf_url(page).as_deref(),
            Some("https://www.bseindia.com/downloads/notice_81.PDF")
        );
        assert_eq!(extract_pdf_url("<p>no links</p>"), None);
    }
}
