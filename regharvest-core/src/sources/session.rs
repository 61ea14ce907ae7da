//! Per-source stateful HTTP session with bounded retry.
//!
//! All three regulators gate their listing endpoints on browser-looking
//! traffic: cookies handed out by a landing page, a desktop User-Agent,
//! and source-specific Referer/Origin headers. The session wraps a
//! cookie-bearing blocking client with that profile and owns the retry
//! policy: a 403 (or a source-declared session-expired status) clears all
//! cookies, re-runs the warmup, and retries after a fixed backoff; any
//! other non-2xx is terminal for the request.
//!
//! The transport sits behind [`HttpBackend`] so the retry/warmup behavior
//! is assertable against a scripted double, the same seam-for-tests
//! pattern as the adapter trait itself.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::cookie::Jar;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::SourceError;

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One request as the session sees it. Built once by the adapter and
/// reusable, since the retry loop re-issues the same request verbatim.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl SessionRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            form: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(url)
        }
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Status and buffered body of one response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport seam. The production implementation drives
/// `reqwest::blocking`; tests substitute a scripted double to pin down the
/// retry and cookie-clearing behavior.
pub trait HttpBackend {
    fn execute(&mut self, request: &SessionRequest) -> Result<RawResponse, SourceError>;

    /// Drop all session cookies. The next warmup starts from scratch.
    fn clear_cookies(&mut self);
}

/// Per-source session tuning: warmup target, default headers, the
/// source-specific session-expired statuses, and the retry budget.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub user_agent: String,
    pub warmup_url: String,
    pub default_headers: Vec<(String, String)>,
    /// Statuses beyond 403 that mean "session expired, re-warm and retry".
    pub session_expired_statuses: Vec<u16>,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl SessionProfile {
    pub fn new(warmup_url: impl Into<String>) -> Self {
        Self {
            user_agent: DESKTOP_USER_AGENT.to_string(),
            warmup_url: warmup_url.into(),
            default_headers: Vec::new(),
            session_expired_statuses: Vec::new(),
            max_attempts: 3,
            backoff: Duration::from_secs(2),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn expired_status(mut self, status: u16) -> Self {
        self.session_expired_statuses.push(status);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// `reqwest::blocking` transport with a rebuildable cookie jar.
pub struct ReqwestBackend {
    client: Client,
    user_agent: String,
    timeout: Duration,
    default_headers: Vec<(String, String)>,
}

impl ReqwestBackend {
    pub fn new(profile: &SessionProfile) -> Result<Self, SourceError> {
        let client = Self::build_client(&profile.user_agent, profile.timeout)?;
        Ok(Self {
            client,
            user_agent: profile.user_agent.clone(),
            timeout: profile.timeout,
            default_headers: profile.default_headers.clone(),
        })
    }

    fn build_client(user_agent: &str, timeout: Duration) -> Result<Client, SourceError> {
        Client::builder()
            .cookie_provider(Arc::new(Jar::default()))
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Client(e.to_string()))
    }
}

impl HttpBackend for ReqwestBackend {
    fn execute(&mut self, request: &SessionRequest) -> Result<RawResponse, SourceError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in merge_headers(&self.default_headers, &request.headers) {
            builder = builder.header(name, value);
        }
        if request.method == Method::Post {
            builder = builder.form(&request.form);
        }

        let response = builder
            .send()
            .map_err(|e| SourceError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| SourceError::Network(e.to_string()))?;
        Ok(RawResponse { status, body })
    }

    fn clear_cookies(&mut self) {
        // The jar offers no clear-in-place, so swap in a fresh client.
        if let Ok(client) = Self::build_client(&self.user_agent, self.timeout) {
            self.client = client;
        }
    }
}

/// Request headers first, then every profile default whose name the request
/// does not set itself. A name set in both places must not be sent twice:
/// duplicated Accept or Referer values read as non-browser traffic to the
/// bot gates these profiles exist to satisfy.
fn merge_headers<'a>(
    defaults: &'a [(String, String)],
    overrides: &'a [(String, String)],
) -> Vec<(&'a str, &'a str)> {
    let mut merged: Vec<(&str, &str)> = overrides
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_str()))
        .collect();
    for (name, value) in defaults {
        if !overrides.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
            merged.push((name.as_str(), value.as_str()));
        }
    }
    merged
}

/// Cookie-bearing session with request-level retry.
pub struct HttpSession<B: HttpBackend = ReqwestBackend> {
    backend: B,
    profile: SessionProfile,
}

impl HttpSession<ReqwestBackend> {
    pub fn connect(profile: SessionProfile) -> Result<Self, SourceError> {
        let backend = ReqwestBackend::new(&profile)?;
        Ok(Self { backend, profile })
    }
}

impl<B: HttpBackend> HttpSession<B> {
    pub fn with_backend(profile: SessionProfile, backend: B) -> Self {
        Self { backend, profile }
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    /// GET the source landing page solely to collect anti-bot/session
    /// cookies. Idempotent; the retrieved body is discarded.
    pub fn warmup(&mut self) -> Result<(), SourceError> {
        let request = SessionRequest::get(&self.profile.warmup_url);
        self.backend.execute(&request).map(|_| ())
    }

    fn is_session_expired(&self, status: u16) -> bool {
        status == 403 || self.profile.session_expired_statuses.contains(&status)
    }

    /// Issue `request` with up to `max_attempts` attempts.
    ///
    /// A 403 or session-expired status clears all cookies (they cannot be
    /// partially refreshed), re-runs the warmup, sleeps the fixed backoff,
    /// and retries. Transport errors consume an attempt and retry the same
    /// way. Any other non-2xx status is terminal. Exhausting the budget
    /// yields `Unavailable`, which adapters report as zero records.
    pub fn request_with_retry(&mut self, request: &SessionRequest) -> Result<String, SourceError> {
        for attempt in 1..=self.profile.max_attempts {
            let response = match self.backend.execute(request) {
                Ok(response) => response,
                Err(SourceError::Network(reason)) => {
                    warn!(attempt, url = %request.url, %reason, "transport error");
                    if attempt < self.profile.max_attempts {
                        thread::sleep(self.profile.backoff);
                    }
                    continue;
                }
                Err(other) => return Err(other),
            };

            if response.is_success() {
                return Ok(response.body);
            }

            if self.is_session_expired(response.status) {
                warn!(
                    attempt,
                    status = response.status,
                    url = %request.url,
                    "session rejected; clearing cookies and re-warming"
                );
                // No retry will follow the last attempt; skip the re-warm.
                if attempt == self.profile.max_attempts {
                    break;
                }
                self.backend.clear_cookies();
                if let Err(e) = self.warmup() {
                    debug!(error = %e, "warmup after rejection failed");
                }
                thread::sleep(self.profile.backoff);
                continue;
            }

            return Err(SourceError::HttpStatus {
                status: response.status,
                url: request.url.clone(),
            });
        }

        Err(SourceError::Unavailable {
            attempts: self.profile.max_attempts,
        })
    }

    /// `request_with_retry` plus JSON decode. A body that fails to decode
    /// is re-fetched exactly once before the mismatch becomes terminal.
    pub fn request_json<T: DeserializeOwned>(
        &mut self,
        request: &SessionRequest,
    ) -> Result<T, SourceError> {
        let body = self.request_with_retry(request)?;
        match serde_json::from_str(&body) {
            Ok(value) => Ok(value),
            Err(first) => {
                debug!(url = %request.url, error = %first, "undecodable body; re-fetching once");
                let body = self.request_with_retry(request)?;
                serde_json::from_str(&body).map_err(|_| {
                    SourceError::ParseMismatch(format!("response is not valid JSON: {first}"))
                })
            }
        }
    }
}

/// Scripted transport shared by the session and adapter tests: pops one
/// canned response per execute call and records everything the session
/// does to it.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::{HttpBackend, RawResponse, SessionRequest};
    use crate::sources::SourceError;

    pub(crate) struct ScriptedBackend {
        script: VecDeque<Result<RawResponse, SourceError>>,
        pub(crate) requests: Vec<SessionRequest>,
        pub(crate) cookie_clears: usize,
    }

    impl ScriptedBackend {
        pub(crate) fn new(script: Vec<Result<RawResponse, SourceError>>) -> Self {
            Self {
                script: script.into(),
                requests: Vec::new(),
                cookie_clears: 0,
            }
        }

        pub(crate) fn ok(status: u16, body: &str) -> Result<RawResponse, SourceError> {
            Ok(RawResponse {
                status,
                body: body.to_string(),
            })
        }
    }

    impl HttpBackend for ScriptedBackend {
        fn execute(&mut self, request: &SessionRequest) -> Result<RawResponse, SourceError> {
            self.requests.push(request.clone());
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(SourceError::Network("script exhausted".into())))
        }

        fn clear_cookies(&mut self) {
            self.cookie_clears += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;

    fn fast_profile() -> SessionProfile {
        SessionProfile::new("https://example.test/").backoff(Duration::ZERO)
    }

    fn warmup_count(backend: &ScriptedBackend) -> usize {
        backend
            .requests
            .iter()
            .filter(|r| r.url == "https://example.test/")
            .count()
    }

    #[test]
    fn request_headers_override_profile_defaults() {
        let defaults = vec![
            ("Accept".to_string(), "application/json".to_string()),
            (
                "Referer".to_string(),
                "https://example.test/landing".to_string(),
            ),
        ];
        let overrides = vec![("accept".to_string(), "text/html".to_string())];

        // one Accept only, the request's; untouched defaults pass through
        let merged = merge_headers(&defaults, &overrides);
        assert_eq!(
            merged,
            vec![
                ("accept", "text/html"),
                ("Referer", "https://example.test/landing"),
            ]
        );
    }

    #[test]
    fn two_403s_then_success_costs_exactly_two_warmup_cycles() {
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::ok(403, "blocked"),
            ScriptedBackend::ok(200, ""), // warmup after first rejection
            ScriptedBackend::ok(403, "blocked"),
            ScriptedBackend::ok(200, ""), // warmup after second rejection
            ScriptedBackend::ok(200, "payload"),
        ]);
        let mut session = HttpSession::with_backend(fast_profile(), backend);

        let request = SessionRequest::get("https://example.test/api/circulars");
        let body = session.request_with_retry(&request).unwrap();

        assert_eq!(body, "payload");
        assert_eq!(session.backend.cookie_clears, 2);
        assert_eq!(warmup_count(&session.backend), 2);
        // 3 API attempts + 2 warmups, max_attempts=3 exactly satisfied
        assert_eq!(session.backend.requests.len(), 5);
    }

    #[test]
    fn exhausting_attempts_yields_unavailable() {
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::ok(403, ""),
            ScriptedBackend::ok(200, ""),
            ScriptedBackend::ok(403, ""),
            ScriptedBackend::ok(200, ""),
            ScriptedBackend::ok(403, ""),
        ]);
        let mut session = HttpSession::with_backend(fast_profile(), backend);

        let err = session
            .request_with_retry(&SessionRequest::get("https://example.test/api"))
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { attempts: 3 }));
        assert!(err.is_transient());
        // the final rejection is not followed by a pointless re-warm cycle
        assert_eq!(session.backend.cookie_clears, 2);
        assert_eq!(warmup_count(&session.backend), 2);
        assert_eq!(session.backend.requests.len(), 5);
    }

    #[test]
    fn other_non_2xx_is_terminal_without_retry() {
        let backend = ScriptedBackend::new(vec![ScriptedBackend::ok(500, "boom")]);
        let mut session = HttpSession::with_backend(fast_profile(), backend);

        let err = session
            .request_with_retry(&SessionRequest::get("https://example.test/api"))
            .unwrap_err();
        assert!(matches!(err, SourceError::HttpStatus { status: 500, .. }));
        assert_eq!(session.backend.requests.len(), 1);
        assert_eq!(session.backend.cookie_clears, 0);
    }

    #[test]
    fn source_specific_expired_status_triggers_rewarm() {
        let profile = fast_profile().expired_status(530);
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::ok(530, "session expired"),
            ScriptedBackend::ok(200, ""), // warmup
            ScriptedBackend::ok(200, "fragment"),
        ]);
        let mut session = HttpSession::with_backend(profile, backend);

        let body = session
            .request_with_retry(&SessionRequest::post("https://example.test/ajax"))
            .unwrap();
        assert_eq!(body, "fragment");
        assert_eq!(session.backend.cookie_clears, 1);
    }

    #[test]
    fn transport_errors_consume_attempts() {
        let backend = ScriptedBackend::new(vec![
            Err(SourceError::Network("connection reset".into())),
            ScriptedBackend::ok(200, "ok"),
        ]);
        let mut session = HttpSession::with_backend(fast_profile(), backend);

        let body = session
            .request_with_retry(&SessionRequest::get("https://example.test/api"))
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[test]
    fn malformed_json_is_refetched_exactly_once() {
        #[derive(serde::Deserialize)]
        struct Payload {
            n: u32,
        }

        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::ok(200, "<html>not json</html>"),
            ScriptedBackend::ok(200, r#"{"n": 7}"#),
        ]);
        let mut session = HttpSession::with_backend(fast_profile(), backend);

        let payload: Payload = session
            .request_json(&SessionRequest::get("https://example.test/api"))
            .unwrap();
        assert_eq!(payload.n, 7);
        assert_eq!(session.backend.requests.len(), 2);
    }

    #[test]
    fn twice_malformed_json_is_a_parse_mismatch() {
        let backend = ScriptedBackend::new(vec![
            ScriptedBackend::ok(200, "garbage"),
            ScriptedBackend::ok(200, "still garbage"),
        ]);
        let mut session = HttpSession::with_backend(fast_profile(), backend);

        let err = session
            .request_json::<serde_json::Value>(&SessionRequest::get("https://example.test/api"))
            .unwrap_err();
        assert!(matches!(err, SourceError::ParseMismatch(_)));
        assert_eq!(session.backend.requests.len(), 2);
    }
}
