//! Regex-driven HTML extraction helpers.
//!
//! The sources render listing data server-side, but the shapes we read are
//! few and shallow: anchors, hidden form inputs, one iframe, and
//! role-tagged table rows. Tag-level scanning covers all of them without a
//! DOM; unrecognized markup simply yields no matches, which the adapters
//! treat as zero rows.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).unwrap()
});
static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b[^>]*>").unwrap());
static IFRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<iframe\b[^>]*?src\s*=\s*["']([^"']*)["']"#).unwrap()
});
static ROLE_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<tr[^>]*\brole\s*=\s*["']row["'][^>]*>(.*?)</tr>"#).unwrap()
});
static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap());
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").unwrap());
static NAME_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bname\s*=\s*["']([^"']*)["']"#).unwrap());
static VALUE_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bvalue\s*=\s*["']([^"']*)["']"#).unwrap());

/// One `<a>` element: raw href plus tag-stripped text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub href: String,
    pub text: String,
}

pub fn anchors(html: &str) -> Vec<Anchor> {
    ANCHOR_RE
        .captures_iter(html)
        .map(|caps| Anchor {
            href: decode_entities(caps[1].trim()),
            text: strip_tags(&caps[2]),
        })
        .collect()
}

pub fn first_anchor(html: &str) -> Option<Anchor> {
    anchors(html).into_iter().next()
}

/// Value of the `<input>` carrying the given `name` attribute, regardless
/// of attribute order inside the tag. Used for ASP.NET anti-forgery fields.
pub fn hidden_input_value(html: &str, name: &str) -> Option<String> {
    for tag in INPUT_RE.find_iter(html) {
        if attr(&NAME_ATTR_RE, tag.as_str()).as_deref() == Some(name) {
            return attr(&VALUE_ATTR_RE, tag.as_str());
        }
    }
    None
}

/// `src` of the first `<iframe>`.
pub fn iframe_src(html: &str) -> Option<String> {
    IFRAME_RE
        .captures(html)
        .map(|caps| decode_entities(caps[1].trim()))
}

/// Inner HTML of every `<tr role="row">` element.
pub fn role_rows(html: &str) -> Vec<String> {
    ROLE_ROW_RE
        .captures_iter(html)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Inner HTML of every `<tr>` element.
pub fn rows(html: &str) -> Vec<String> {
    ROW_RE.captures_iter(html).map(|caps| caps[1].to_string()).collect()
}

/// Inner HTML of every `<td>` inside one row.
pub fn cells(row_html: &str) -> Vec<String> {
    CELL_RE
        .captures_iter(row_html)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn attr(re: &Regex, tag: &str) -> Option<String> {
    re.captures(tag).map(|caps| decode_entities(&caps[1]))
}

/// Drop tags, decode the handful of entities the sources emit, and
/// collapse whitespace.
pub fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    normalize_ws(&decode_entities(&text))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join a possibly-relative href against the source's base URL. Absolute
/// hrefs pass through untouched; an empty or unjoinable href yields `None`.
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(String::from)
}

/// Value of one query parameter of an absolute URL.
pub fn query_param(url_text: &str, name: &str) -> Option<String> {
    let url = Url::parse(url_text).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
