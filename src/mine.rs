//! Candidate mining: overlapping passes over raw page HTML.
//!
//! The target site serves extension-less CDN URLs and escapes them inside
//! inline JSON, so no single pass finds everything. Every pass feeds one
//! insertion-ordered pool; duplicates are dropped on entry and later stages
//! decide what is media.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use crate::classify::has_media_extension;
use crate::config::{FilterRules, ScannerKind};
use crate::models::{CandidateLink, SourcePass};

// ── Constants ────────────────────────────────────────────────────────────────

const SCRIPT_KEYS: &[&str] = &[
    "url",
    "image",
    "imageUrl",
    "picUrl",
    "src",
    "cover",
    "thumbnail",
    "urlDefault",
    "urlPre",
    "masterUrl",
];

const DATA_ATTRS: &[&str] = &[
    "data-src",
    "data-url",
    "data-image",
    "data-original",
    "data-clipboard-text",
    "data-href",
];

const MEDIA_TAGS: &[&str] = &["img", "video", "source"];

/// Entity-encoded quotes end a URL embedded in attribute JSON.
const ENCODED_QUOTES: &[&str] = &["&quot;", "&#34;", "&#x22;", "&#39;", "&#x27;"];

// ── Lazy static regexes ──────────────────────────────────────────────────────

static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>(.*?)</script>").unwrap());

static KEY_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    let keys = SCRIPT_KEYS.join("|");
    Regex::new(&format!(r#""({keys})"\s*:\s*"((?:[^"\\]|\\.)*)""#)).unwrap()
});

// Matches URLs whose slashes may be written as `\/` or `/`.
static ESCAPED_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)https?:(?:\\?/|\\u002f){2}(?:[^\s"'<>\\]|\\/|\\u[0-9a-f]{4})+"#).unwrap()
});

static GENERIC_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)https?://[^\s"'<>()\\]+"#).unwrap());

static TAG_SRC_RE: Lazy<Regex> = Lazy::new(|| {
    let tags = MEDIA_TAGS.join("|");
    Regex::new(&format!(r#"(?is)<({tags})\b[^>]*?\ssrc\s*=\s*["']([^"']+)["']"#)).unwrap()
});

static MEDIA_TAG_SEL: Lazy<Selector> = Lazy::new(|| {
    let sel = MEDIA_TAGS
        .iter()
        .map(|t| format!("{t}[src]"))
        .collect::<Vec<_>>()
        .join(", ");
    Selector::parse(&sel).unwrap()
});

static DATA_ATTR_SELS: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| {
    DATA_ATTRS
        .iter()
        .map(|attr| (*attr, Selector::parse(&format!("[{attr}]")).unwrap()))
        .collect()
});

static DATA_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    let attrs = DATA_ATTRS.join("|");
    Regex::new(&format!(r#"(?is)\s({attrs})\s*=\s*["']([^"']+)["']"#)).unwrap()
});

static UNICODE_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\u([0-9a-fA-F]{4})").unwrap());

// ── Normalization ────────────────────────────────────────────────────────────

/// Undo the escaping layers the site wraps around URLs.
///
/// Returns `None` unless the result is an absolute http(s) URL.
/// Protocol-relative URLs are upgraded to https.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = cut_at_encoded_quote(raw);
    let unescaped = raw.trim().replace("\\/", "/");
    let decoded = UNICODE_ESCAPE_RE.replace_all(&unescaped, |caps: &regex::Captures| {
        u32::from_str_radix(&caps[1], 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    let decoded = decoded.replace("&amp;", "&");
    let trimmed = decoded.trim_end_matches('\\').trim();

    let absolute = if trimmed.starts_with("//") {
        format!("https:{trimmed}")
    } else {
        trimmed.to_string()
    };

    let lower = absolute.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Some(absolute)
    } else {
        None
    }
}

fn cut_at_encoded_quote(raw: &str) -> &str {
    let lower = raw.to_ascii_lowercase();
    let end = ENCODED_QUOTES
        .iter()
        .filter_map(|q| lower.find(q))
        .min()
        .unwrap_or(raw.len());
    &raw[..end]
}

// ── Candidate pool ───────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CandidatePool {
    seen: HashSet<String>,
    links: Vec<CandidateLink>,
}

impl CandidatePool {
    /// Normalize and add `raw`; the first pass to find a URL owns it.
    pub fn push(&mut self, raw: &str, source: SourcePass, context: &str) -> bool {
        let Some(url) = normalize_url(raw) else {
            return false;
        };
        if !self.seen.insert(url.clone()) {
            return false;
        }
        self.links.push(CandidateLink {
            url,
            source,
            context: context.to_string(),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn into_links(self) -> Vec<CandidateLink> {
        self.links
    }
}

// ── Tag scanners ─────────────────────────────────────────────────────────────

/// Structured scan of media tags and data attributes.
///
/// Kept apart from the CDN regex sweeps so the HTML strategy can change
/// without touching them.
pub trait TagScanner: Send + Sync {
    fn scan_tags(&self, html: &str, pool: &mut CandidatePool);
    fn scan_data_attrs(&self, html: &str, pool: &mut CandidatePool);

    /// Both scans, tags first.
    fn scan(&self, html: &str, pool: &mut CandidatePool) {
        self.scan_tags(html, pool);
        self.scan_data_attrs(html, pool);
    }
}

pub fn scanner_for(kind: ScannerKind) -> Box<dyn TagScanner> {
    match kind {
        ScannerKind::Dom => Box::new(DomTagScanner),
        ScannerKind::Regex => Box::new(RegexTagScanner),
    }
}

fn tag_pass(tag: &str) -> SourcePass {
    if tag.eq_ignore_ascii_case("img") {
        SourcePass::ImgTag
    } else {
        SourcePass::VideoTag
    }
}

/// Parses the document with `scraper`.
pub struct DomTagScanner;

impl DomTagScanner {
    fn tags_in(document: &Html, pool: &mut CandidatePool) {
        for el in document.select(&MEDIA_TAG_SEL) {
            let tag = el.value().name();
            if let Some(src) = el.value().attr("src") {
                pool.push(src, tag_pass(tag), &format!("{tag}@src"));
            }
        }
    }

    fn data_attrs_in(document: &Html, pool: &mut CandidatePool) {
        for (attr, sel) in DATA_ATTR_SELS.iter() {
            for el in document.select(sel) {
                if let Some(value) = el.value().attr(attr) {
                    pool.push(value, SourcePass::DataAttr, attr);
                }
            }
        }
    }
}

impl TagScanner for DomTagScanner {
    fn scan_tags(&self, html: &str, pool: &mut CandidatePool) {
        Self::tags_in(&Html::parse_document(html), pool);
    }

    fn scan_data_attrs(&self, html: &str, pool: &mut CandidatePool) {
        Self::data_attrs_in(&Html::parse_document(html), pool);
    }

    fn scan(&self, html: &str, pool: &mut CandidatePool) {
        let document = Html::parse_document(html);
        Self::tags_in(&document, pool);
        Self::data_attrs_in(&document, pool);
    }
}

/// Regex-only variant; tolerant of markup a parser would reshape.
pub struct RegexTagScanner;

impl TagScanner for RegexTagScanner {
    fn scan_tags(&self, html: &str, pool: &mut CandidatePool) {
        for caps in TAG_SRC_RE.captures_iter(html) {
            let tag = caps[1].to_ascii_lowercase();
            pool.push(&caps[2], tag_pass(&tag), &format!("{tag}@src"));
        }
    }

    fn scan_data_attrs(&self, html: &str, pool: &mut CandidatePool) {
        for caps in DATA_ATTR_RE.captures_iter(html) {
            let attr = caps[1].to_ascii_lowercase();
            pool.push(&caps[2], SourcePass::DataAttr, &attr);
        }
    }
}

// ── Passes ───────────────────────────────────────────────────────────────────

/// Known keys inside inline scripts, plus escaped CDN URLs anywhere in them.
pub fn scan_scripts(html: &str, rules: &FilterRules, pool: &mut CandidatePool) {
    for script in SCRIPT_RE.captures_iter(html) {
        let body = &script[1];

        for caps in KEY_VALUE_RE.captures_iter(body) {
            pool.push(&caps[2], SourcePass::ScriptJson, &caps[1]);
        }

        // CDN URLs often carry no extension, so only the host is checked.
        for m in ESCAPED_URL_RE.find_iter(body) {
            if rules.mentions_cdn(m.as_str()) {
                pool.push(m.as_str(), SourcePass::ScriptJson, "cdn-sweep");
            }
        }
    }
}

/// Any absolute URL in the page that points at the CDN or a media file.
pub fn sweep_generic(html: &str, rules: &FilterRules, pool: &mut CandidatePool) {
    for m in GENERIC_URL_RE.find_iter(html) {
        let Some(url) = normalize_url(m.as_str()) else {
            continue;
        };
        if rules.mentions_cdn(&url) || has_media_extension(&url) {
            pool.push(&url, SourcePass::GenericSweep, "text");
        }
    }
}

/// Run every pass over `html` and return the candidates in discovery order.
pub fn mine(html: &str, rules: &FilterRules, scanner: &dyn TagScanner) -> Vec<CandidateLink> {
    let mut pool = CandidatePool::default();

    scan_scripts(html, rules, &mut pool);
    let after_scripts = pool.len();
    scanner.scan(html, &mut pool);
    let after_tags = pool.len();
    sweep_generic(html, rules, &mut pool);

    tracing::debug!(
        scripts = after_scripts,
        tags = after_tags - after_scripts,
        generic = pool.len() - after_tags,
        "mined candidates"
    );

    pool.into_links()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(links: &[CandidateLink]) -> Vec<&str> {
        links.iter().map(|l| l.url.as_str()).collect()
    }

    #[test]
    fn normalize_undoes_escapes() {
        assert_eq!(
            normalize_url(r"https:\/\/sns-webpic.xhscdn.com\/a\/b?x=1&amp;y=2\\").as_deref(),
            Some("https://sns-webpic.xhscdn.com/a/b?x=1&y=2")
        );
        assert_eq!(
            normalize_url(r"https://sns-img.xhscdn.com/abc").as_deref(),
            Some("https://sns-img.xhscdn.com/abc")
        );
        assert_eq!(
            normalize_url("//ci.xhscdn.com/x.jpg").as_deref(),
            Some("https://ci.xhscdn.com/x.jpg")
        );
        assert_eq!(normalize_url("/relative/path.jpg"), None);
        assert_eq!(normalize_url("javascript:void(0)"), None);
    }

    #[test]
    fn script_pass_reads_known_keys_and_escaped_cdn_urls() {
        let html = r#"<script>window.__INITIAL_STATE__={"note":{"imageList":[
            {"urlDefault":"https://sns-webpic-qc.xhscdn.com/202401/abc!nd_dft_wlteh_webp_3",
             "urlPre":"https://sns-webpic-qc.xhscdn.com/202401/abc!nd_prv_wlteh_webp_3"}],
            "title":"hello","other":"https:\/\/sns-video-bd.xhscdn.com\/stream\/110\/258\/01e5a.mp4"}}</script>"#;
        let rules = FilterRules::default();
        let mut pool = CandidatePool::default();
        scan_scripts(html, &rules, &mut pool);
        let links = pool.into_links();
        let found = urls(&links);

        assert!(found.contains(&"https://sns-webpic-qc.xhscdn.com/202401/abc!nd_dft_wlteh_webp_3"));
        assert!(found.contains(&"https://sns-webpic-qc.xhscdn.com/202401/abc!nd_prv_wlteh_webp_3"));
        assert!(found.contains(&"https://sns-video-bd.xhscdn.com/stream/110/258/01e5a.mp4"));
        assert!(links.iter().all(|l| l.source == SourcePass::ScriptJson));
    }

    #[test]
    fn script_values_that_are_not_urls_are_ignored() {
        let html = r#"<script>{"image":"cover-photo","src":"/local.png"}</script>"#;
        let mut pool = CandidatePool::default();
        scan_scripts(html, &FilterRules::default(), &mut pool);
        assert!(pool.is_empty());
    }

    fn tag_html() -> &'static str {
        r#"<html><body>
            <img src="https://ci.xhscdn.com/a.jpg?x=1&amp;y=2">
            <video src="https://example.com/v.mp4"><source src="https://example.com/v.webm"></video>
            <div data-src="https://example.com/lazy.png" data-clipboard-text="https://example.com/clip.jpg"></div>
        </body></html>"#
    }

    #[test]
    fn dom_and_regex_scanners_agree() {
        for scanner in [scanner_for(ScannerKind::Dom), scanner_for(ScannerKind::Regex)] {
            let mut pool = CandidatePool::default();
            scanner.scan_tags(tag_html(), &mut pool);
            scanner.scan_data_attrs(tag_html(), &mut pool);
            let links = pool.into_links();
            let found: HashSet<&str> = urls(&links).into_iter().collect();
            let expected: HashSet<&str> = [
                "https://ci.xhscdn.com/a.jpg?x=1&y=2",
                "https://example.com/v.mp4",
                "https://example.com/v.webm",
                "https://example.com/lazy.png",
                "https://example.com/clip.jpg",
            ]
            .into_iter()
            .collect();
            assert_eq!(found, expected);

            let video = links.iter().find(|l| l.url.ends_with("v.mp4")).unwrap();
            assert_eq!(video.source, SourcePass::VideoTag);
        }
    }

    #[test]
    fn generic_sweep_keeps_cdn_and_media_urls_only() {
        let html = r#"text https://sns-img.xhscdn.com/noext and https://example.com/page
            and https://example.com/photo.webp"#;
        let mut pool = CandidatePool::default();
        sweep_generic(html, &FilterRules::default(), &mut pool);
        let links = pool.into_links();
        assert_eq!(
            urls(&links),
            vec!["https://sns-img.xhscdn.com/noext", "https://example.com/photo.webp"]
        );
    }

    #[test]
    fn pool_drops_duplicates_across_passes() {
        let html = r#"<script>{"url":"https://ci.xhscdn.com/a.jpg"}</script>
            <img src="https://ci.xhscdn.com/a.jpg">"#;
        let links = mine(html, &FilterRules::default(), &DomTagScanner);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].source, SourcePass::ScriptJson);
        assert_eq!(links[0].context, "url");
    }

    #[test]
    fn mining_is_idempotent() {
        let html = tag_html();
        let rules = FilterRules::default();
        let first: HashSet<CandidateLink> = mine(html, &rules, &DomTagScanner).into_iter().collect();
        let second: HashSet<CandidateLink> = mine(html, &rules, &DomTagScanner).into_iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn encoded_quotes_end_a_url() {
        assert_eq!(
            normalize_url("https://sns-webpic.xhscdn.com/1040g2sg30abcdefg.jpg&quot;}").as_deref(),
            Some("https://sns-webpic.xhscdn.com/1040g2sg30abcdefg.jpg")
        );
        assert_eq!(
            normalize_url("https://ci.xhscdn.com/a.jpg&#39;").as_deref(),
            Some("https://ci.xhscdn.com/a.jpg")
        );
    }

    #[test]
    fn attribute_json_does_not_duplicate_a_url() {
        let html = r#"<div data-note="{&quot;u&quot;:&quot;https://sns-webpic.xhscdn.com/1040g2sg30abcdefg.jpg&quot;}"></div>
            <img src="https://sns-webpic.xhscdn.com/1040g2sg30abcdefg.jpg">"#;
        for scanner in [scanner_for(ScannerKind::Dom), scanner_for(ScannerKind::Regex)] {
            let links = mine(html, &FilterRules::default(), scanner.as_ref());
            assert_eq!(
                urls(&links),
                vec!["https://sns-webpic.xhscdn.com/1040g2sg30abcdefg.jpg"]
            );
        }
    }
}
