use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::config::FilterRules;
use crate::models::{CandidateLink, ClassifiedLink, MediaKind, RejectReason};

// ── Constants ────────────────────────────────────────────────────────────────

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif", "heic", "heif", "bmp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "m4v", "mkv", "avi", "flv"];
pub const MANIFEST_EXTENSIONS: &[&str] = &["m3u8", "mpd"];

const ASSET_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "json", "html", "htm", "svg", "ico", "woff", "woff2", "ttf", "otf", "map",
    "txt", "xml",
];

const DEFAULT_MARKER: &str = "nd_dft";
const PREVIEW_MARKER: &str = "nd_prv";

// ── Lazy static regexes ──────────────────────────────────────────────────────

static RESIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)image(?:view2|mogr2)").unwrap());

static WIDTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:/w/|/thumbnail/!?|[?&](?:w|width)=|_w)(\d{2,5})").unwrap()
});

static LONG_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{12,}").unwrap());

// ── URL helpers ──────────────────────────────────────────────────────────────

/// Lower-cased extension of the final path segment, ignoring any `!style` suffix.
fn path_extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next()?;
    let segment = segment.split('!').next().unwrap_or(segment);
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn ext_in(ext: Option<&str>, list: &[&str]) -> bool {
    ext.map(|e| list.contains(&e)).unwrap_or(false)
}

pub fn has_media_extension(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let ext = path_extension(parsed.path());
    let ext = ext.as_deref();
    ext_in(ext, IMAGE_EXTENSIONS) || ext_in(ext, VIDEO_EXTENSIONS) || ext_in(ext, MANIFEST_EXTENSIONS)
}

/// Width requested by a resize parameter or `_w<N>` marker, if any.
pub fn image_width(url: &str) -> Option<u32> {
    WIDTH_RE
        .captures(url)
        .and_then(|caps| caps[1].parse::<u32>().ok())
}

pub fn has_resize_params(url: &str) -> bool {
    RESIZE_RE.is_match(url)
}

pub fn is_default_variant(url: &str) -> bool {
    url.to_ascii_lowercase().contains(DEFAULT_MARKER)
}

pub fn is_preview_variant(url: &str) -> bool {
    url.to_ascii_lowercase().contains(PREVIEW_MARKER)
}

// ── Classification ───────────────────────────────────────────────────────────

/// Media links carry the parsed serialization, so output URLs are always well-formed.
pub fn classify(candidate: &CandidateLink, rules: &FilterRules) -> ClassifiedLink {
    let kind = classify_url(&candidate.url, rules);
    let mut candidate = candidate.clone();
    if !matches!(kind, MediaKind::Rejected(_)) {
        if let Ok(parsed) = Url::parse(&candidate.url) {
            candidate.url = parsed.into();
        }
    }
    ClassifiedLink { candidate, kind }
}

pub fn classify_all(candidates: &[CandidateLink], rules: &FilterRules) -> Vec<ClassifiedLink> {
    candidates.iter().map(|c| classify(c, rules)).collect()
}

pub fn classify_url(raw: &str, rules: &FilterRules) -> MediaKind {
    use MediaKind::Rejected;

    let Ok(parsed) = Url::parse(raw) else {
        return Rejected(RejectReason::Unparseable);
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return Rejected(RejectReason::Scheme);
    }
    let Some(host) = parsed.host_str().map(|h| h.to_ascii_lowercase()) else {
        return Rejected(RejectReason::Unparseable);
    };

    // The raw form keeps native-script keywords that parsing would percent-encode.
    let lower = raw.to_lowercase();
    let path = parsed.path().to_ascii_lowercase();

    if is_excluded(&lower, &host, &path, rules) {
        return Rejected(RejectReason::Excluded);
    }

    let ext = path_extension(&path);
    let ext = ext.as_deref();
    if ext_in(ext, ASSET_EXTENSIONS) {
        return Rejected(RejectReason::AssetExtension);
    }

    let is_cdn = rules.is_cdn_host(&host);

    if ext_in(ext, VIDEO_EXTENSIONS)
        || ext_in(ext, MANIFEST_EXTENSIONS)
        || (rules.mentions_cdn(&lower) && lower.contains(".mp4"))
    {
        return MediaKind::Video;
    }

    let image_ext = ext_in(ext, IMAGE_EXTENSIONS);
    if !image_ext && !is_cdn {
        return Rejected(RejectReason::NotMedia);
    }

    let segment = path.rsplit('/').next().unwrap_or("");
    if !image_ext && segment.len() < rules.min_segment_len && !LONG_ID_RE.is_match(segment) {
        return Rejected(RejectReason::ShortSegment);
    }

    if has_resize_params(raw) && !is_default_variant(raw) {
        if let Some(width) = image_width(raw) {
            if width < rules.min_width {
                return Rejected(RejectReason::LowResolution);
            }
        }
    }

    MediaKind::Image
}

fn is_excluded(lower_url: &str, host: &str, path: &str, rules: &FilterRules) -> bool {
    rules
        .exclude_keywords
        .iter()
        .any(|k| lower_url.contains(k.as_str()))
        || rules.exclude_paths.iter().any(|p| path.contains(p.as_str()))
        || rules.exclude_hosts.iter().any(|h| host.contains(h.as_str()))
}

/// Image and video URLs that survived classification, in discovery order.
pub fn split_media(classified: &[ClassifiedLink]) -> (Vec<String>, Vec<String>) {
    let mut images = Vec::new();
    let mut videos = Vec::new();
    for link in classified {
        match link.kind {
            MediaKind::Image => images.push(link.candidate.url.clone()),
            MediaKind::Video => videos.push(link.candidate.url.clone()),
            MediaKind::Rejected(_) => {}
        }
    }
    (images, videos)
}
