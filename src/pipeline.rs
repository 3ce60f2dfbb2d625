use futures_util::future::join_all;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};

use crate::classify::{classify_all, split_media};
use crate::config::FilterRules;
use crate::dedup::{dedupe_exact, dedupe_images};
use crate::error::ExtractionError;
use crate::fetch::fetch_html;
use crate::mine::{mine, TagScanner};
use crate::models::{BatchPost, BatchResult, ExtractRequest, ExtractionResult};
use crate::resolve::{extract_urls, resolve_input, resolve_url};
use crate::verify::{verify_links, VIDEO};
use crate::AppState;

const TITLE_SUFFIXES: &[&str] = &[" - 小红书", " - Xiaohongshu", " - RedNote"];

static OG_TITLE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());

static TITLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

// ── Page-level extraction ────────────────────────────────────────────────────

/// Media found on one page after mining, filtering and dedup.
#[derive(Debug, Default)]
pub struct PageMedia {
    pub images: Vec<String>,
    pub videos: Vec<String>,
    /// Every candidate URL that was classified.
    pub scanned: Vec<String>,
}

impl PageMedia {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.videos.is_empty()
    }
}

/// Pure part of the pipeline: HTML in, deduplicated media links out.
pub fn extract_media(html: &str, rules: &FilterRules, scanner: &dyn TagScanner) -> PageMedia {
    let candidates = mine(html, rules, scanner);
    let classified = classify_all(&candidates, rules);
    let (images, videos) = split_media(&classified);

    PageMedia {
        images: dedupe_images(&images, rules),
        videos: dedupe_exact(videos),
        scanned: candidates.into_iter().map(|c| c.url).collect(),
    }
}

pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let raw = document
        .select(&OG_TITLE_SEL)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            document
                .select(&TITLE_SEL)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())
        })?;

    let trimmed = TITLE_SUFFIXES
        .iter()
        .find_map(|suffix| raw.strip_suffix(suffix))
        .unwrap_or(raw.as_str())
        .trim()
        .to_string();
    Some(trimmed).filter(|s| !s.is_empty())
}

// ── Single extraction ────────────────────────────────────────────────────────

/// Resolve, fetch and mine one pasted link.
///
/// Only a missing URL or an unreachable page is an error; an empty page is
/// a successful result carrying an informational message.
pub async fn extract_single(
    state: &AppState,
    req: &ExtractRequest,
) -> Result<ExtractionResult, ExtractionError> {
    let target = resolve_input(&state.client, &state.config, &req.url).await?;
    let html = fetch_html(&state.client, &target.canonical_url).await?;
    let media = extract_media(&html, &state.config.rules, state.scanner.as_ref());

    tracing::info!(
        url = %target.canonical_url,
        scanned = media.scanned.len(),
        images = media.images.len(),
        videos = media.videos.len(),
        "extraction finished"
    );

    let error = media
        .is_empty()
        .then(|| format!("No media matched. Scanned {} URLs.", media.scanned.len()));

    let verification = if req.verify && !media.videos.is_empty() {
        Some(verify_links(&state.client, &media.videos, state.config.verify_sample, VIDEO).await)
    } else {
        None
    };

    Ok(ExtractionResult {
        success: true,
        image_links: media.images,
        video_links: media.videos,
        error,
        resolved_url: Some(target.canonical_url),
        resolution_error: target.resolution_error,
        debug_urls: req.debug.then_some(media.scanned),
        verification,
    })
}

// ── Batch extraction ─────────────────────────────────────────────────────────

/// Every URL across `inputs`, first occurrence kept.
pub fn collect_batch_urls(inputs: &[String]) -> Vec<String> {
    dedupe_exact(inputs.iter().flat_map(|text| extract_urls(text)).collect())
}

/// Process all links concurrently; each post carries its own error.
pub async fn extract_batch(
    state: &AppState,
    inputs: &[String],
) -> Result<BatchResult, ExtractionError> {
    let urls = collect_batch_urls(inputs);
    if urls.is_empty() {
        return Err(ExtractionError::NoUrlFound);
    }

    let posts = join_all(urls.iter().map(|url| extract_post(state, url))).await;

    let failed = posts.iter().filter(|p| p.error.is_some()).count();
    tracing::info!(total = posts.len(), failed, "batch extraction finished");

    let all_failed = failed == posts.len();
    Ok(BatchResult {
        success: !all_failed,
        error: all_failed.then(|| format!("All {} URLs failed", posts.len())),
        posts,
    })
}

async fn extract_post(state: &AppState, url: &str) -> BatchPost {
    let target = resolve_url(&state.client, &state.config, url).await;

    let mut post = BatchPost {
        url: url.to_string(),
        resolved_url: target.canonical_url.clone(),
        images: Vec::new(),
        videos: Vec::new(),
        title: None,
        error: None,
    };

    match fetch_html(&state.client, &target.canonical_url).await {
        Ok(html) => {
            let media = extract_media(&html, &state.config.rules, state.scanner.as_ref());
            post.title = extract_title(&html);
            post.images = media.images;
            post.videos = media.videos;
        }
        Err(e) => {
            tracing::warn!(%url, error = %e, "batch item failed");
            post.error = Some(e.to_string());
        }
    }

    post
}
