use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::RANGE;
use url::Url;

use crate::config::Config;
use crate::error::ExtractionError;
use crate::models::ResolvedTarget;

/// Only the first few KB are needed to observe where a short link lands.
const PROBE_RANGE: &str = "bytes=0-8191";

// Share texts run CJK prose straight into the link, so only URL-safe ASCII is taken.
static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://[A-Za-z0-9\-._~:/?#\[\]@!$&()*+,;=%]+").unwrap()
});

const TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\''];

/// Every well-formed absolute http(s) URL in `text`, in order of appearance.
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_RE
        .find_iter(text)
        .filter_map(|m| {
            let candidate = m.as_str().trim_end_matches(TRAILING_PUNCT);
            let parsed = Url::parse(candidate).ok()?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return None;
            }
            Some(candidate.to_string())
        })
        .collect()
}

pub fn extract_first_url(text: &str) -> Option<String> {
    extract_urls(text).into_iter().next()
}

/// Find the first URL in `input` and, for short-link hosts, follow it to its landing page.
pub async fn resolve_input(
    client: &reqwest::Client,
    config: &Config,
    input: &str,
) -> Result<ResolvedTarget, ExtractionError> {
    let url = extract_first_url(input).ok_or(ExtractionError::NoUrlFound)?;
    Ok(resolve_url(client, config, &url).await)
}

/// Never fails: on error the canonical URL stays the original one.
pub async fn resolve_url(client: &reqwest::Client, config: &Config, url: &str) -> ResolvedTarget {
    let unresolved = |error: Option<String>| ResolvedTarget {
        original_url: url.to_string(),
        canonical_url: url.to_string(),
        resolution_error: error,
    };

    if !is_short_link(config, url) {
        return unresolved(None);
    }

    let head_result = client.head(url).send().await.map(|r| r.url().to_string());
    if let Ok(landed) = &head_result {
        if !is_short_link(config, landed) {
            tracing::debug!(%url, %landed, "short link resolved via HEAD");
            return resolved(url, landed);
        }
    }

    // HEAD was refused or not redirected; servers often only redirect GETs.
    let get_result = client
        .get(url)
        .header(RANGE, PROBE_RANGE)
        .send()
        .await
        .map(|r| r.url().to_string());

    match (head_result, get_result) {
        (_, Ok(landed)) => {
            if is_short_link(config, &landed) {
                tracing::debug!(%url, "short link did not leave the short-link host");
            }
            resolved(url, &landed)
        }
        (Ok(landed), Err(get_err)) => {
            tracing::debug!(%url, error = %get_err, "ranged GET failed, keeping HEAD result");
            resolved(url, &landed)
        }
        (Err(head_err), Err(get_err)) => {
            tracing::warn!(%url, %head_err, %get_err, "short link resolution failed");
            unresolved(Some(format!(
                "ResolutionFailed: HEAD: {}; GET: {}",
                head_err, get_err
            )))
        }
    }
}

fn resolved(original: &str, canonical: &str) -> ResolvedTarget {
    ResolvedTarget {
        original_url: original.to_string(),
        canonical_url: canonical.to_string(),
        resolution_error: None,
    }
}

fn is_short_link(config: &Config, url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| config.is_short_link_host(h)))
        .unwrap_or(false)
}
