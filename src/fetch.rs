use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use reqwest::redirect::Policy;
use url::Url;

use crate::config::{host_matches, Config};
use crate::error::ExtractionError;

// ── Constants ────────────────────────────────────────────────────────────────

pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

const ACCEPT_LANG: &str = "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7";

// ── Client ───────────────────────────────────────────────────────────────────

const MAX_REDIRECTS: usize = 10;

fn client_builder(config: &Config) -> reqwest::ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANG));

    let mut builder = reqwest::ClientBuilder::new()
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .user_agent(USER_AGENT)
        .default_headers(headers);

    if config.insecure_ssl {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder
}

/// Shared client used by every outbound call; carries the configured timeouts.
pub fn build_client(config: &Config) -> Result<reqwest::Client, ExtractionError> {
    client_builder(config)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .build()
        .map_err(|e| ExtractionError::Request(e.to_string()))
}

/// Client for the image proxy: redirects are only followed onto allowed hosts.
pub fn build_proxy_client(config: &Config) -> Result<reqwest::Client, ExtractionError> {
    let allow = config.proxy_allow.clone();
    let policy = Policy::custom(move |attempt| {
        let allowed = attempt
            .url()
            .host_str()
            .map(|h| allow.is_empty() || host_matches(h, &allow))
            .unwrap_or(false);
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if allowed {
            attempt.follow()
        } else {
            tracing::warn!(location = %attempt.url(), "proxy redirect to a host outside the allow-list");
            attempt.stop()
        }
    });

    client_builder(config)
        .redirect(policy)
        .build()
        .map_err(|e| ExtractionError::Request(e.to_string()))
}

/// `scheme://host[:port]/` of `url`, used as a same-site referer.
pub fn origin_referer(url: &Url) -> String {
    format!("{}/", url.origin().ascii_serialization())
}

// ── Page fetch ───────────────────────────────────────────────────────────────

/// GET `url` with browser-like headers and return the body text.
pub async fn fetch_html(client: &reqwest::Client, url: &str) -> Result<String, ExtractionError> {
    let parsed =
        Url::parse(url).map_err(|_| ExtractionError::InvalidUrl(format!("Invalid URL: {url}")))?;

    let response = client
        .get(parsed.as_str())
        .header(ACCEPT, ACCEPT_HTML)
        .header(REFERER, origin_referer(&parsed))
        .send()
        .await
        .map_err(ExtractionError::from_reqwest)?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(%url, status = status.as_u16(), "page fetch returned non-success");
        return Err(ExtractionError::Upstream(status.as_u16()));
    }

    response.text().await.map_err(ExtractionError::from_reqwest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referer_is_origin_with_trailing_slash() {
        let url = Url::parse("https://www.xiaohongshu.com/explore/abc?x=1").unwrap();
        assert_eq!(origin_referer(&url), "https://www.xiaohongshu.com/");

        let url = Url::parse("http://127.0.0.1:8080/post/1").unwrap();
        assert_eq!(origin_referer(&url), "http://127.0.0.1:8080/");
    }
}
