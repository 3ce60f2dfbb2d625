use axum::body::Body;
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reqwest::header::{ACCEPT, REFERER};
use url::Url;

use crate::config::{Config, SITE_ORIGIN};
use crate::error::ExtractionError;

const CACHE_DIRECTIVE: &str = "public, max-age=86400";

pub fn validate_proxy_url(config: &Config, raw: &str) -> Result<Url, ExtractionError> {
    let parsed =
        Url::parse(raw).map_err(|_| ExtractionError::InvalidUrl("Invalid URL".to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ExtractionError::InvalidUrl(
            "Only http(s) URLs are allowed".to_string(),
        ));
    }
    let host = parsed.host_str().unwrap_or("");
    if !config.proxy_allows(host) {
        return Err(ExtractionError::InvalidUrl(format!(
            "Host '{}' is not allowed",
            host
        )));
    }
    Ok(parsed)
}

/// Fetch an image the browser cannot load cross-site and stream it back.
pub async fn proxy_image(
    client: &reqwest::Client,
    config: &Config,
    raw: &str,
) -> Result<Response, ExtractionError> {
    let url = validate_proxy_url(config, raw)?;

    let upstream = client
        .get(url.as_str())
        .header(ACCEPT, "image/avif,image/webp,image/*,*/*;q=0.8")
        .header(REFERER, SITE_ORIGIN)
        .send()
        .await
        .map_err(ExtractionError::from_reqwest)?;

    let status = upstream.status();
    if !status.is_success() {
        tracing::warn!(%url, status = status.as_u16(), "image proxy upstream error");
        return Err(ExtractionError::Upstream(status.as_u16()));
    }

    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, content_type),
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*".to_string()),
            (CACHE_CONTROL, CACHE_DIRECTIVE.to_string()),
        ],
        Body::from_stream(upstream.bytes_stream()),
    )
        .into_response())
}
