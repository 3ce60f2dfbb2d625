//! Best-effort reachability probes for video links.

use futures_util::future::join_all;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, RANGE, REFERER};
use reqwest::StatusCode;

use crate::config::SITE_ORIGIN;
use crate::models::ProbeReport;

const PROBE_RANGE: &str = "bytes=0-1023";

/// What a probed URL is expected to serve.
#[derive(Debug, Clone, Copy)]
pub struct Expectation {
    pub content_type_prefix: &'static str,
    pub extension: &'static str,
}

pub const VIDEO: Expectation = Expectation {
    content_type_prefix: "video/",
    extension: ".mp4",
};

/// Probe up to `limit` URLs concurrently; one failure never cancels the others.
pub async fn verify_links(
    client: &reqwest::Client,
    urls: &[String],
    limit: usize,
    expect: Expectation,
) -> Vec<ProbeReport> {
    let probes = urls.iter().take(limit).map(|url| probe(client, url, expect));
    let reports = join_all(probes).await;

    let ok = reports.iter().filter(|r| r.accessible).count();
    tracing::info!(checked = reports.len(), accessible = ok, "verified media links");
    reports
}

pub async fn probe(client: &reqwest::Client, url: &str, expect: Expectation) -> ProbeReport {
    let head = client
        .head(url)
        .header(RANGE, PROBE_RANGE)
        .header(REFERER, SITE_ORIGIN)
        .send()
        .await;

    let response = match head {
        Ok(resp) if resp.status().is_success() && has_body(&resp) => Ok(resp),
        _ => {
            client
                .get(url)
                .header(RANGE, PROBE_RANGE)
                .header(REFERER, SITE_ORIGIN)
                .send()
                .await
        }
    };

    match response {
        Ok(resp) => {
            let status = resp.status();
            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_lowercase());
            let final_url = resp.url().to_string();

            let status_ok = status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT;
            let type_ok = content_type
                .as_deref()
                .map(|ct| ct.starts_with(expect.content_type_prefix))
                .unwrap_or(false);
            let ext_ok = resp.url().path().to_lowercase().ends_with(expect.extension);

            ProbeReport {
                url: url.to_string(),
                accessible: status_ok && (type_ok || ext_ok),
                status: Some(status.as_u16()),
                content_type,
                final_url: Some(final_url),
                error: None,
            }
        }
        Err(e) => {
            tracing::debug!(%url, error = %e, "probe failed");
            ProbeReport {
                url: url.to_string(),
                accessible: false,
                status: None,
                content_type: None,
                final_url: None,
                error: Some(format!("VerificationInconclusive: {e}")),
            }
        }
    }
}

/// HEAD replies advertise a body through a non-zero content length.
fn has_body(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|len| len > 0)
        .unwrap_or(false)
}
