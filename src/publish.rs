//! Thin forwarding client for the Post-Bridge scheduling API.
//!
//! Extracted links are handed over untouched; upstream failures come back
//! with their own status and text.

use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};

use crate::config::{Config, PostBridgeConfig};
use crate::error::ExtractionError;
use crate::models::PublishRequest;

/// Status and JSON body exactly as the upstream returned them.
#[derive(Debug)]
pub struct Forwarded {
    pub status: u16,
    pub body: Value,
}

fn bridge_config(config: &Config) -> Result<&PostBridgeConfig, ExtractionError> {
    config
        .post_bridge
        .as_ref()
        .ok_or(ExtractionError::NotConfigured("Post-Bridge publishing"))
}

pub fn validate(req: &PublishRequest) -> Result<(), ExtractionError> {
    if req.account_ids.is_empty() {
        return Err(ExtractionError::InvalidRequest(
            "At least one account is required".to_string(),
        ));
    }
    if req.caption.trim().is_empty() && req.media_urls.is_empty() && req.media_ids.is_empty() {
        return Err(ExtractionError::InvalidRequest(
            "A caption or media is required".to_string(),
        ));
    }
    Ok(())
}

pub fn post_body(req: &PublishRequest) -> Value {
    let mut body = json!({
        "caption": req.caption,
        "social_accounts": req.account_ids,
    });
    if !req.media_urls.is_empty() {
        body["media_urls"] = json!(req.media_urls);
    }
    if !req.media_ids.is_empty() {
        body["media"] = json!(req.media_ids);
    }
    if let Some(at) = &req.scheduled_at {
        body["scheduled_at"] = json!(at);
    }
    body
}

pub async fn create_post(
    client: &reqwest::Client,
    config: &Config,
    req: &PublishRequest,
) -> Result<Forwarded, ExtractionError> {
    validate(req)?;
    let bridge = bridge_config(config)?;
    let builder = client
        .post(format!("{}/v1/posts", bridge.base_url))
        .json(&post_body(req));
    send(with_auth(builder, bridge)).await
}

pub async fn list_accounts(
    client: &reqwest::Client,
    config: &Config,
) -> Result<Forwarded, ExtractionError> {
    let bridge = bridge_config(config)?;
    let builder = client.get(format!("{}/v1/social-accounts", bridge.base_url));
    send(with_auth(builder, bridge)).await
}

fn with_auth(mut builder: reqwest::RequestBuilder, bridge: &PostBridgeConfig) -> reqwest::RequestBuilder {
    builder = builder.header(AUTHORIZATION, format!("Bearer {}", bridge.api_key));
    for (name, value) in &bridge.extra_headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

async fn send(builder: reqwest::RequestBuilder) -> Result<Forwarded, ExtractionError> {
    let response = builder.send().await.map_err(ExtractionError::from_reqwest)?;
    let status = response.status().as_u16();
    let text = response.text().await.map_err(ExtractionError::from_reqwest)?;

    let body = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({ "error": text }));
    if !(200..300).contains(&status) {
        tracing::warn!(status, "Post-Bridge returned an error");
    }
    Ok(Forwarded { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PublishRequest {
        PublishRequest {
            caption: "hello".to_string(),
            account_ids: vec![7],
            media_urls: vec!["https://sns.xhscdn.com/foo!nd_dft_w720".to_string()],
            media_ids: Vec::new(),
            scheduled_at: Some("2026-10-17T09:00:00Z".to_string()),
        }
    }

    #[test]
    fn body_carries_links_untouched() {
        let body = post_body(&request());
        assert_eq!(body["caption"], "hello");
        assert_eq!(body["social_accounts"], json!([7]));
        assert_eq!(body["media_urls"][0], "https://sns.xhscdn.com/foo!nd_dft_w720");
        assert_eq!(body["scheduled_at"], "2026-10-17T09:00:00Z");
        assert!(body.get("media").is_none());
    }

    #[test]
    fn validation_requires_accounts_and_content() {
        let mut req = request();
        req.account_ids.clear();
        assert!(validate(&req).is_err());

        let mut req = request();
        req.caption = " ".to_string();
        req.media_urls.clear();
        assert!(validate(&req).is_err());
    }

    #[test]
    fn unconfigured_bridge_is_reported() {
        let err = bridge_config(&Config::default()).unwrap_err();
        assert!(matches!(err, ExtractionError::NotConfigured(_)));
    }
}
