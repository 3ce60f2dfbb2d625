use serde::{Deserialize, Serialize};

// ── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    /// Free text that should contain a share link.
    pub url: String,
    /// Probe a sample of video links before answering.
    #[serde(default)]
    pub verify: bool,
    /// Include every scanned candidate URL in the response.
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub caption: String,
    pub account_ids: Vec<i64>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub media_ids: Vec<String>,
    #[serde(default)]
    pub scheduled_at: Option<String>,
}

// ── Pipeline data model ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub original_url: String,
    /// Falls back to `original_url` when resolution fails.
    pub canonical_url: String,
    pub resolution_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourcePass {
    ScriptJson,
    ImgTag,
    VideoTag,
    DataAttr,
    GenericSweep,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateLink {
    pub url: String,
    pub source: SourcePass,
    /// Key, tag or attribute the URL was found under.
    pub context: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    Unparseable,
    Scheme,
    Excluded,
    AssetExtension,
    ShortSegment,
    LowResolution,
    NotMedia,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassifiedLink {
    pub candidate: CandidateLink,
    pub kind: MediaKind,
}

#[derive(Debug, Clone)]
pub struct MediaGroup {
    pub base_key: String,
    pub variants: Vec<String>,
}

// ── Responses ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub url: String,
    pub accessible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub success: bool,
    pub image_links: Vec<String>,
    pub video_links: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<Vec<ProbeReport>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPost {
    pub url: String,
    pub resolved_url: String,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub success: bool,
    pub posts: Vec<BatchPost>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
