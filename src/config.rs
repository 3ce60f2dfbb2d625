use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

// ── Defaults ─────────────────────────────────────────────────────────────────

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MIN_WIDTH: u32 = 720;
const DEFAULT_VERIFY_SAMPLE: usize = 4;
const DEFAULT_POST_BRIDGE_URL: &str = "https://api.post-bridge.com";

const SHORT_LINK_HOSTS: &[&str] = &["xhslink.com"];
const CDN_FRAGMENTS: &[&str] = &["xhscdn"];
const PROXY_ALLOW: &[&str] = &["xhscdn.com", "xiaohongshu.com"];

/// Site origin sent as `Referer` when talking to the CDN directly.
pub const SITE_ORIGIN: &str = "https://www.xiaohongshu.com/";

const EXCLUDE_KEYWORDS: &[&str] = &[
    "logo",
    "icon",
    "avatar",
    "watermark",
    "badge",
    "banner",
    "sprite",
    "placeholder",
    "xiaohongshu",
    "rednote",
    "小红书",
];

const EXCLUDE_PATHS: &[&str] = &["/static/", "/assets/", "/common/", "/components/", "/widgets/"];

const EXCLUDE_HOSTS: &[&str] = &["fe-static", "picasso-static"];

// ── Rule tables ──────────────────────────────────────────────────────────────

/// Tunable classification and dedup thresholds.
#[derive(Debug, Clone)]
pub struct FilterRules {
    /// Host substrings identifying the media CDN.
    pub cdn_fragments: Vec<String>,
    /// Substrings of the lower-cased URL that mark UI chrome or branding.
    pub exclude_keywords: Vec<String>,
    /// Path substrings that mark static/UI asset directories.
    pub exclude_paths: Vec<String>,
    /// Host substrings of static asset shards.
    pub exclude_hosts: Vec<String>,
    /// Smallest width (px) still considered content.
    pub min_width: u32,
    /// Final path segments shorter than this are suspicious without an extension.
    pub min_segment_len: usize,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            cdn_fragments: to_owned(CDN_FRAGMENTS),
            exclude_keywords: to_owned(EXCLUDE_KEYWORDS),
            exclude_paths: to_owned(EXCLUDE_PATHS),
            exclude_hosts: to_owned(EXCLUDE_HOSTS),
            min_width: DEFAULT_MIN_WIDTH,
            min_segment_len: 8,
        }
    }
}

impl FilterRules {
    pub fn is_cdn_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.cdn_fragments.iter().any(|f| host.contains(f.as_str()))
    }

    pub fn mentions_cdn(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        self.cdn_fragments.iter().any(|f| lower.contains(f.as_str()))
    }
}

/// Which implementation scans `<img>`/`<video>`/`<source>` and data attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerKind {
    Dom,
    Regex,
}

#[derive(Debug, Clone)]
pub struct PostBridgeConfig {
    pub base_url: String,
    pub api_key: String,
    pub extra_headers: BTreeMap<String, String>,
}

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub insecure_ssl: bool,
    pub short_link_hosts: Vec<String>,
    pub rules: FilterRules,
    pub verify_sample: usize,
    pub scanner: ScannerKind,
    /// Host suffixes the image proxy may fetch from; empty allows any.
    pub proxy_allow: Vec<String>,
    pub post_bridge: Option<PostBridgeConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            insecure_ssl: false,
            short_link_hosts: to_owned(SHORT_LINK_HOSTS),
            rules: FilterRules::default(),
            verify_sample: DEFAULT_VERIFY_SAMPLE,
            scanner: ScannerKind::Dom,
            proxy_allow: to_owned(PROXY_ALLOW),
            post_bridge: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl Config {
    /// Built-in defaults overlaid with `XHS_RELAY_*` and `POST_BRIDGE_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(bind) = var("XHS_RELAY_BIND") {
            config.bind = bind.parse().map_err(|e| invalid("XHS_RELAY_BIND", e))?;
        }
        if let Some(secs) = parse_var::<u64>("XHS_RELAY_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("XHS_RELAY_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        config.insecure_ssl = var("XHS_RELAY_INSECURE_SSL").as_deref() == Some("1");

        if let Some(hosts) = var("XHS_RELAY_SHORT_LINK_HOSTS") {
            config.short_link_hosts = split_list(&hosts);
        }
        if let Some(fragments) = var("XHS_RELAY_CDN_FRAGMENTS") {
            config.rules.cdn_fragments = split_list(&fragments);
        }
        if let Some(width) = parse_var::<u32>("XHS_RELAY_MIN_WIDTH")? {
            config.rules.min_width = width;
        }
        if let Some(extra) = var("XHS_RELAY_EXTRA_EXCLUDE") {
            config.rules.exclude_keywords.extend(split_list(&extra));
        }
        if let Some(sample) = parse_var::<usize>("XHS_RELAY_VERIFY_SAMPLE")? {
            config.verify_sample = sample;
        }
        if let Some(kind) = var("XHS_RELAY_TAG_SCANNER") {
            config.scanner = match kind.to_lowercase().as_str() {
                "dom" => ScannerKind::Dom,
                "regex" => ScannerKind::Regex,
                other => {
                    return Err(invalid("XHS_RELAY_TAG_SCANNER", format!("unknown scanner '{other}'")))
                }
            };
        }
        // Present but empty means "allow any host".
        if let Ok(allow) = std::env::var("XHS_RELAY_PROXY_ALLOW") {
            config.proxy_allow = split_list(&allow);
        }

        if let Some(api_key) = var("POST_BRIDGE_API_KEY") {
            let extra_headers = match var("POST_BRIDGE_EXTRA_HEADERS") {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| invalid("POST_BRIDGE_EXTRA_HEADERS", e))?,
                None => BTreeMap::new(),
            };
            config.post_bridge = Some(PostBridgeConfig {
                base_url: var("POST_BRIDGE_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_POST_BRIDGE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                api_key,
                extra_headers,
            });
        }

        Ok(config)
    }

    pub fn is_short_link_host(&self, host: &str) -> bool {
        host_matches(host, &self.short_link_hosts)
    }

    pub fn proxy_allows(&self, host: &str) -> bool {
        self.proxy_allow.is_empty() || host_matches(host, &self.proxy_allow)
    }
}

/// `host` equals one of `domains` or is a subdomain of one.
pub fn host_matches(host: &str, domains: &[String]) -> bool {
    let host = host.to_lowercase();
    domains.iter().any(|d| {
        let d = d.to_lowercase();
        host == d || host.ends_with(&format!(".{d}"))
    })
}

// ── Env helpers ──────────────────────────────────────────────────────────────

fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| raw.parse::<T>().map_err(|e| invalid(name, e)))
        .transpose()
}

fn invalid(name: &'static str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.to_string(),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
