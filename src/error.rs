#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// The input text contained no absolute http(s) URL.
    #[error("NoUrlFound")]
    NoUrlFound,
    #[error("{0}")]
    InvalidUrl(String),
    #[error("{0}")]
    InvalidRequest(String),
    /// Upstream answered with a non-2xx status.
    #[error("Upstream returned HTTP {0}")]
    Upstream(u16),
    /// DNS, TLS, timeout or body read failure.
    #[error("{0}")]
    Request(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl ExtractionError {
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExtractionError::Request(format!("TimeoutError: {}", e))
        } else if e.is_connect() {
            ExtractionError::Request(format!("ConnectError: {}", e))
        } else {
            ExtractionError::Request(format!("RequestError: {}", e))
        }
    }
}
