use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub mod classify;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod handlers;
pub mod mine;
pub mod models;
pub mod pipeline;
pub mod proxy;
pub mod publish;
pub mod resolve;
pub mod verify;

use config::Config;
use error::ExtractionError;
use mine::TagScanner;

/// Request-independent state; nothing in here changes after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: reqwest::Client,
    pub proxy_client: reqwest::Client,
    pub scanner: Arc<dyn TagScanner>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ExtractionError> {
        let client = fetch::build_client(&config)?;
        let proxy_client = fetch::build_proxy_client(&config)?;
        let scanner: Arc<dyn TagScanner> = Arc::from(mine::scanner_for(config.scanner));
        Ok(Self {
            config: Arc::new(config),
            client,
            proxy_client,
            scanner,
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/extract", post(handlers::extract_endpoint))
        .route("/extract-batch", post(handlers::batch_endpoint))
        .route("/proxy-image", get(handlers::proxy_endpoint))
        .route("/publish", post(handlers::publish_endpoint))
        .route("/accounts", get(handlers::accounts_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
