use xhs_relay_api::{config::Config, create_router, AppState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    if config.post_bridge.is_none() {
        tracing::warn!("POST_BRIDGE_API_KEY not set; publishing endpoints are disabled");
    }

    let bind = config.bind;
    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind).await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}
