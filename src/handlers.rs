use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::ExtractionError;
use crate::models::{BatchRequest, ExtractRequest, ProxyQuery, PublishRequest};
use crate::{pipeline, proxy, publish, AppState};

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn extract_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Response {
    match pipeline::extract_single(&state, &req).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn batch_endpoint(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Response {
    let mut inputs = req.urls;
    inputs.extend(req.url);

    match pipeline::extract_batch(&state, &inputs).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn proxy_endpoint(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Response {
    match proxy::proxy_image(&state.proxy_client, &state.config, &query.url).await {
        Ok(response) => response,
        Err(e) => error_response(e),
    }
}

pub async fn publish_endpoint(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> Response {
    match publish::create_post(&state.client, &state.config, &req).await {
        Ok(forwarded) => forwarded_response(forwarded),
        Err(e) => error_response(e),
    }
}

pub async fn accounts_endpoint(State(state): State<AppState>) -> Response {
    match publish::list_accounts(&state.client, &state.config).await {
        Ok(forwarded) => forwarded_response(forwarded),
        Err(e) => error_response(e),
    }
}

fn forwarded_response(forwarded: publish::Forwarded) -> Response {
    let status = StatusCode::from_u16(forwarded.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(forwarded.body)).into_response()
}

fn error_response(e: ExtractionError) -> Response {
    let status = match &e {
        ExtractionError::NoUrlFound
        | ExtractionError::InvalidUrl(_)
        | ExtractionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ExtractionError::Upstream(_) | ExtractionError::Request(_) => StatusCode::BAD_GATEWAY,
        ExtractionError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(json!({"success": false, "error": e.to_string()})),
    )
        .into_response()
}
