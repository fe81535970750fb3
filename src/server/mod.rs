//! Inbound HTTP surface.
//!
//! Two relay endpoints (proxy and edge profile) plus a liveness probe. Each relay
//! endpoint accepts any method: `POST` relays, `OPTIONS` is acknowledged with an
//! empty 204, everything else is a 405.

mod handler;

use crate::config::RelayConfig;
use crate::transport::http::REQUEST_ID_HEADER;
use crate::transport::UpstreamClient;
use crate::translate::error_payload;
use crate::types::frame::ErrorPayload;
use crate::{Error, Result};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

pub use handler::relay_endpoint;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        Ok(Self {
            config: Arc::new(config),
            upstream,
        })
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub fn router(state: AppState) -> Router {
    let proxy_path = state.config.proxy.path.clone();
    let edge_path = state.config.edge.path.clone();

    Router::new()
        .route("/healthz", get(health))
        .route(&proxy_path, any(handler::proxy_route))
        .route(&edge_path, any(handler::edge_route))
        .with_state(state)
}

/// JSON error body sent when a request fails before any stream bytes were committed.
pub(crate) fn error_response(err: &Error, request_id: Option<&str>) -> Response {
    let payload = match err {
        Error::UpstreamStatus { message, .. } => error_payload(err.origin(), message),
        Error::UpstreamTimeout { .. } => error_payload(err.origin(), ""),
        Error::Transport(inner) => error_payload(err.origin(), &inner.to_string()),
        other => ErrorPayload::new(other.class(), other.to_string()),
    };
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response = (status, Json(payload)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    if let Some(value) = request_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error_response(&self, None)
    }
}
