use super::{error_response, AppState};
use crate::cancel::{self, CancelCause};
use crate::config::RouteProfile;
use crate::relay::{downstream_channel, RelaySession, DEFAULT_CHANNEL_CAPACITY};
use crate::translate::{upstream_diagnostic, MAX_DIAGNOSTIC_BYTES};
use crate::transport::{body_stream, read_body_prefix};
use crate::transport::http::REQUEST_ID_HEADER;
use crate::{Error, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub(super) async fn proxy_route(
    State(state): State<AppState>,
    method: Method,
    body: Bytes,
) -> Response {
    let profile = state.config.proxy.clone();
    relay_endpoint(state, profile, method, body).await
}

pub(super) async fn edge_route(
    State(state): State<AppState>,
    method: Method,
    body: Bytes,
) -> Response {
    let profile = state.config.edge.clone();
    relay_endpoint(state, profile, method, body).await
}

/// Serve one request against a route profile.
pub async fn relay_endpoint(
    state: AppState,
    profile: RouteProfile,
    method: Method,
    body: Bytes,
) -> Response {
    match method {
        Method::POST => {}
        Method::OPTIONS => return StatusCode::NO_CONTENT.into_response(),
        other => {
            let mut response = (
                StatusCode::METHOD_NOT_ALLOWED,
                axum::Json(json!({
                    "error": true,
                    "message": format!("Method {} not allowed", other),
                    "type": "method_not_allowed",
                })),
            )
                .into_response();
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST, OPTIONS"));
            return response;
        }
    }

    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("relay", request_id = %request_id, route = %profile.path);

    match start_stream(&state, &profile, &request_id, body)
        .instrument(span)
        .await
    {
        Ok(response) => response,
        Err(err) => error_response(&err, Some(&request_id)),
    }
}

async fn start_stream(
    state: &AppState,
    profile: &RouteProfile,
    request_id: &str,
    body: Bytes,
) -> Result<Response> {
    let outcome = open_upstream(state, profile, request_id, body).await;
    if let Err(err) = &outcome {
        warn!(status = err.status_code(), class = err.class(), error = %err, "request failed before streaming");
    }
    outcome
}

async fn open_upstream(
    state: &AppState,
    profile: &RouteProfile,
    request_id: &str,
    body: Bytes,
) -> Result<Response> {
    state.upstream.require_api_key()?;
    let request = profile.normalizer().normalize(&body)?;

    let (token, handle) = cancel::begin(profile.budget());
    let timed_out = || Error::UpstreamTimeout {
        budget: token.budget(),
    };

    let upstream = tokio::select! {
        biased;
        _ = token.fired() => return Err(timed_out()),
        res = state.upstream.open_stream(&request, request_id) => res?,
    };

    let status = upstream.status();
    if !status.is_success() {
        let text = tokio::select! {
            biased;
            _ = token.fired() => String::new(),
            text = read_body_prefix(upstream, MAX_DIAGNOSTIC_BYTES) => text.unwrap_or_default(),
        };
        return Err(Error::UpstreamStatus {
            status: status.as_u16(),
            message: upstream_diagnostic(&text),
        });
    }

    info!(
        model = %request.model,
        max_tokens = request.max_tokens,
        budget_ms = profile.budget_ms,
        "upstream stream opened"
    );

    let (sink, downstream) = downstream_channel(&token, DEFAULT_CHANNEL_CAPACITY);
    let session = RelaySession::new(body_stream(upstream), sink, token.clone()).with_mode(profile.mode);

    tokio::spawn(
        async move {
            let outcome = session.run().await;
            if token.cause() == Some(CancelCause::DownstreamClosed) {
                info!("client disconnected before the stream finished");
            }
            // Dropping the handle stops the deadline timer.
            drop(handle);
            outcome
        }
        .instrument(tracing::Span::current()),
    );

    let mut response = Response::new(Body::from_stream(downstream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}
