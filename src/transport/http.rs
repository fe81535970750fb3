use crate::config::UpstreamConfig;
use crate::types::InferenceRequest;
use crate::{BoxStream, Error, ErrorContext, Result};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::Proxy;
use std::time::Duration;

/// Header carrying the relay's per-request correlation id, both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Client for the upstream chat-completions endpoint.
///
/// Built once at start-up. There is deliberately no total request timeout on the
/// underlying client: a streamed response is bounded by the session's cancel token.
#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        if let Some(proxy_url) = config.proxy_url.as_deref() {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                Error::configuration_with_context(
                    "invalid outbound proxy url",
                    ErrorContext::new()
                        .with_field_path("upstream.proxy_url")
                        .with_details(e.to_string())
                        .with_source("upstream_client"),
                )
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The bearer credential, or `ConfigurationMissing` when none is configured.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::configuration_missing(
                "upstream API key is not configured",
                ErrorContext::new()
                    .with_field_path("upstream.api_key")
                    .with_details("set RELAY_API_KEY")
                    .with_source("upstream_client"),
            )
        })
    }

    /// POST the canonical request and return the response as soon as headers arrive.
    ///
    /// Non-2xx responses are returned as-is; the caller decides how to report them.
    pub async fn open_stream(
        &self,
        request: &InferenceRequest,
        request_id: &str,
    ) -> Result<reqwest::Response> {
        let api_key = self.require_api_key()?;

        self.client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("accept", "text/event-stream")
            .header(REQUEST_ID_HEADER, request_id)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))
    }
}

/// The response body as a stream of byte chunks in arrival order.
pub fn body_stream(response: reqwest::Response) -> BoxStream<'static, Bytes> {
    Box::pin(
        response
            .bytes_stream()
            .map_err(|e| Error::Transport(TransportError::Http(e))),
    )
}

/// Read at most `limit` bytes of a response body, decoded lossily.
///
/// Used for upstream error bodies, which are only ever shown truncated.
pub async fn read_body_prefix(response: reqwest::Response, limit: usize) -> Result<String> {
    let mut stream = response.bytes_stream();
    let mut buf = Vec::with_capacity(limit.min(8 * 1024));
    while buf.len() < limit {
        let Some(chunk) = stream.next().await else {
            break;
        };
        let chunk = chunk.map_err(|e| Error::Transport(TransportError::Http(e)))?;
        let take = (limit - buf.len()).min(chunk.len());
        buf.extend_from_slice(&chunk[..take]);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
