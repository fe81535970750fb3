//! Request normalization: validates caller input and fills in the defaults that
//! every outbound [`InferenceRequest`] carries.
//!
//! The proxy and edge endpoints share this code and differ only in the
//! `provider_max_tokens` ceiling they pass in.

use crate::types::{InferenceRequest, Message};
use crate::{Error, ErrorContext, Result};
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_MAX_TOKENS: u32 = 4008;
pub const DEFAULT_TEMPERATURE: f64 = 0.6;
pub const DEFAULT_TOP_P: f64 = 1.0;
pub const DEFAULT_TOP_K: i64 = 40;
pub const DEFAULT_PRESENCE_PENALTY: f64 = 0.0;
pub const DEFAULT_FREQUENCY_PENALTY: f64 = 0.0;

/// `max_tokens` ceiling of the long-timeout proxy deployment.
pub const PROXY_MAX_TOKENS: u32 = 40_000;
/// `max_tokens` ceiling of the short-timeout edge deployment.
pub const EDGE_MAX_TOKENS: u32 = 8_192;

const SOURCE: &str = "request_normalizer";

/// Caller input as received. `null` and absent are treated alike.
#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    messages: Option<Vec<Message>>,
    #[serde(default)]
    max_tokens: Option<f64>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    top_k: Option<i64>,
    #[serde(default)]
    presence_penalty: Option<f64>,
    #[serde(default)]
    frequency_penalty: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestNormalizer {
    provider_max_tokens: u32,
    default_max_tokens: u32,
}

impl RequestNormalizer {
    pub fn new(provider_max_tokens: u32) -> Self {
        Self {
            provider_max_tokens: provider_max_tokens.max(1),
            default_max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn provider_max_tokens(&self) -> u32 {
        self.provider_max_tokens
    }

    /// Parse and normalize a raw request body.
    pub fn normalize(&self, raw: &[u8]) -> Result<InferenceRequest> {
        let value: Value = serde_json::from_slice(raw).map_err(|e| {
            Error::invalid_request(
                "request body is not valid JSON",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source(SOURCE),
            )
        })?;
        self.normalize_value(value)
    }

    /// Normalize an already-parsed request body.
    pub fn normalize_value(&self, value: Value) -> Result<InferenceRequest> {
        if !value.is_object() {
            return Err(Error::invalid_request(
                "request body must be a JSON object",
                ErrorContext::new().with_field_path("request").with_source(SOURCE),
            ));
        }

        let raw: RawRequest = serde_json::from_value(value).map_err(|e| {
            Error::invalid_request(
                "request body has a field of the wrong type",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source(SOURCE),
            )
        })?;

        let model = raw
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| {
                Error::invalid_request(
                    "model is required",
                    ErrorContext::new()
                        .with_field_path("request.model")
                        .with_source(SOURCE),
                )
            })?;

        let messages = raw.messages.filter(|m| !m.is_empty()).ok_or_else(|| {
            Error::invalid_request(
                "messages must be a non-empty array",
                ErrorContext::new()
                    .with_field_path("request.messages")
                    .with_source(SOURCE),
            )
        })?;

        Ok(InferenceRequest {
            model,
            messages,
            max_tokens: self.clamp_max_tokens(raw.max_tokens),
            temperature: raw.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: raw.top_p.unwrap_or(DEFAULT_TOP_P),
            top_k: raw.top_k.unwrap_or(DEFAULT_TOP_K),
            presence_penalty: raw.presence_penalty.unwrap_or(DEFAULT_PRESENCE_PENALTY),
            frequency_penalty: raw.frequency_penalty.unwrap_or(DEFAULT_FREQUENCY_PENALTY),
            // The relay only speaks event streams.
            stream: true,
        })
    }

    fn clamp_max_tokens(&self, requested: Option<f64>) -> u32 {
        let requested = requested.unwrap_or(self.default_max_tokens as f64);
        // `as` saturates, so huge or negative inputs land on the bounds.
        let requested = requested.trunc() as i64;
        requested.clamp(1, self.provider_max_tokens as i64) as u32
    }
}
