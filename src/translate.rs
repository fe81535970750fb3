//! Error translation: every failure the client sees has the same JSON shape,
//! whether it arrives as an in-stream frame or as a pre-stream response body.

use crate::types::frame::{ErrorPayload, StreamFrame};
use std::time::Duration;

/// Upper bound on upstream diagnostic text copied into a client-facing message.
pub const MAX_DIAGNOSTIC_CHARS: usize = 1024;
/// Upper bound on upstream error-body bytes read at all.
pub const MAX_DIAGNOSTIC_BYTES: usize = MAX_DIAGNOSTIC_CHARS * 4;

/// Where a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    UpstreamTransport,
    UpstreamTimeout { budget: Duration },
    /// Non-2xx upstream response before any streaming began.
    UpstreamStatus { status: u16 },
    BodyParse,
}

impl ErrorOrigin {
    pub fn kind(&self) -> &'static str {
        match self {
            ErrorOrigin::UpstreamTransport => "upstream_transport",
            ErrorOrigin::UpstreamTimeout { .. } => "upstream_timeout",
            ErrorOrigin::UpstreamStatus { .. } => "upstream_status",
            ErrorOrigin::BodyParse => "body_parse",
        }
    }
}

/// Build the client-facing payload for a failure.
pub fn error_payload(origin: ErrorOrigin, detail: &str) -> ErrorPayload {
    let message = match origin {
        ErrorOrigin::UpstreamTimeout { budget } => format!(
            "The model did not finish within the {} time budget. Try a smaller request, \
             for example fewer messages or a lower max_tokens.",
            format_budget(budget)
        ),
        ErrorOrigin::UpstreamStatus { status } => {
            let diagnostic = truncate_chars(detail.trim(), MAX_DIAGNOSTIC_CHARS);
            if diagnostic.is_empty() {
                format!("Upstream returned HTTP {}", status)
            } else {
                format!("Upstream returned HTTP {}: {}", status, diagnostic)
            }
        }
        ErrorOrigin::BodyParse => format!(
            "Failed to parse request body: {}",
            truncate_chars(detail, MAX_DIAGNOSTIC_CHARS)
        ),
        ErrorOrigin::UpstreamTransport => format!(
            "Upstream request failed: {}",
            truncate_chars(detail, MAX_DIAGNOSTIC_CHARS)
        ),
    };
    ErrorPayload::new(origin.kind(), message)
}

/// Translate a failure into the in-stream error frame.
pub fn translate(origin: ErrorOrigin, detail: &str) -> StreamFrame {
    StreamFrame::Error(error_payload(origin, detail))
}

/// Pull a human-readable message out of an upstream error body.
///
/// Understands the common `{"error": {"message": ...}}` and `{"message": ...}`
/// shapes; anything else is returned as raw text.
pub fn upstream_diagnostic(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|json| {
            json.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .or_else(|| json.get("message"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.to_string())
}

/// Whole seconds as `120s`, anything finer as `250ms`.
fn format_budget(budget: Duration) -> String {
    if budget.subsec_millis() == 0 && budget.as_secs() > 0 {
        format!("{}s", budget.as_secs())
    } else {
        format!("{}ms", budget.as_millis())
    }
}

/// Truncate on a char boundary, marking the cut with an ellipsis.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
