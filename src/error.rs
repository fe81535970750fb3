use crate::relay::SinkClosed;
use crate::translate::ErrorOrigin;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for validation and configuration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "request.messages", "upstream.base_url")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "request_normalizer", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the relay.
///
/// Every variant that can occur before the first streamed byte maps to an HTTP status
/// via [`Error::status_code`]. Once streaming has begun, failures are surfaced as
/// in-stream error frames instead (see [`crate::translate`]).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid request: {message}{}", format_context(.context))]
    InvalidRequest {
        message: String,
        context: ErrorContext,
    },

    #[error("Missing configuration: {message}{}", format_context(.context))]
    ConfigurationMissing {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Upstream rejected the request: HTTP {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("Upstream did not respond within {}ms", .budget.as_millis())]
    UpstreamTimeout { budget: Duration },

    #[error("Upstream transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Downstream connection closed")]
    DownstreamGone,
}

impl From<SinkClosed> for Error {
    fn from(_: SinkClosed) -> Self {
        Error::DownstreamGone
    }
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn invalid_request(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::InvalidRequest {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_missing(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::ConfigurationMissing {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::InvalidRequest { context, .. }
            | Error::ConfigurationMissing { context, .. }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// HTTP status used when this error is reported before any stream bytes were sent.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidRequest { .. } => 400,
            Error::UpstreamStatus { status, .. } => *status,
            Error::UpstreamTimeout { .. } => 504,
            // Nobody is listening; the status is only recorded in logs.
            Error::DownstreamGone => 499,
            Error::ConfigurationMissing { .. }
            | Error::Configuration { .. }
            | Error::Transport(_) => 500,
        }
    }

    /// Short machine-readable class, used as the `type` field of error payloads.
    pub fn class(&self) -> &'static str {
        match self {
            Error::InvalidRequest { .. } => "invalid_request",
            Error::ConfigurationMissing { .. } => "configuration_missing",
            Error::Configuration { .. } => "configuration",
            Error::UpstreamStatus { .. } => "upstream_status",
            Error::UpstreamTimeout { .. } => "upstream_timeout",
            Error::Transport(_) => "upstream_transport",
            Error::DownstreamGone => "downstream_gone",
        }
    }

    /// Translator origin for errors that are reported to the client.
    pub fn origin(&self) -> ErrorOrigin {
        match self {
            Error::UpstreamTimeout { budget } => ErrorOrigin::UpstreamTimeout { budget: *budget },
            Error::UpstreamStatus { status, .. } => ErrorOrigin::UpstreamStatus { status: *status },
            Error::InvalidRequest { .. } => ErrorOrigin::BodyParse,
            _ => ErrorOrigin::UpstreamTransport,
        }
    }
}
