//! # llm-stream-relay
//!
//! HTTP edge relay for streamed chat completions. A client posts a chat request,
//! the relay normalizes it, forwards it to the upstream inference endpoint and
//! re-frames the upstream byte stream as Server-Sent Events, always finishing
//! with a single `data: [DONE]` frame.
//!
//! ## Overview
//!
//! Each request runs as one session:
//!
//! 1. [`normalize`] validates the body and fills sampling defaults, clamping
//!    `max_tokens` to the route's provider ceiling.
//! 2. [`cancel::begin`] starts the session's wall-clock budget and returns the
//!    [`CancelToken`] every later stage races against.
//! 3. [`transport`] opens the upstream stream.
//! 4. [`relay`] reassembles upstream lines and writes frames to the client until
//!    end-of-data, failure or cancellation.
//! 5. [`translate`] turns failures into the client-facing error payload, either as
//!    a JSON response (before streaming) or an in-stream error frame.
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Canonical request, messages and stream frames |
//! | [`normalize`] | Request validation and defaulting |
//! | [`cancel`] | Deadline, abort and disconnect signalling |
//! | [`relay`] | Line reassembly and downstream writes |
//! | [`translate`] | Error classification and payloads |
//! | [`transport`] | Upstream HTTP client |
//! | [`server`] | axum routes for the proxy and edge profiles |
//! | [`config`] | YAML and environment configuration |

pub mod cancel;
pub mod config;
pub mod normalize;
pub mod relay;
pub mod server;
pub mod translate;
pub mod transport;
pub mod types;

pub use cancel::{begin, on_downstream_close, CancelCause, CancelHandle, CancelToken};
pub use config::{RelayConfig, RouteProfile, UpstreamConfig};
pub use normalize::RequestNormalizer;
pub use relay::{relay, FrameSink, RelayMode, RelayOutcome, RelaySession, RelayStats};
pub use translate::{translate, ErrorOrigin};
pub use transport::UpstreamClient;
pub use types::{InferenceRequest, Message, MessageRole, StreamFrame};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of fallible items
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
