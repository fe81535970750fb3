//! Upstream HTTP transport.

pub mod http;

pub use http::{body_stream, read_body_prefix, TransportError, UpstreamClient};
