//! Core data types shared by the normalizer, the relay and the HTTP surface.

pub mod frame;
pub mod message;
pub mod request;

pub use frame::{DoneMarker, StreamFrame};
pub use message::{Message, MessageContent, MessageRole};
pub use request::InferenceRequest;
