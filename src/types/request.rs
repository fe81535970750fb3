//! Canonical outbound inference request.

use super::message::Message;
use serde::{Deserialize, Serialize};

/// The payload sent upstream once a caller's request has been normalized.
///
/// Every field is always present; see [`crate::normalize::RequestNormalizer`]
/// for the defaults applied to fields the caller left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: i64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub stream: bool,
}
