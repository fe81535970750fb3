//! Frames of the downstream event-stream protocol.
//!
//! Every frame is written as a single `data:` line followed by a blank line.
//! The stream always ends with `data: [DONE]` unless the client went away.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Prefix that marks a conforming event line.
pub const DATA_PREFIX: &[u8] = b"data:";
/// Payload of the terminal marker.
pub const DONE_PAYLOAD: &[u8] = b"[DONE]";
/// Blank-line separator that closes every frame.
pub const FRAME_SEPARATOR: &[u8] = b"\n\n";

/// One logical unit of the relayed protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// A complete event line, `data:` prefix included, separator excluded.
    Data(Bytes),
    /// The terminal `[DONE]` marker.
    Done,
    /// A failure surfaced in-band.
    Error(ErrorPayload),
}

/// JSON body of every error the relay reports, in-stream or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: bool,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ErrorPayload {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            kind: kind.into(),
        }
    }
}

impl StreamFrame {
    /// Classify one complete upstream line (terminator already removed).
    ///
    /// Returns `None` for padding (whitespace-only lines) and for the upstream's own
    /// `[DONE]` marker, since the relay writes its own terminator. Lines without the
    /// `data:` prefix are wrapped so the downstream always sees valid frames.
    pub fn from_line(line: &[u8]) -> Option<StreamFrame> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        if line.starts_with(DATA_PREFIX) {
            if trim_ascii(&line[DATA_PREFIX.len()..]) == DONE_PAYLOAD {
                return None;
            }
            return Some(StreamFrame::Data(Bytes::copy_from_slice(line)));
        }

        let mut wrapped = BytesMut::with_capacity(DATA_PREFIX.len() + 1 + line.len());
        wrapped.put_slice(DATA_PREFIX);
        wrapped.put_u8(b' ');
        wrapped.put_slice(line);
        Some(StreamFrame::Data(wrapped.freeze()))
    }

    /// The event payload with the `data:` prefix (and one following space) removed.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            StreamFrame::Data(line) => {
                let rest = line.strip_prefix(DATA_PREFIX).unwrap_or(line);
                Some(rest.strip_prefix(b" ").unwrap_or(rest))
            }
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StreamFrame::Done)
    }

    /// Wire bytes of the frame, separator included.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            StreamFrame::Data(line) => out.put_slice(line),
            StreamFrame::Done => {
                out.put_slice(DATA_PREFIX);
                out.put_u8(b' ');
                out.put_slice(DONE_PAYLOAD);
            }
            StreamFrame::Error(payload) => {
                out.put_slice(DATA_PREFIX);
                out.put_u8(b' ');
                // A struct of one bool and two strings always serializes.
                let json = serde_json::to_vec(payload).unwrap_or_default();
                out.put_slice(&json);
            }
        }
        out.put_slice(FRAME_SEPARATOR);
        out.freeze()
    }
}

/// How much of an upstream `[DONE]` marker a trailing piece of the stream holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneMarker {
    /// Cannot grow into a marker.
    None,
    /// A prefix of a marker; more bytes may complete it.
    Partial,
    /// A whole `data: [DONE]` line, possibly followed by blank lines.
    Complete,
}

impl DoneMarker {
    /// Classify the tail of an upstream stream that starts at a line boundary.
    pub fn classify(tail: &[u8]) -> DoneMarker {
        let line = trim_ascii(tail);
        if line.len() <= DATA_PREFIX.len() {
            return if DATA_PREFIX.starts_with(line) {
                DoneMarker::Partial
            } else {
                DoneMarker::None
            };
        }
        let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
            return DoneMarker::None;
        };
        let rest = trim_ascii(rest);
        if rest == DONE_PAYLOAD {
            DoneMarker::Complete
        } else if DONE_PAYLOAD.starts_with(rest) {
            DoneMarker::Partial
        } else {
            DoneMarker::None
        }
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conforming_line_is_kept_verbatim() {
        let frame = StreamFrame::from_line(br#"data:{"a":1}"#).unwrap();
        assert_eq!(frame.encode(), Bytes::from_static(b"data:{\"a\":1}\n\n"));
        assert_eq!(frame.payload(), Some(&br#"{"a":1}"#[..]));
    }

    #[test]
    fn test_raw_line_is_wrapped() {
        let frame = StreamFrame::from_line(br#"{"b":2}"#).unwrap();
        assert_eq!(frame.encode(), Bytes::from_static(b"data: {\"b\":2}\n\n"));
    }

    #[test]
    fn test_padding_and_upstream_done_are_dropped() {
        assert!(StreamFrame::from_line(b"").is_none());
        assert!(StreamFrame::from_line(b"  \t\r").is_none());
        assert!(StreamFrame::from_line(b"data: [DONE]").is_none());
        assert!(StreamFrame::from_line(b"data:[DONE]\r").is_none());
    }

    #[test]
    fn test_done_marker_classification() {
        assert_eq!(DoneMarker::classify(b"data: [DONE]\n\n"), DoneMarker::Complete);
        assert_eq!(DoneMarker::classify(b"data:[DONE]\r\n"), DoneMarker::Complete);
        assert_eq!(DoneMarker::classify(b"data: [DO"), DoneMarker::Partial);
        assert_eq!(DoneMarker::classify(b"da"), DoneMarker::Partial);
        assert_eq!(DoneMarker::classify(b"\n"), DoneMarker::Partial);
        assert_eq!(DoneMarker::classify(b"data: {\"a\""), DoneMarker::None);
        assert_eq!(DoneMarker::classify(b"hello"), DoneMarker::None);
    }

    #[test]
    fn test_carriage_return_is_stripped() {
        let frame = StreamFrame::from_line(b"data: x\r").unwrap();
        assert_eq!(frame.encode(), Bytes::from_static(b"data: x\n\n"));
    }

    #[test]
    fn test_done_and_error_encoding() {
        assert_eq!(
            StreamFrame::Done.encode(),
            Bytes::from_static(b"data: [DONE]\n\n")
        );
        let err = StreamFrame::Error(ErrorPayload::new("upstream_transport", "boom"));
        let encoded = err.encode();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("}\n\n"));
        let json: serde_json::Value =
            serde_json::from_str(text.trim_start_matches("data: ").trim_end()).unwrap();
        assert_eq!(json["error"], true);
        assert_eq!(json["message"], "boom");
        assert_eq!(json["type"], "upstream_transport");
    }
}
