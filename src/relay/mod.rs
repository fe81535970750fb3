//! Streaming relay: re-frames an upstream event stream onto a downstream sink.
//!
//! # Session lifecycle
//!
//! ```text
//! upstream bytes ──► carry-over buffer ──► LineFramer ──► sink.write ──► ... ──► done ──► close
//!        ▲                                                   │
//!        └──────────── select! { token fired } ◄─────────────┘
//! ```
//!
//! Both suspension points (next upstream chunk, sink accepting a write) race the
//! session's [`CancelToken`], so a fired token is observed within one iteration.
//!
//! | Exit                        | Frames after the last data frame | Outcome      |
//! |-----------------------------|----------------------------------|--------------|
//! | upstream end-of-data        | `done`                           | `Completed`  |
//! | upstream transport error    | `error`, `done`                  | `Errored`    |
//! | deadline elapsed            | `error`, `done`                  | `Errored`    |
//! | client gone / aborted       | none                             | `Cancelled`  |
//!
//! The sink is closed exactly once on every exit.

pub mod framing;
pub mod sink;

pub use framing::LineFramer;
pub use sink::{
    downstream_channel, ChannelSink, DownstreamBody, FrameSink, SinkClosed, DEFAULT_CHANNEL_CAPACITY,
};

use crate::cancel::{CancelCause, CancelToken};
use crate::translate::{translate, ErrorOrigin};
use crate::types::{DoneMarker, StreamFrame};
use crate::Error;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

/// Upper bound on how long terminal frames may wait for a slow consumer.
const TERMINAL_WRITE_GRACE: Duration = Duration::from_secs(1);

/// How upstream bytes are turned into downstream writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// Reassemble lines and normalize each into a `data:` frame.
    #[default]
    Lines,
    /// Forward upstream bytes verbatim. A trailing upstream `[DONE]` frame is
    /// dropped so the relay's own terminator stays the only one.
    Passthrough,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    Completed,
    Errored { origin: ErrorOrigin, message: String },
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub upstream_chunks: u64,
    pub frames_written: u64,
    pub bytes_written: u64,
}

/// Why the pump loop stopped.
enum Stop {
    /// The token had fired before the first upstream read.
    NotStarted,
    EndOfData,
    UpstreamFailed { origin: ErrorOrigin, detail: String },
    TokenFired,
    DownstreamGone,
}

pub struct RelaySession<S, K> {
    upstream: Option<S>,
    sink: K,
    token: CancelToken,
    mode: RelayMode,
    carry: BytesMut,
    framer: LineFramer,
    stats: RelayStats,
}

impl<S, K> RelaySession<S, K>
where
    S: Stream<Item = crate::Result<Bytes>> + Unpin + Send,
    K: FrameSink,
{
    pub fn new(upstream: S, sink: K, token: CancelToken) -> Self {
        Self {
            upstream: Some(upstream),
            sink,
            token,
            mode: RelayMode::default(),
            carry: BytesMut::new(),
            framer: LineFramer::new(),
            stats: RelayStats::default(),
        }
    }

    pub fn with_mode(mut self, mode: RelayMode) -> Self {
        self.mode = mode;
        self
    }

    pub async fn run(self) -> RelayOutcome {
        self.run_with_stats().await.0
    }

    pub async fn run_with_stats(mut self) -> (RelayOutcome, RelayStats) {
        let started = Instant::now();

        let stop = if self.token.is_fired() {
            Stop::NotStarted
        } else {
            self.pump().await
        };

        // Release the upstream body before any terminal write.
        self.upstream = None;

        let outcome = self.finish(stop).await;
        self.sink.close();

        info!(
            outcome = ?outcome,
            mode = ?self.mode,
            upstream_chunks = self.stats.upstream_chunks,
            frames_written = self.stats.frames_written,
            bytes_written = self.stats.bytes_written,
            duration_ms = started.elapsed().as_millis() as u64,
            "relay session finished"
        );
        (outcome, self.stats)
    }

    async fn pump(&mut self) -> Stop {
        loop {
            let Some(upstream) = self.upstream.as_mut() else {
                return Stop::EndOfData;
            };

            let next = tokio::select! {
                biased;
                _ = self.token.fired() => return Stop::TokenFired,
                next = upstream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    self.stats.upstream_chunks += 1;
                    if let Err(stop) = self.forward(chunk).await {
                        return stop;
                    }
                }
                Some(Err(err)) => {
                    let origin = err.origin();
                    let detail = match err {
                        Error::Transport(inner) => inner.to_string(),
                        other => other.to_string(),
                    };
                    return Stop::UpstreamFailed { origin, detail };
                }
                None => {
                    if let Err(stop) = self.flush_tail().await {
                        return stop;
                    }
                    return Stop::EndOfData;
                }
            }
        }
    }

    async fn forward(&mut self, chunk: Bytes) -> Result<(), Stop> {
        match self.mode {
            RelayMode::Passthrough => {
                self.carry.extend_from_slice(&chunk);
                let held = held_tail_start(&self.carry);
                if held > 0 {
                    let ready = self.carry.split_to(held).freeze();
                    self.write(ready).await?;
                }
            }
            RelayMode::Lines => {
                self.carry.extend_from_slice(&chunk);
                loop {
                    match self.framer.decode(&mut self.carry) {
                        Ok(Some(frame)) => self.write(frame.encode()).await?,
                        Ok(None) => break,
                        Err(err) => return Err(parse_failure(err)),
                    }
                }
            }
        }
        Ok(())
    }

    /// Emit whatever the carry-over buffer still holds at upstream end-of-data.
    async fn flush_tail(&mut self) -> Result<(), Stop> {
        match self.mode {
            RelayMode::Lines => loop {
                match self.framer.decode_eof(&mut self.carry) {
                    Ok(Some(frame)) => self.write(frame.encode()).await?,
                    Ok(None) => return Ok(()),
                    Err(err) => return Err(parse_failure(err)),
                }
            },
            RelayMode::Passthrough => {
                let tail = self.carry.split().freeze();
                // The upstream's own marker is replaced by ours.
                if tail.is_empty() || DoneMarker::classify(&tail) == DoneMarker::Complete {
                    return Ok(());
                }
                self.write(tail).await
            }
        }
    }

    async fn write(&mut self, bytes: Bytes) -> Result<(), Stop> {
        let len = bytes.len() as u64;
        let written = tokio::select! {
            biased;
            _ = self.token.fired() => return Err(Stop::TokenFired),
            res = self.sink.write(bytes) => res,
        };
        match written {
            Ok(()) => {
                self.stats.frames_written += 1;
                self.stats.bytes_written += len;
                Ok(())
            }
            Err(closed) => {
                let gone = Error::from(closed);
                debug!(status = gone.status_code(), error = %gone, "downstream write failed");
                Err(Stop::DownstreamGone)
            }
        }
    }

    /// Write a frame after the token may already have fired. Bounded by a short grace period.
    async fn write_terminal(&mut self, frame: StreamFrame) -> bool {
        let bytes = frame.encode();
        let len = bytes.len() as u64;
        match tokio::time::timeout(TERMINAL_WRITE_GRACE, self.sink.write(bytes)).await {
            Ok(Ok(())) => {
                self.stats.frames_written += 1;
                self.stats.bytes_written += len;
                true
            }
            _ => false,
        }
    }

    async fn finish(&mut self, stop: Stop) -> RelayOutcome {
        match stop {
            Stop::NotStarted => RelayOutcome::Cancelled,
            Stop::EndOfData => {
                if self.write_terminal(StreamFrame::Done).await {
                    RelayOutcome::Completed
                } else {
                    RelayOutcome::Cancelled
                }
            }
            Stop::UpstreamFailed { origin, detail } => {
                warn!(error = %detail, "upstream failed mid-stream");
                self.fail(origin, &detail).await
            }
            Stop::TokenFired => match self.token.cause() {
                // A client that is still connected is told why the stream ended.
                Some(CancelCause::Deadline) => {
                    warn!(
                        budget_ms = self.token.budget().as_millis() as u64,
                        "relay deadline elapsed mid-stream"
                    );
                    let origin = ErrorOrigin::UpstreamTimeout {
                        budget: self.token.budget(),
                    };
                    self.fail(origin, "").await
                }
                _ => RelayOutcome::Cancelled,
            },
            Stop::DownstreamGone => {
                self.token.fire(CancelCause::DownstreamClosed);
                RelayOutcome::Cancelled
            }
        }
    }

    async fn fail(&mut self, origin: ErrorOrigin, detail: &str) -> RelayOutcome {
        let frame = translate(origin, detail);
        let message = match &frame {
            StreamFrame::Error(payload) => payload.message.clone(),
            _ => detail.to_string(),
        };
        if self.write_terminal(frame).await && self.write_terminal(StreamFrame::Done).await {
            RelayOutcome::Errored { origin, message }
        } else {
            RelayOutcome::Cancelled
        }
    }
}

/// Offset up to which passthrough bytes can be forwarded now.
///
/// The last non-blank line, and any blank lines after it, is held back while it
/// could still be (or grow into) an upstream `[DONE]` frame.
fn held_tail_start(buf: &[u8]) -> usize {
    let Some(last) = buf.iter().rposition(|b| !b.is_ascii_whitespace()) else {
        return 0;
    };
    let line_start = buf[..last]
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |nl| nl + 1);
    match DoneMarker::classify(&buf[line_start..]) {
        DoneMarker::None => buf.len(),
        DoneMarker::Partial | DoneMarker::Complete => line_start,
    }
}

fn parse_failure(err: std::io::Error) -> Stop {
    Stop::UpstreamFailed {
        origin: ErrorOrigin::BodyParse,
        detail: err.to_string(),
    }
}

/// Relay `upstream` onto `sink` in line mode until end-of-data, failure or cancellation.
pub async fn relay<S, K>(upstream: S, sink: K, token: CancelToken) -> RelayOutcome
where
    S: Stream<Item = crate::Result<Bytes>> + Unpin + Send,
    K: FrameSink,
{
    RelaySession::new(upstream, sink, token).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{on_downstream_close, CancelCause};
    use crate::transport::TransportError;
    use futures::channel::mpsc as fmpsc;
    use std::sync::{Arc, Mutex};

    /// Sink that records every write and counts closes.
    #[derive(Clone, Default)]
    struct RecordingSink {
        writes: Arc<Mutex<Vec<Bytes>>>,
        closes: Arc<Mutex<u32>>,
    }

    impl RecordingSink {
        fn text(&self) -> String {
            let writes = self.writes.lock().unwrap();
            writes
                .iter()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect()
        }

        fn done_count(&self) -> usize {
            self.text().matches("data: [DONE]\n\n").count()
        }

        fn closes(&self) -> u32 {
            *self.closes.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl FrameSink for RecordingSink {
        async fn write(&mut self, bytes: Bytes) -> Result<(), SinkClosed> {
            self.writes.lock().unwrap().push(bytes);
            Ok(())
        }

        fn close(&mut self) {
            *self.closes.lock().unwrap() += 1;
        }
    }

    fn upstream(chunks: Vec<&'static str>) -> crate::BoxStream<'static, Bytes> {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))),
        ))
    }

    fn token() -> CancelToken {
        CancelToken::new(Duration::from_secs(120))
    }

    #[tokio::test]
    async fn test_split_mid_frame_is_reassembled() {
        let sink = RecordingSink::default();
        let outcome = relay(
            upstream(vec!["data: {\"a\":1}\n\nda", "ta: {\"b\":2}\n\n"]),
            sink.clone(),
            token(),
        )
        .await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(
            sink.text(),
            "data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n"
        );
        assert_eq!(sink.closes(), 1);
    }

    #[tokio::test]
    async fn test_non_conforming_lines_are_wrapped_and_tail_flushed() {
        let sink = RecordingSink::default();
        let outcome = relay(
            upstream(vec!["hello\n\n  \nworld\ndata: [DONE]\ntrailing"]),
            sink.clone(),
            token(),
        )
        .await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(
            sink.text(),
            "data: hello\n\ndata: world\n\ndata: trailing\n\ndata: [DONE]\n\n"
        );
        assert_eq!(sink.done_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_emits_error_then_done() {
        let sink = RecordingSink::default();
        let chunks: Vec<crate::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: 1\n")),
            Err(Error::Transport(TransportError::Other("connection reset".into()))),
            Ok(Bytes::from_static(b"data: never\n")),
        ];
        let outcome = relay(
            Box::pin(futures::stream::iter(chunks)),
            sink.clone(),
            token(),
        )
        .await;

        match outcome {
            RelayOutcome::Errored { origin, message } => {
                assert_eq!(origin, ErrorOrigin::UpstreamTransport);
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let writes = sink.writes.lock().unwrap().clone();
        assert_eq!(writes.len(), 3);
        assert_eq!(&writes[0][..], b"data: 1\n\n");
        assert!(String::from_utf8_lossy(&writes[1]).contains("\"error\":true"));
        assert_eq!(&writes[2][..], b"data: [DONE]\n\n");
        assert_eq!(sink.closes(), 1);
    }

    #[tokio::test]
    async fn test_fired_token_skips_upstream_entirely() {
        let polled = Arc::new(Mutex::new(false));
        let flag = polled.clone();
        let upstream = futures::stream::poll_fn(move |_| {
            *flag.lock().unwrap() = true;
            std::task::Poll::Ready(None::<crate::Result<Bytes>>)
        });

        let token = token();
        token.fire(CancelCause::Aborted);
        let sink = RecordingSink::default();
        let outcome = relay(Box::pin(upstream), sink.clone(), token).await;

        assert_eq!(outcome, RelayOutcome::Cancelled);
        assert!(!*polled.lock().unwrap());
        assert!(sink.text().is_empty());
        assert_eq!(sink.closes(), 1);
    }

    #[tokio::test]
    async fn test_client_disconnect_mid_stream_releases_upstream_without_done() {
        let token = token();
        let (up_tx, up_rx) = fmpsc::unbounded::<crate::Result<Bytes>>();
        let (sink, mut body) = downstream_channel(&token, 4);

        let session = tokio::spawn(relay(up_rx, sink, token.clone()));

        up_tx
            .unbounded_send(Ok(Bytes::from_static(b"data: first\n")))
            .unwrap();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"data: first\n\n");

        // Client goes away before upstream end-of-data.
        drop(body);

        let outcome = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("relay should unwind")
            .unwrap();
        assert_eq!(outcome, RelayOutcome::Cancelled);
        assert_eq!(token.cause(), Some(CancelCause::DownstreamClosed));

        // The upstream receiver was dropped with the session.
        assert!(up_tx.is_closed());
        assert!(up_tx
            .unbounded_send(Ok(Bytes::from_static(b"data: late\n")))
            .is_err());
    }

    #[tokio::test]
    async fn test_deadline_mid_stream_reports_timeout_then_done() {
        let (token, _handle) = crate::cancel::begin(Duration::from_millis(50));
        let (up_tx, up_rx) = fmpsc::unbounded::<crate::Result<Bytes>>();
        up_tx
            .unbounded_send(Ok(Bytes::from_static(b"data: partial\n")))
            .unwrap();

        let sink = RecordingSink::default();
        // up_tx stays alive, so only the deadline can end the session.
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            relay(up_rx, sink.clone(), token),
        )
        .await
        .expect("deadline should end the session");

        assert!(matches!(
            outcome,
            RelayOutcome::Errored {
                origin: ErrorOrigin::UpstreamTimeout { .. },
                ..
            }
        ));
        let text = sink.text();
        assert!(text.starts_with("data: partial\n\n"));
        assert!(text.contains("upstream_timeout"));
        assert!(text.ends_with("data: [DONE]\n\n"));
        assert_eq!(sink.done_count(), 1);
        assert_eq!(sink.closes(), 1);
        drop(up_tx);
    }

    #[tokio::test]
    async fn test_passthrough_forwards_chunks_verbatim() {
        let sink = RecordingSink::default();
        let (outcome, stats) = RelaySession::new(
            upstream(vec!["data: {\"a\"", "", ":1}\n\n"]),
            sink.clone(),
            token(),
        )
        .with_mode(RelayMode::Passthrough)
        .run_with_stats()
        .await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(sink.text(), "data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(stats.upstream_chunks, 3);
        assert_eq!(stats.frames_written, 3);
        assert_eq!(sink.closes(), 1);
    }

    #[tokio::test]
    async fn test_passthrough_replaces_upstream_done() {
        let sink = RecordingSink::default();
        let outcome = RelaySession::new(
            upstream(vec!["data: {\"a\":1}\n\n", "data: [DONE]\n\n"]),
            sink.clone(),
            token(),
        )
        .with_mode(RelayMode::Passthrough)
        .run()
        .await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(sink.text(), "data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(sink.done_count(), 1);
    }

    #[tokio::test]
    async fn test_passthrough_holds_back_done_split_across_chunks() {
        let sink = RecordingSink::default();
        let outcome = RelaySession::new(
            upstream(vec!["data: {\"a\":1}\n\ndata: [DO", "NE]\r\n", "\r\n"]),
            sink.clone(),
            token(),
        )
        .with_mode(RelayMode::Passthrough)
        .run()
        .await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(sink.text(), "data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(sink.done_count(), 1);
    }

    #[tokio::test]
    async fn test_passthrough_forwards_unfinished_tail_at_end() {
        let sink = RecordingSink::default();
        RelaySession::new(upstream(vec!["data: 1\n\nda"]), sink.clone(), token())
            .with_mode(RelayMode::Passthrough)
            .run()
            .await;

        // Held back while it could start a marker, then forwarded as-is.
        assert_eq!(sink.text(), "data: 1\n\ndadata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_guard_registered_on_token_fires_mid_stream() {
        let token = token();
        let guard = on_downstream_close(&token);
        let (up_tx, up_rx) = fmpsc::unbounded::<crate::Result<Bytes>>();
        let sink = RecordingSink::default();
        let session = tokio::spawn(relay(up_rx, sink.clone(), token.clone()));

        drop(guard);
        let outcome = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, RelayOutcome::Cancelled);
        assert_eq!(sink.done_count(), 0);
        assert_eq!(sink.closes(), 1);
        drop(up_tx);
    }
}
