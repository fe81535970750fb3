//! Downstream side of a relay session.
//!
//! The relay writes into a [`FrameSink`]. In the HTTP service that is a
//! [`ChannelSink`] feeding a bounded channel whose receiving half is the
//! response body ([`DownstreamBody`]). A full channel is backpressure; a dropped
//! receiver is a gone client.

use crate::cancel::{on_downstream_close, CancelToken, DownstreamGuard};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Frames buffered between the relay task and the response body.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("downstream sink is closed")]
pub struct SinkClosed;

/// Byte-consuming destination of a relay session.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one encoded frame, waiting for capacity if the consumer is slow.
    async fn write(&mut self, bytes: Bytes) -> Result<(), SinkClosed>;

    /// Signal end-of-stream to the consumer. Writes after close fail.
    fn close(&mut self);
}

pub struct ChannelSink {
    tx: Option<mpsc::Sender<Result<Bytes, std::io::Error>>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn write(&mut self, bytes: Bytes) -> Result<(), SinkClosed> {
        let tx = self.tx.as_ref().ok_or(SinkClosed)?;
        tx.send(Ok(bytes)).await.map_err(|_| SinkClosed)
    }

    fn close(&mut self) {
        self.tx.take();
    }
}

/// Response body fed by a [`ChannelSink`].
///
/// Holds an armed [`DownstreamGuard`]: if the body is dropped before the relay
/// closed the channel, the session's token fires with `DownstreamClosed`.
pub struct DownstreamBody {
    rx: mpsc::Receiver<Result<Bytes, std::io::Error>>,
    guard: DownstreamGuard,
}

impl Stream for DownstreamBody {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(None) => {
                this.guard.disarm();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// Create the sink/body pair for one session, bound to `token`.
pub fn downstream_channel(token: &CancelToken, capacity: usize) -> (ChannelSink, DownstreamBody) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelSink { tx: Some(tx) },
        DownstreamBody {
            rx,
            guard: on_downstream_close(token),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drained_body_does_not_fire_token() {
        let token = CancelToken::new(Duration::from_secs(1));
        let (mut sink, body) = downstream_channel(&token, 4);
        sink.write(Bytes::from_static(b"data: 1\n\n")).await.unwrap();
        sink.close();
        let chunks: Vec<_> = body.collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(!token.is_fired());
    }

    #[tokio::test]
    async fn test_dropped_body_fires_token_and_fails_writes() {
        let token = CancelToken::new(Duration::from_secs(1));
        let (mut sink, body) = downstream_channel(&token, 4);
        drop(body);
        assert!(token.is_fired());
        assert_eq!(
            token.cause(),
            Some(crate::cancel::CancelCause::DownstreamClosed)
        );
        assert_eq!(sink.write(Bytes::from_static(b"x")).await, Err(SinkClosed));
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let token = CancelToken::new(Duration::from_secs(1));
        let (mut sink, _body) = downstream_channel(&token, 4);
        sink.close();
        assert_eq!(sink.write(Bytes::from_static(b"x")).await, Err(SinkClosed));
    }
}
