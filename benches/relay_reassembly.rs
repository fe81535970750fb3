//! Benchmarks for relay reassembly throughput
//!
//! Measures a full relay session over a typical chat-completion stream with the
//! upstream chunking at different granularities.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use llm_stream_relay::relay::{FrameSink, LineFramer, RelayMode, RelaySession, SinkClosed};
use llm_stream_relay::CancelToken;
use std::time::Duration;
use tokio_util::codec::Decoder;

const SSE_FRAMES: &[&str] = &[
    r#"data: {"id":"chatcmpl-123","object":"chat.completion.chunk","created":1694268190,"model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant","content":""},"finish_reason":null}]}"#,
    r#"data: {"id":"chatcmpl-123","object":"chat.completion.chunk","created":1694268190,"model":"gpt-4o","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#,
    r#"data: {"id":"chatcmpl-123","object":"chat.completion.chunk","created":1694268190,"model":"gpt-4o","choices":[{"index":0,"delta":{"content":" there"},"finish_reason":null}]}"#,
    r#"data: {"id":"chatcmpl-123","object":"chat.completion.chunk","created":1694268190,"model":"gpt-4o","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
    "data: [DONE]",
];

/// Counts bytes and drops them.
struct NullSink(u64);

#[async_trait]
impl FrameSink for NullSink {
    async fn write(&mut self, bytes: Bytes) -> Result<(), SinkClosed> {
        self.0 += bytes.len() as u64;
        Ok(())
    }

    fn close(&mut self) {}
}

fn stream_body(repeat: usize) -> Vec<u8> {
    let one = SSE_FRAMES.join("\n\n") + "\n\n";
    one.repeat(repeat).into_bytes()
}

fn chunked(body: &[u8], size: usize) -> Vec<Bytes> {
    body.chunks(size).map(Bytes::copy_from_slice).collect()
}

fn bench_framer(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_framer");
    let body = stream_body(50);
    group.throughput(Throughput::Bytes(body.len() as u64));

    group.bench_function("decode_single_buffer", |b| {
        b.iter(|| {
            let mut framer = LineFramer::new();
            let mut buf = BytesMut::from(black_box(&body[..]));
            let mut frames = 0usize;
            while let Ok(Some(_)) = framer.decode(&mut buf) {
                frames += 1;
            }
            frames
        })
    });

    group.finish();
}

fn bench_session(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("relay_session");
    let body = stream_body(50);
    group.throughput(Throughput::Bytes(body.len() as u64));

    for chunk_size in [7usize, 64, 1024] {
        let chunks = chunked(&body, chunk_size);
        for mode in [RelayMode::Lines, RelayMode::Passthrough] {
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", mode), chunk_size),
                &chunks,
                |b, chunks| {
                    b.to_async(&runtime).iter(|| {
                        let upstream = futures::stream::iter(
                            chunks
                                .iter()
                                .cloned()
                                .map(Ok::<_, llm_stream_relay::Error>)
                                .collect::<Vec<_>>(),
                        );
                        async move {
                            RelaySession::new(
                                upstream,
                                NullSink(0),
                                CancelToken::new(Duration::from_secs(60)),
                            )
                            .with_mode(mode)
                            .run()
                            .await
                        }
                    })
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_framer, bench_session);
criterion_main!(benches);
