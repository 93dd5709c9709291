// Criterion benchmarks for the wirerpc-common wire codec
//
// Run benchmarks with:
//   cargo bench -p wirerpc-common
//
// For detailed output with plots:
//   cargo bench -p wirerpc-common -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use wirerpc_common::transport::{encode, CodecConfig, FrameDecoder, Message};
use wirerpc_common::{CorrelationIdGenerator, Request, Response};

fn request_with_payload(items: usize) -> Request {
    let data: Vec<String> = (0..items).map(|i| format!("item_{}", i)).collect();
    Request::new("bench-1", "EchoService", "echo")
        .with_param("list", json!(data))
        .with_metadata("trace", json!("t-1"))
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let config = CodecConfig::default();

    for items in [1usize, 10, 100] {
        let message = Message::Request(request_with_payload(items));
        group.bench_with_input(BenchmarkId::new("request", items), &message, |b, message| {
            b.iter(|| encode(black_box(message), &config))
        });
    }

    let response = Message::Response(Response::success("bench-1", json!({"result": 42})));
    group.bench_function("response", |b| b.iter(|| encode(black_box(&response), &config)));

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let config = CodecConfig::default();

    for items in [1usize, 10, 100] {
        let frame = encode(&Message::Request(request_with_payload(items)), &config).unwrap();
        group.bench_with_input(BenchmarkId::new("request", items), &frame, |b, frame| {
            b.iter(|| {
                let mut decoder = FrameDecoder::new(config);
                decoder.extend(black_box(frame));
                decoder.decode()
            })
        });
    }

    // Same frame delivered in 16-byte reads
    let frame = encode(&Message::Request(request_with_payload(100)), &config).unwrap();
    group.bench_function("request_split_reads", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new(config);
            let mut decoded = None;
            for chunk in frame.chunks(16) {
                decoder.extend(chunk);
                if let Some(message) = decoder.decode().unwrap() {
                    decoded = Some(message);
                }
            }
            decoded
        })
    });

    group.finish();
}

fn bench_correlation_ids(c: &mut Criterion) {
    let ids = CorrelationIdGenerator::new();
    c.bench_function("correlation_id_next", |b| b.iter(|| ids.next_id()));
}

criterion_group!(benches, bench_encode, bench_decode, bench_correlation_ids);
criterion_main!(benches);
