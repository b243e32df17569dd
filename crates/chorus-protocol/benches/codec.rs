//! Codec benchmarks for chorus-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use chorus_protocol::{codec, Message};

fn bench_encode(c: &mut Criterion) {
    let message = Message::new("x".repeat(64)).with_sender("alice");

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("content_64B", |b| {
        b.iter(|| codec::encode(black_box(&message)))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let message = Message::new("x".repeat(64)).with_sender("alice");
    let encoded = codec::encode(&message).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("content_64B", |b| {
        b.iter(|| codec::decode(black_box(encoded.as_bytes())))
    });
    group.finish();
}

fn bench_reject_oversized(c: &mut Criterion) {
    let payload = vec![b'x'; codec::MAX_MESSAGE_SIZE * 2];

    c.bench_function("reject_oversized", |b| {
        b.iter(|| codec::decode(black_box(&payload)).is_err())
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_reject_oversized);
criterion_main!(benches);
