//! Chunk delivery benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ghosttap::{AudioChunk, StreamingChannel};

fn bench_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("delivery");

    group.bench_function("no_listener_1024", |b| {
        let channel = StreamingChannel::new();
        b.iter(|| channel.deliver(AudioChunk::new(vec![0u8; 1024], 0)));
    });

    group.bench_function("callback_1024", |b| {
        let channel = StreamingChannel::new();
        channel.set_listener(|chunk| {
            black_box(chunk.len());
        });
        b.iter(|| channel.deliver(AudioChunk::new(vec![0u8; 1024], 0)));
    });

    group.bench_function("rendezvous_1024", |b| {
        let channel = std::sync::Arc::new(StreamingChannel::new());
        let rx = channel.subscribe();
        let consumer = std::thread::spawn(move || while rx.recv().is_some() {});
        b.iter(|| channel.deliver(AudioChunk::new(vec![0u8; 1024], 0)));
        channel.clear_listener();
        let _ = consumer.join();
    });

    group.finish();
}

criterion_group!(benches, bench_delivery);
criterion_main!(benches);
