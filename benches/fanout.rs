use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::net::SocketAddr;

use spatial_voice_relay::network::plan_fanout;
use spatial_voice_relay::protocol::AudioFrame;
use spatial_voice_relay::{ClientRegistry, Vec3};

fn populated_registry(count: usize) -> ClientRegistry {
    let registry = ClientRegistry::new();
    for i in 0..count {
        // Spread on a line so roughly half the participants are in range
        let position = Vec3::new(i as f32 * 128.0 / count as f32, 0.0, 0.0);
        let endpoint: SocketAddr = format!("10.0.{}.{}:40000", i / 250, i % 250 + 1)
            .parse()
            .unwrap();
        registry.upsert_from_audio(&format!("p{}", i), position, Vec3::x(), Some(endpoint));
    }
    registry
}

fn bench_plan_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_fanout");

    for count in [8usize, 64, 512] {
        let registry = populated_registry(count);
        let sender = registry.get("p0").unwrap();
        let others = registry.for_each_other("p0");

        group.bench_with_input(BenchmarkId::from_parameter(count), &others, |b, others| {
            b.iter(|| plan_fanout(black_box(&sender), black_box(others), 64.0))
        });
    }

    group.finish();
}

fn bench_audio_frame(c: &mut Criterion) {
    let frame = AudioFrame::new("player-0001", vec![0u8; 60], Vec3::new(1.0, 2.0, 3.0), Vec3::z());
    let encoded = frame.encode();

    c.bench_function("audio_frame_encode", |b| b.iter(|| black_box(&frame).encode()));
    c.bench_function("audio_frame_decode", |b| {
        b.iter(|| AudioFrame::decode(black_box(&encoded)).unwrap())
    });
}

criterion_group!(benches, bench_plan_fanout, bench_audio_frame);
criterion_main!(benches);
