//! # Replication Benchmark
//!
//! Measures the per-tick cost of the delta buffer, payload compression and
//! a full server snapshot pass for one connected client.
//!
//! Run with: `cargo bench --package spectre_netcode`

#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use spectre_core::{Position, Velocity, World};
use spectre_netcode::command::CommandRegistryBuilder;
use spectre_netcode::protocol::{CompressionKind, Compressor};
use spectre_netcode::rpc::RpcRegistryBuilder;
use spectre_netcode::snapshot::RegistryBuilder;
use spectre_netcode::time::ManualClock;
use spectre_netcode::transport::{LinkConditioner, LoopbackClient, LoopbackNetwork, LoopbackServer};
use spectre_netcode::{ClientSession, DeltaBuffer, NetConfig, NetRegistries, ServerSession};

fn bench_delta_buffer(c: &mut Criterion) {
    let values: Vec<i32> = (0..1_024).map(|i| (i * 37) % 200 - 100).collect();

    c.bench_function("delta_encode_1k_ints", |b| {
        let mut buffer = DeltaBuffer::with_capacity(1_024 * 8);
        b.iter(|| {
            buffer.clear();
            let mut baseline = 0;
            for &value in &values {
                buffer.add_int_delta(black_box(value), baseline);
                baseline = value;
            }
            buffer.bit_len()
        });
    });

    let mut encoded = DeltaBuffer::new();
    let mut baseline = 0;
    for &value in &values {
        encoded.add_int_delta(value, baseline);
        baseline = value;
    }
    c.bench_function("delta_decode_1k_ints", |b| {
        b.iter(|| {
            encoded.reset_read();
            let mut baseline = 0;
            for _ in 0..values.len() {
                baseline = encoded.read_int_delta(baseline).unwrap_or(baseline);
            }
            black_box(baseline)
        });
    });
}

fn bench_compression(c: &mut Criterion) {
    let mut payload = Vec::with_capacity(4_096);
    for i in 0..4_096u32 {
        payload.push(u8::try_from(i % 17).unwrap_or(0));
    }
    let mut group = c.benchmark_group("compress_4k");
    for kind in [CompressionKind::None, CompressionKind::Lz4] {
        let codec = kind.compressor();
        group.bench_with_input(BenchmarkId::from_parameter(format!("{kind:?}")), &payload, |b, p| {
            b.iter(|| codec.compress(black_box(p)).len());
        });
    }
    group.finish();
}

struct Harness {
    server: ServerSession<LoopbackServer>,
    client: ClientSession<LoopbackClient>,
    server_world: World,
    client_world: World,
    clock: Arc<ManualClock>,
}

fn harness(ghosts: usize) -> Harness {
    let registries = NetRegistries::new(
        RegistryBuilder::with_builtin().build(),
        CommandRegistryBuilder::new().build(),
        RpcRegistryBuilder::new().build(),
    );
    let clock = Arc::new(ManualClock::new(1));
    let config = NetConfig {
        snapshot_payload_budget: 64 * 1024,
        ..NetConfig::default()
    };
    let (network, transport) = LoopbackNetwork::new(LinkConditioner::none());
    let mut harness = Harness {
        server: ServerSession::new(transport, config.clone(), registries.clone(), clock.clone()),
        client: ClientSession::new(network.connect(), config, registries, clock.clone()),
        server_world: World::new(ghosts + 16),
        client_world: World::new(ghosts + 16),
        clock,
    };
    for i in 0..ghosts {
        let entity = harness.server_world.spawn();
        #[allow(clippy::cast_precision_loss)]
        let f = i as f32;
        harness.server_world.insert(entity, Position::new(f, 0.0, -f));
        harness.server_world.insert(entity, Velocity::new(1.0, 0.0, 0.5));
        let _ = harness.server.replicate(&mut harness.server_world, entity);
    }
    // Connect, go in game and settle the first full snapshot.
    for _ in 0..8 {
        harness.step();
    }
    harness
}

impl Harness {
    fn step(&mut self) {
        self.server_world.update_positions(1.0 / 60.0);
        let _ = self.server.tick(&mut self.server_world);
        let _ = self.client.tick(&mut self.client_world);
        self.clock.advance(16);
    }
}

fn bench_snapshot_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot_round_trip");
    group.sample_size(30);
    for ghosts in [100, 1_000] {
        let mut harness = harness(ghosts);
        group.bench_with_input(BenchmarkId::from_parameter(ghosts), &ghosts, |b, _| {
            b.iter(|| harness.step());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_delta_buffer, bench_compression, bench_snapshot_round_trip);
criterion_main!(benches);
