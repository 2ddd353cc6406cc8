//! Combat and fan-out benchmarks
//!
//! Measures hit resolution and broadcast cost as the player count grows.
//!
//! Run with: cargo bench --bench combat

use std::sync::Arc;
use std::time::Instant;

use arena_fps_server::config::ServerConfig;
use arena_fps_server::game::state::{GameState, Player, PlayerId};
use arena_fps_server::game::systems::combat::resolve_shot;
use arena_fps_server::game::systems::hitscan::hit_test;
use arena_fps_server::metrics::Metrics;
use arena_fps_server::net::game_session::{GameSession, OUTBOUND_QUEUE_LEN};
use arena_fps_server::net::protocol::ServerMessage;
use arena_fps_server::util::vec3::{Rotation, Vec3};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use tokio::sync::mpsc;

/// Shooter at the origin facing -z plus `count` players scattered around the arena
fn create_state_with_players(count: usize) -> (GameState, PlayerId) {
    let mut state = GameState::new();
    let mut rng = rand::thread_rng();
    let now = Instant::now();

    let mut shooter = Player::new(PlayerId::generate(), now);
    shooter.position = Vec3::new(0.0, 1.7, 0.0);
    shooter.rotation = Rotation::ZERO;
    let shooter_id = shooter.id.clone();
    state.add_player(shooter);

    for i in 0..count {
        let mut player = Player::new(PlayerId::generate(), now);
        // Every tenth player stands in the line of fire
        player.position = if i % 10 == 0 {
            Vec3::new(0.0, 1.7, -rng.gen_range(1.0..45.0))
        } else {
            Vec3::new(rng.gen_range(-40.0..40.0), 1.7, rng.gen_range(-40.0..40.0))
        };
        state.add_player(player);
    }

    (state, shooter_id)
}

fn bench_hit_test(c: &mut Criterion) {
    let mut group = c.benchmark_group("hit_test");
    let mut rng = rand::thread_rng();
    let targets: Vec<Vec3> = (0..1000)
        .map(|_| Vec3::new(rng.gen_range(-40.0..40.0), 1.7, rng.gen_range(-40.0..40.0)))
        .collect();

    group.throughput(Throughput::Elements(targets.len() as u64));
    group.bench_function("cone_1000", |b| {
        b.iter(|| {
            let origin = Vec3::new(0.0, 1.7, 0.0);
            targets
                .iter()
                .filter(|t| hit_test(black_box(origin), Rotation::ZERO, **t))
                .count()
        })
    });
    group.finish();
}

fn bench_resolve_shot(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_shot");
    group.sample_size(50);

    for count in [10, 50, 250, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("players", count), &count, |b, &count| {
            b.iter_batched(
                || create_state_with_players(count),
                |(mut state, shooter)| black_box(resolve_shot(&mut state, &shooter, Instant::now())),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    group.sample_size(50);

    for count in [10, 50, 250] {
        let config = ServerConfig {
            max_players: count,
            ..ServerConfig::default()
        };
        let (mut session, _tickets) = GameSession::new(config, Arc::new(Metrics::new()));
        let mut inboxes = Vec::with_capacity(count);
        for _ in 0..count {
            let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);
            if session.on_connect(tx, Instant::now()).is_ok() {
                inboxes.push(rx);
            }
        }

        let message = ServerMessage::PlayerJump {
            id: PlayerId::generate(),
        };

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("players", count), &count, |b, _| {
            b.iter(|| {
                session.broadcast(black_box(&message), None);
                for inbox in inboxes.iter_mut() {
                    while inbox.try_recv().is_ok() {}
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_hit_test, bench_resolve_shot, bench_broadcast);

criterion_main!(benches);
