//! Throughput Benchmark for Dropline
//!
//! Measures command parsing, broadcast fan-out through the client registry,
//! and a full `GET` round trip over loopback.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dropline::protocol::{parse_command, parse_filesize};
use dropline::session::{ClientRegistry, Outbox};
use dropline::{Client, MemoryStorage, Server, ServerConfig};
use std::time::Duration;
use tokio::runtime::Runtime;

/// Benchmark control line parsing
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ls", |b| {
        b.iter(|| parse_command(black_box("LS")));
    });

    group.bench_function("get", |b| {
        b.iter(|| parse_command(black_box("GET quarterly_report_final.pdf")));
    });

    group.bench_function("msg", |b| {
        b.iter(|| parse_command(black_box("MSG has anyone seen the latest build logs?")));
    });

    group.bench_function("filesize", |b| {
        b.iter(|| parse_filesize(black_box("FILESIZE 1048576")));
    });

    group.bench_function("unknown", |b| {
        b.iter(|| parse_command(black_box("DELETE everything")));
    });

    group.finish();
}

/// Benchmark broadcast to N registered sessions
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for members in [1usize, 10, 100] {
        let registry = ClientRegistry::new();
        let mut receivers = Vec::with_capacity(members);
        for i in 0..members {
            let (outbox, rx) = Outbox::channel();
            registry.add(registry.next_id(), format!("User_{}", 40000 + i), outbox);
            receivers.push(rx);
        }

        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, _| {
            b.iter(|| {
                registry.broadcast(black_box("User_40000: status update"), None);
                for rx in receivers.iter_mut() {
                    while rx.try_recv().is_ok() {}
                }
            });
        });
    }

    group.finish();
}

/// Benchmark GET over a real control and data connection
fn bench_get_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("get_round_trip");
    group.measurement_time(Duration::from_secs(10));

    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let storage = MemoryStorage::new();
        storage.insert("payload.bin", Bytes::from(vec![0xA5u8; size]));

        let mut client = rt.block_on(async {
            let server = Server::bind(ServerConfig::local(), storage).await.unwrap();
            let addr = server.local_addr().unwrap();
            tokio::spawn(server.run_until(std::future::pending()));
            Client::connect(addr).await.unwrap()
        });

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let contents = rt.block_on(client.get("payload.bin")).unwrap();
                black_box(contents);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse, bench_broadcast, bench_get_round_trip);
criterion_main!(benches);
