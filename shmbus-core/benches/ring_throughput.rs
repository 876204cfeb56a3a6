// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared ring microbenchmarks.
//!
//! Measures the semaphore-guarded slot ring at various payload sizes, both
//! in a single thread and with a dedicated reader thread.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shmbus_core::{RingGeometry, SharedRing, ShmName};
use std::time::Duration;

/// Payload sizes to benchmark (in bytes).
const PAYLOAD_SIZES: &[usize] = &[64, 256, 1024, 4096, 16384];

/// Slots per benchmark ring.
const SLOTS: u32 = 64;

fn bench_ring(tag: &str, size: usize) -> SharedRing {
    let name = ShmName::new(format!("/shmbus_bench_{}_{}_{}", tag, size, std::process::id()))
        .expect("Invalid bench ring name");
    let geometry = RingGeometry::new(SLOTS, size as u32).expect("Invalid bench geometry");
    SharedRing::create(&name, geometry).expect("Failed to create ring")
}

/// Benchmark a write-read cycle on one thread.
fn bench_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_roundtrip");
    group.measurement_time(Duration::from_secs(5));

    for &size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes(size as u64 * 2)); // Write + read

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut ring = bench_ring("rt", size);
            let payload = vec![0xABu8; size];

            b.iter(|| {
                ring.write_message(black_box(&payload)).expect("Write failed");
                black_box(ring.read_message().expect("Read failed"));
            });

            ring.unlink_resources().ok();
        });
    }

    group.finish();
}

/// Benchmark writes drained by a concurrent reader.
fn bench_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_streaming");
    group.measurement_time(Duration::from_secs(5));

    const BATCH: usize = 1000;

    for &size in PAYLOAD_SIZES {
        group.throughput(Throughput::Bytes((size * BATCH) as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut ring = bench_ring("stream", size);
            let payload = vec![0xCDu8; size];

            b.iter(|| {
                std::thread::scope(|s| {
                    s.spawn(|| {
                        for _ in 0..BATCH {
                            black_box(ring.read_message().expect("Read failed"));
                        }
                    });
                    for _ in 0..BATCH {
                        ring.write_message(&payload).expect("Write failed");
                    }
                });
            });

            ring.unlink_resources().ok();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_roundtrip, bench_streaming);
criterion_main!(benches);
