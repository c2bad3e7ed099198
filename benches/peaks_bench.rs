// ABOUTME: Criterion benchmarks for rolling-window peak extraction
// ABOUTME: Measures leader search and full per-activity extraction over synthetic 1 Hz rides
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Criterion benchmarks for peak extraction.
//!
//! Streams are generated deterministically so runs are comparable.

#![allow(clippy::missing_docs_in_private_items, missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use peaksync::intelligence::{find_leaders, PeakExtractor, WindowAxis, WindowOptions};
use peaksync::models::{Activity, ActivityBasetype, StreamSet, StreamType};

/// Ride with alternating two-minute efforts, sparse dropouts and one pause
#[allow(clippy::cast_precision_loss)]
fn synthetic_ride(seconds: usize) -> StreamSet {
    let mut times = Vec::with_capacity(seconds);
    let mut watts = Vec::with_capacity(seconds);
    let mut heartrate = Vec::with_capacity(seconds);
    let mut t = 0.0;
    for i in 0..seconds {
        // 30 s stop at the midpoint
        if i == seconds / 2 {
            t += 30.0;
        }
        times.push(t);
        let effort = if (i / 120) % 2 == 0 { 180.0 } else { 320.0 };
        let wobble = ((i * 37) % 23) as f64;
        watts.push(if i % 997 == 0 { f64::NAN } else { effort + wobble });
        heartrate.push(wobble.mul_add(0.25, 120.0 + effort / 8.0));
        t += 1.0;
    }
    let mut streams = StreamSet::new();
    streams.insert(StreamType::Time, times);
    streams.insert(StreamType::Watts, watts);
    streams.insert(StreamType::Heartrate, heartrate);
    streams
}

fn bench_find_leaders(c: &mut Criterion) {
    let streams = synthetic_ride(3_600);
    let times = streams.get(StreamType::Time).unwrap_or_default().to_vec();
    let watts = streams.get(StreamType::Watts).unwrap_or_default().to_vec();

    let mut group = c.benchmark_group("find_leaders");
    for period in [5.0, 60.0, 1_200.0] {
        group.bench_with_input(BenchmarkId::from_parameter(period), &period, |b, &period| {
            b.iter(|| {
                find_leaders(
                    black_box(&times),
                    black_box(&watts),
                    &[period],
                    WindowAxis::Time,
                    WindowOptions::default(),
                )
            });
        });
    }
    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let extractor = PeakExtractor::default();
    let activity = Activity::new(1, 1, 0, ActivityBasetype::Ride, "Bench Ride");

    let mut group = c.benchmark_group("extract");
    for hours in [1_usize, 3] {
        let samples = hours * 3_600;
        let streams = synthetic_ride(samples);
        group.throughput(Throughput::Elements(samples as u64));
        group.bench_with_input(BenchmarkId::new("ride_hours", hours), &streams, |b, streams| {
            b.iter(|| extractor.extract(black_box(&activity), black_box(streams)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_find_leaders, bench_extract);
criterion_main!(benches);
