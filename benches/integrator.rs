//! Criterion benchmarks for the analysis hot paths.
//!
//! Captures run at up to 100 kHz, so a one-hour file holds hundreds of millions of samples.
//! These benchmarks track:
//! - Trapezoidal integration throughput (samples/sec), with and without a progress observer
//! - Window selection cost on a sorted capture
//! - Telemetry line decoding
//!
//! Run with: cargo bench --bench integrator

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lpm01a_daq::core::{Sample, TimeWindow};
use lpm01a_daq::data::analysis::{integrate, select, Progress};
use lpm01a_daq::hardware::decode_line;

/// Irregularly spaced capture with a square-wave load.
fn capture(len: usize) -> Vec<Sample> {
    let mut t = 0u64;
    (0..len)
        .map(|i| {
            t += 10 + (i % 7) as u64;
            let current = if (i / 1_000) % 2 == 0 { 150 } else { 12_000 };
            Sample::new(t, t / 1_000, current)
        })
        .collect()
}

fn integrate_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("integrate");

    for len in [1_000usize, 100_000, 1_000_000] {
        let samples = capture(len);
        group.throughput(Throughput::Elements(len as u64));

        group.bench_with_input(BenchmarkId::new("plain", len), &samples, |b, samples| {
            b.iter(|| integrate(black_box(samples), None).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("with_progress", len), &samples, |b, samples| {
            b.iter(|| {
                let mut last = 0.0;
                let mut observe = |p: Progress| last = p.percent;
                integrate(black_box(samples), Some(&mut observe)).unwrap();
                last
            });
        });
    }

    group.finish();
}

fn window_selection(c: &mut Criterion) {
    let samples = capture(1_000_000);
    let last = samples.last().map_or(0, |s| s.host_timestamp_us);
    let window = TimeWindow::new(last / 3, 2 * last / 3).unwrap();

    c.bench_function("select_middle_third", |b| {
        b.iter(|| select(black_box(&samples), black_box(window)).len());
    });
}

fn telemetry_decoding(c: &mut Criterion) {
    let lines = ["12345-6", "5009-07", "xx1234-3", "TimeStamp: 12s 345ms, buff 3%"];

    c.bench_function("decode_line", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(decode_line(black_box(line)));
            }
        });
    });
}

criterion_group!(benches, integrate_throughput, window_selection, telemetry_decoding);
criterion_main!(benches);
