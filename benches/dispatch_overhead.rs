/// Call interception overhead benchmarks
///
/// Compares a direct call with calls through a tracked wrapper, with and
/// without subscribed loggers, and measures cache merging of growing
/// sequences.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;
use tracepads::cache::{Cache, CacheValue};
use tracepads::function::{CallArgs, Function};
use tracepads::lifecycle::RunOptions;
use tracepads::logger::CallStatsLogger;
use tracepads::tracker::{TrackOptions, Tracker};

fn add() -> Function {
    Function::new("bench", "add", |args| {
        let a = args.arg(0).and_then(|v| v.as_i64()).unwrap_or(0);
        let b = args.arg(1).and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(json!(a + b))
    })
}

fn bench_call_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_dispatch");
    let args = CallArgs::positional([1, 2]);

    let direct = add();
    group.bench_function("direct", |b| {
        b.iter(|| black_box(direct.call(black_box(&args))));
    });

    let tracker = Tracker::in_memory().expect("tracker");
    let unobserved = tracker
        .track(&add(), None, TrackOptions::new())
        .expect("track");
    group.bench_function("wrapped_no_loggers", |b| {
        b.iter(|| black_box(unobserved.call(black_box(&args))));
    });

    let tracker = Tracker::in_memory().expect("tracker");
    tracker.subscribe("log_call", Arc::new(CallStatsLogger::new()));
    tracker.start_run(RunOptions::new()).expect("run");
    let observed = tracker
        .track(&add(), None, TrackOptions::new())
        .expect("track");
    group.bench_function("wrapped_call_stats", |b| {
        b.iter(|| black_box(observed.call(black_box(&args))));
    });

    group.finish();
}

fn bench_cache_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_merge");

    for size in [10usize, 100, 1000] {
        let left: Cache = [("losses".to_string(), CacheValue::seq_of(0..size as i64))]
            .into_iter()
            .collect();
        let right: Cache = [("losses".to_string(), CacheValue::seq_of(0..size as i64))]
            .into_iter()
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("sequence", size), &size, |b, _| {
            b.iter(|| {
                let mut merged = left.clone();
                black_box(merged.merge(&right));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_call_dispatch, bench_cache_merge);
criterion_main!(benches);
