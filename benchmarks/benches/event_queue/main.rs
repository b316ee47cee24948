// SPDX-License-Identifier: Apache-2.0

//! Benchmark tests for the event queue

#![allow(missing_docs)]

use blis_engine::clock::EventQueue;
use blis_engine::event::EventKind;
use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};

const EVENT_COUNT: usize = 100_000;

fn filled_queue(count: usize) -> EventQueue {
    let mut queue = EventQueue::new();
    // Pseudo-shuffled times exercise real heap reordering.
    for i in 0..count {
        let time = ((i as i64).wrapping_mul(48_271)) % 1_000_000;
        queue.push(time.abs(), EventKind::StepAdvance { instance: i % 8 });
    }
    queue
}

fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_queue_push");
    let _ = group.bench_function(BenchmarkId::new("push", EVENT_COUNT), |b| {
        b.iter(|| filled_queue(EVENT_COUNT));
    });
    group.finish();
}

fn bench_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_queue_pop");
    let _ = group.bench_function(BenchmarkId::new("pop_all", EVENT_COUNT), |b| {
        b.iter_batched(
            || filled_queue(EVENT_COUNT),
            |mut queue| while queue.pop().is_some() {},
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_push, bench_pop);
criterion_main!(benches);
