// SPDX-License-Identifier: Apache-2.0

//! Benchmark tests for the GPU KV store

#![allow(missing_docs)]

use blis_engine::kv::{GpuKvStore, prefix_hashes};
use blis_engine::testing::tokens;
use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};

const BLOCKS: usize = 16_384;
const BLOCK_SIZE: usize = 16;
const PROMPTS: usize = 512;

fn bench_allocate_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("kv_allocate_release");
    let _ = group.bench_function(BenchmarkId::new("cycle", PROMPTS), |b| {
        b.iter_batched(
            || GpuKvStore::new(BLOCKS),
            |mut store| {
                for i in 0..PROMPTS {
                    let ids = store
                        .allocate(8, i as i64)
                        .expect("store is large enough for one prompt");
                    store.release(&ids, i as i64 + 1);
                }
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

fn bench_prefix_lookup(c: &mut Criterion) {
    // Warm store: every prompt's prefix is resident and hittable.
    let prompt_hashes: Vec<Vec<u64>> = (0..PROMPTS)
        .map(|i| prefix_hashes(&tokens(i as u32, 128), BLOCK_SIZE))
        .collect();
    let mut group = c.benchmark_group("kv_prefix_lookup");
    let _ = group.bench_function(BenchmarkId::new("hit", PROMPTS), |b| {
        b.iter_batched(
            || {
                let mut store = GpuKvStore::new(BLOCKS);
                for (i, hashes) in prompt_hashes.iter().enumerate() {
                    let ids = store.allocate(hashes.len(), i as i64).expect("capacity");
                    store.assign_hashes(&ids, hashes);
                    store.release(&ids, i as i64);
                }
                store
            },
            |mut store| {
                let mut hits = 0usize;
                for hashes in &prompt_hashes {
                    let (ids, n) = store.get_cached_blocks(hashes, 1_000_000);
                    hits += n;
                    store.release(&ids, 1_000_001);
                }
                hits
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_allocate_release, bench_prefix_lookup);
criterion_main!(benches);
