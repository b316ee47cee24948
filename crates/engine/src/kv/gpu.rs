// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! GPU-tier KV store: block allocation with a reference-counted prefix cache
//! and LRU eviction of unreferenced blocks.
//!
//! Unreferenced blocks sit on the free list ordered by `(last_use, id)` —
//! deterministic given identical history. Blocks on the free list may still
//! carry content (the prefix cache); allocation evicts that content in LRU
//! order. Referenced blocks are never evicted.

use crate::kv::{AllocFailure, BlockHash, BlockId, CacheStats, TierAccounting};
use blis_config::Ticks;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct BlockMeta {
    hash: Option<BlockHash>,
    ref_count: u32,
    last_use: Ticks,
}

/// The GPU-tier block store.
#[derive(Debug)]
pub struct GpuKvStore {
    total: usize,
    meta: Vec<BlockMeta>,
    /// Unreferenced, non-transferring blocks in `(last_use, id)` order.
    free: BTreeSet<(Ticks, BlockId)>,
    /// Free blocks with no cached content.
    blank_free: usize,
    hash_index: HashMap<BlockHash, BlockId>,
    /// Blocks leased to an in-flight tier transfer.
    transferring: BTreeSet<BlockId>,
    stats: CacheStats,
}

impl GpuKvStore {
    /// A store with `total` blank blocks.
    #[must_use]
    pub fn new(total: usize) -> Self {
        let meta = vec![
            BlockMeta {
                hash: None,
                ref_count: 0,
                last_use: 0,
            };
            total
        ];
        let free = (0..total).map(|id| (0, id)).collect();
        Self {
            total,
            meta,
            free,
            blank_free: total,
            hash_index: HashMap::new(),
            transferring: BTreeSet::new(),
            stats: CacheStats::default(),
        }
    }

    /// Tier capacity in blocks.
    #[must_use]
    pub fn total_blocks(&self) -> usize {
        self.total
    }

    /// Blocks available to an allocation right now.
    #[must_use]
    pub fn available_blocks(&self) -> usize {
        self.free.len()
    }

    /// Blocks holding live or cached content (or mid-transfer).
    #[must_use]
    pub fn resident_blocks(&self) -> usize {
        self.total - self.blank_free
    }

    /// Fraction of blocks holding live or cached content.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.resident_blocks() as f64 / self.total as f64
    }

    /// Cache counters.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }

    /// Accounting snapshot; always balanced.
    #[must_use]
    pub fn accounting(&self) -> TierAccounting {
        let cached = self.free.len() - self.blank_free;
        TierAccounting {
            free: self.blank_free,
            referenced: self.total - self.free.len() - self.transferring.len(),
            cached,
            transferring: self.transferring.len(),
            total: self.total,
        }
    }

    /// Longest already-resident prefix: takes a reference on every hit block
    /// and returns `(block_ids, hit_count)`. Stops at the first miss.
    pub fn get_cached_blocks(
        &mut self,
        hashes: &[BlockHash],
        now: Ticks,
    ) -> (Vec<BlockId>, usize) {
        let mut ids = Vec::new();
        for hash in hashes {
            let Some(&id) = self.hash_index.get(hash) else {
                self.stats.misses += 1;
                break;
            };
            let last_use = self.meta[id].last_use;
            if self.meta[id].ref_count == 0 {
                let removed = self.free.remove(&(last_use, id));
                debug_assert!(removed, "cached free block missing from free list");
            }
            let meta = &mut self.meta[id];
            meta.ref_count += 1;
            meta.last_use = now;
            ids.push(id);
            self.stats.hits += 1;
        }
        let hits = ids.len();
        (ids, hits)
    }

    /// How many leading `hashes` are resident, without touching refcounts.
    /// Used by prefix-affinity routing.
    #[must_use]
    pub fn longest_prefix_blocks(&self, hashes: &[BlockHash]) -> usize {
        hashes
            .iter()
            .take_while(|h| self.hash_index.contains_key(h))
            .count()
    }

    /// Reserves `count` blocks for a request, evicting unreferenced cached
    /// content in LRU order as needed. All-or-nothing.
    pub fn allocate(&mut self, count: usize, now: Ticks) -> Result<Vec<BlockId>, AllocFailure> {
        if self.free.len() < count {
            self.stats.allocation_failures += 1;
            return Err(AllocFailure {
                requested: count,
                available: self.free.len(),
            });
        }
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = self.free.iter().next().copied();
            let Some((last_use, id)) = entry else {
                unreachable!("free-list size was checked above");
            };
            let removed = self.free.remove(&(last_use, id));
            debug_assert!(removed);
            let meta = &mut self.meta[id];
            if let Some(hash) = meta.hash.take() {
                let _ = self.hash_index.remove(&hash);
                self.stats.evictions += 1;
            } else {
                self.blank_free -= 1;
            }
            meta.ref_count = 1;
            meta.last_use = now;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Populates content hashes for freshly prefilled blocks. A hash already
    /// indexed by another block is skipped — first writer wins; the block
    /// stays anonymous and is recycled like any decode block.
    pub fn assign_hashes(&mut self, ids: &[BlockId], hashes: &[BlockHash]) {
        for (&id, &hash) in ids.iter().zip(hashes) {
            debug_assert!(self.meta[id].ref_count > 0, "hash assigned to free block");
            if self.meta[id].hash.is_some() || self.hash_index.contains_key(&hash) {
                continue;
            }
            self.meta[id].hash = Some(hash);
            let _ = self.hash_index.insert(hash, id);
        }
    }

    /// Drops one reference per block; blocks reaching zero re-enter the free
    /// list with `last_use = now`.
    pub fn release(&mut self, ids: &[BlockId], now: Ticks) {
        for &id in ids {
            let meta = &mut self.meta[id];
            assert!(meta.ref_count > 0, "release of unreferenced block {id}");
            meta.ref_count -= 1;
            if meta.ref_count == 0 {
                meta.last_use = now;
                let inserted = self.free.insert((now, id));
                debug_assert!(inserted);
                if meta.hash.is_none() {
                    self.blank_free += 1;
                }
            }
        }
    }

    /// Strips content from the `count` oldest unreferenced cached blocks.
    /// Fails without side effects if fewer are available; referenced blocks
    /// are never touched.
    pub fn evict_lru(&mut self, count: usize) -> Result<Vec<BlockId>, AllocFailure> {
        let cached = self.free.len() - self.blank_free;
        if cached < count {
            return Err(AllocFailure {
                requested: count,
                available: cached,
            });
        }
        let victims: Vec<(Ticks, BlockId)> = self
            .free
            .iter()
            .filter(|&&(_, id)| self.meta[id].hash.is_some())
            .take(count)
            .copied()
            .collect();
        let mut ids = Vec::with_capacity(count);
        for (last_use, id) in victims {
            if let Some(hash) = self.meta[id].hash.take() {
                let _ = self.hash_index.remove(&hash);
                self.stats.evictions += 1;
            }
            // Stays free; it is merely blank now.
            debug_assert!(self.free.contains(&(last_use, id)));
            self.blank_free += 1;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Takes up to `max` LRU unreferenced cached blocks out of the store for
    /// an offload transfer. The blocks stay occupied (transferring) until
    /// [`GpuKvStore::end_transfer_lease`].
    pub(crate) fn take_lru_cached(&mut self, max: usize) -> Vec<(BlockId, BlockHash)> {
        let victims: Vec<(Ticks, BlockId)> = self
            .free
            .iter()
            .filter(|&&(_, id)| self.meta[id].hash.is_some())
            .take(max)
            .copied()
            .collect();
        let mut taken = Vec::with_capacity(victims.len());
        for (last_use, id) in victims {
            let removed = self.free.remove(&(last_use, id));
            debug_assert!(removed);
            let Some(hash) = self.meta[id].hash.take() else {
                unreachable!("victim was filtered on having a hash");
            };
            let _ = self.hash_index.remove(&hash);
            let _ = self.transferring.insert(id);
            taken.push((id, hash));
        }
        taken
    }

    /// Leases `count` blank blocks for a reload transfer, or `None` when not
    /// enough blank capacity exists (the reload is skipped; the request will
    /// re-prefill instead).
    pub(crate) fn lease_blank(&mut self, count: usize) -> Option<Vec<BlockId>> {
        if self.blank_free < count {
            return None;
        }
        let picks: Vec<(Ticks, BlockId)> = self
            .free
            .iter()
            .filter(|&&(_, id)| self.meta[id].hash.is_none())
            .take(count)
            .copied()
            .collect();
        let mut ids = Vec::with_capacity(count);
        for (last_use, id) in picks {
            let removed = self.free.remove(&(last_use, id));
            debug_assert!(removed);
            self.blank_free -= 1;
            let _ = self.transferring.insert(id);
            ids.push(id);
        }
        Some(ids)
    }

    /// Returns offloaded blocks to the blank free pool.
    pub(crate) fn end_transfer_lease(&mut self, ids: &[BlockId], now: Ticks) {
        for &id in ids {
            let removed = self.transferring.remove(&id);
            debug_assert!(removed, "lease ended on non-transferring block {id}");
            self.meta[id].last_use = now;
            let inserted = self.free.insert((now, id));
            debug_assert!(inserted);
            self.blank_free += 1;
        }
    }

    /// Installs reloaded content: the leased blocks become unreferenced
    /// cached blocks, immediately hittable.
    pub(crate) fn finish_reload(&mut self, ids: &[BlockId], hashes: &[BlockHash], now: Ticks) {
        for (&id, &hash) in ids.iter().zip(hashes) {
            let removed = self.transferring.remove(&id);
            debug_assert!(removed, "reload finished on non-transferring block {id}");
            self.meta[id].last_use = now;
            let inserted = self.free.insert((now, id));
            debug_assert!(inserted);
            if self.hash_index.contains_key(&hash) {
                // The prefix was re-prefilled while the reload was in
                // flight; keep the existing mapping and blank this block.
                self.blank_free += 1;
            } else {
                self.meta[id].hash = Some(hash);
                let _ = self.hash_index.insert(hash, id);
            }
        }
    }

    /// Whether a hash is resident (and servable) on the GPU.
    #[must_use]
    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.hash_index.contains_key(hash)
    }
}
