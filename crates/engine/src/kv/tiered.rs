// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Tiered KV store: decorates the GPU store with a CPU tier.
//!
//! When GPU utilization exceeds the offload threshold after a free action,
//! LRU unreferenced cached blocks are moved to host memory; a later prefix
//! hit on offloaded content triggers a bandwidth-limited reload before the
//! request can use it. Transfers are realized as start/complete event pairs:
//! this module computes the completion tick (serializing transfers per
//! direction to honor the bandwidth bound) and the instance schedules the
//! `TransferComplete` event.

use crate::kv::{
    AllocFailure, BlockHash, BlockId, CacheStats, GpuKvStore, PendingTransfer, TierAccounting,
    TransferId,
};
use blis_config::Ticks;
use std::collections::{BTreeSet, HashMap};

/// Tier sizing and transfer parameters.
#[derive(Debug, Clone, Copy)]
pub struct TieredConfig {
    /// CPU-tier capacity in blocks. Zero disables tiering entirely.
    pub cpu_blocks: usize,
    /// GPU utilization fraction that triggers offload.
    pub offload_threshold: f64,
    /// Transfer bandwidth in blocks per tick.
    pub transfer_bandwidth: u64,
    /// Fixed latency added to every transfer.
    pub transfer_base_latency: Ticks,
    /// Offload-then-reload round trips inside this window count as thrash.
    pub thrash_window: Ticks,
}

impl Default for TieredConfig {
    fn default() -> Self {
        Self {
            cpu_blocks: 0,
            offload_threshold: 0.9,
            transfer_bandwidth: 1,
            transfer_base_latency: 0,
            thrash_window: 10_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Offload,
    Reload,
}

#[derive(Debug)]
struct Transfer {
    direction: Direction,
    ids: Vec<BlockId>,
    hashes: Vec<BlockHash>,
}

/// Outcome of a reload probe during batch formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    /// Nothing CPU-resident blocks this request; admission may proceed.
    Clear,
    /// A reload for this prefix is already in flight; the request waits.
    Pending,
    /// A reload was just started; the caller must schedule its completion.
    Started(PendingTransfer),
}

/// GPU store plus CPU tier, offload/reload transfers, and thrash tracking.
#[derive(Debug)]
pub struct TieredKvStore {
    gpu: GpuKvStore,
    cfg: TieredConfig,
    /// CPU-resident content, by hash, with last-use ticks for LRU eviction.
    cpu: HashMap<BlockHash, Ticks>,
    cpu_lru: BTreeSet<(Ticks, BlockHash)>,
    in_flight: HashMap<TransferId, Transfer>,
    pending_reload: HashMap<BlockHash, TransferId>,
    next_transfer: TransferId,
    offload_busy_until: Ticks,
    reload_busy_until: Ticks,
    offloaded_at: HashMap<BlockHash, Ticks>,
}

impl TieredKvStore {
    /// A tiered store over a fresh GPU store of `gpu_blocks`.
    #[must_use]
    pub fn new(gpu_blocks: usize, cfg: TieredConfig) -> Self {
        Self {
            gpu: GpuKvStore::new(gpu_blocks),
            cfg,
            cpu: HashMap::new(),
            cpu_lru: BTreeSet::new(),
            in_flight: HashMap::new(),
            pending_reload: HashMap::new(),
            next_transfer: 0,
            offload_busy_until: 0,
            reload_busy_until: 0,
            offloaded_at: HashMap::new(),
        }
    }

    /// Whether a CPU tier is configured.
    #[must_use]
    pub fn tiering_enabled(&self) -> bool {
        self.cfg.cpu_blocks > 0
    }

    /// GPU-tier capacity.
    #[must_use]
    pub fn total_blocks(&self) -> usize {
        self.gpu.total_blocks()
    }

    /// GPU utilization fraction.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        self.gpu.utilization()
    }

    /// Combined cache counters.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        self.gpu.stats()
    }

    /// In-flight transfer count (both directions).
    #[must_use]
    pub fn pending_transfer_count(&self) -> usize {
        self.in_flight.len()
    }

    /// GPU-tier accounting snapshot.
    #[must_use]
    pub fn gpu_accounting(&self) -> TierAccounting {
        self.gpu.accounting()
    }

    /// CPU-tier accounting snapshot.
    #[must_use]
    pub fn cpu_accounting(&self) -> TierAccounting {
        TierAccounting {
            free: self.cfg.cpu_blocks.saturating_sub(self.cpu.len()),
            referenced: 0,
            cached: self.cpu.len(),
            transferring: 0,
            total: self.cfg.cpu_blocks,
        }
    }

    /// See [`GpuKvStore::get_cached_blocks`]. Transferring content never hits.
    pub fn get_cached_blocks(
        &mut self,
        hashes: &[BlockHash],
        now: Ticks,
    ) -> (Vec<BlockId>, usize) {
        self.gpu.get_cached_blocks(hashes, now)
    }

    /// See [`GpuKvStore::allocate`].
    pub fn allocate(&mut self, count: usize, now: Ticks) -> Result<Vec<BlockId>, AllocFailure> {
        self.gpu.allocate(count, now)
    }

    /// Blocks available to an allocation right now.
    #[must_use]
    pub fn available_blocks(&self) -> usize {
        self.gpu.available_blocks()
    }

    /// Populates content hashes after a prefill chunk. Content re-created on
    /// the GPU supersedes any stale CPU copy of the same prefix.
    pub fn assign_hashes(&mut self, ids: &[BlockId], hashes: &[BlockHash]) {
        for hash in hashes {
            if let Some(last_use) = self.cpu.remove(hash) {
                let _ = self.cpu_lru.remove(&(last_use, *hash));
                let _ = self.offloaded_at.remove(hash);
            }
        }
        self.gpu.assign_hashes(ids, hashes);
    }

    /// Releases references and, when GPU utilization then exceeds the
    /// threshold, starts one batched offload of LRU unreferenced blocks.
    /// Returns transfers the caller must schedule completions for.
    pub fn release(&mut self, ids: &[BlockId], now: Ticks) -> Vec<PendingTransfer> {
        self.gpu.release(ids, now);
        self.maybe_offload(now)
    }

    fn maybe_offload(&mut self, now: Ticks) -> Vec<PendingTransfer> {
        if !self.tiering_enabled() {
            return Vec::new();
        }
        let total = self.gpu.total_blocks();
        if total == 0 {
            return Vec::new();
        }
        let target = (self.cfg.offload_threshold * total as f64).floor() as usize;
        let resident = self.gpu.resident_blocks();
        if resident <= target {
            return Vec::new();
        }
        let wanted = resident - target;
        let taken = self.gpu.take_lru_cached(wanted);
        if taken.is_empty() {
            return Vec::new();
        }
        let (ids, hashes): (Vec<BlockId>, Vec<BlockHash>) = taken.into_iter().unzip();
        self.gpu.stats_mut().offloads += ids.len() as u64;
        let transfer = self.start_transfer(Direction::Offload, ids, hashes, now);
        vec![transfer]
    }

    /// Probes whether this prefix is blocked on (or now triggers) a reload
    /// from the CPU tier. Called during batch formation before any reference
    /// is taken.
    pub fn reload_state(&mut self, hashes: &[BlockHash], now: Ticks) -> ReloadState {
        if !self.tiering_enabled() || hashes.is_empty() {
            return ReloadState::Clear;
        }
        if hashes.iter().any(|h| self.pending_reload.contains_key(h)) {
            return ReloadState::Pending;
        }
        let gpu_prefix = self.gpu.longest_prefix_blocks(hashes);
        let run: Vec<BlockHash> = hashes[gpu_prefix..]
            .iter()
            .take_while(|h| self.cpu.contains_key(h))
            .copied()
            .collect();
        if run.is_empty() {
            return ReloadState::Clear;
        }
        let Some(ids) = self.gpu.lease_blank(run.len()) else {
            // No blank headroom to land the reload; the request re-prefills.
            return ReloadState::Clear;
        };
        for hash in &run {
            let Some(last_use) = self.cpu.remove(hash) else {
                unreachable!("run membership was checked above");
            };
            let _ = self.cpu_lru.remove(&(last_use, *hash));
            if let Some(offloaded) = self.offloaded_at.remove(hash) {
                if now - offloaded <= self.cfg.thrash_window {
                    self.gpu.stats_mut().thrashes += 1;
                }
            }
        }
        self.gpu.stats_mut().reloads += run.len() as u64;
        let transfer = self.start_transfer(Direction::Reload, ids, run, now);
        ReloadState::Started(transfer)
    }

    /// Whether any of these hashes is mid-reload.
    #[must_use]
    pub fn reload_pending(&self, hashes: &[BlockHash]) -> bool {
        hashes.iter().any(|h| self.pending_reload.contains_key(h))
    }

    /// Applies a finished transfer.
    pub fn on_transfer_complete(&mut self, id: TransferId, now: Ticks) {
        let Some(transfer) = self.in_flight.remove(&id) else {
            panic!("completion for unknown transfer {id}");
        };
        match transfer.direction {
            Direction::Offload => {
                self.gpu.end_transfer_lease(&transfer.ids, now);
                for hash in transfer.hashes {
                    let _ = self.cpu.insert(hash, now);
                    let _ = self.cpu_lru.insert((now, hash));
                    let _ = self.offloaded_at.insert(hash, now);
                }
                while self.cpu.len() > self.cfg.cpu_blocks {
                    let Some(&(last_use, hash)) = self.cpu_lru.iter().next() else {
                        break;
                    };
                    let _ = self.cpu_lru.remove(&(last_use, hash));
                    let _ = self.cpu.remove(&hash);
                    let _ = self.offloaded_at.remove(&hash);
                }
            }
            Direction::Reload => {
                self.gpu.finish_reload(&transfer.ids, &transfer.hashes, now);
                for hash in &transfer.hashes {
                    let _ = self.pending_reload.remove(hash);
                }
            }
        }
    }

    /// How many leading `hashes` are resident in either tier (or mid-reload).
    /// Used by prefix-affinity routing, where reload still beats recompute.
    #[must_use]
    pub fn longest_prefix_blocks(&self, hashes: &[BlockHash]) -> usize {
        hashes
            .iter()
            .take_while(|h| {
                self.gpu.contains(h)
                    || self.cpu.contains_key(h)
                    || self.pending_reload.contains_key(h)
            })
            .count()
    }

    fn start_transfer(
        &mut self,
        direction: Direction,
        ids: Vec<BlockId>,
        hashes: Vec<BlockHash>,
        now: Ticks,
    ) -> PendingTransfer {
        let blocks = ids.len() as u64;
        let duration =
            self.cfg.transfer_base_latency + blocks.div_ceil(self.cfg.transfer_bandwidth.max(1)) as Ticks;
        let busy_until = match direction {
            Direction::Offload => &mut self.offload_busy_until,
            Direction::Reload => &mut self.reload_busy_until,
        };
        // One transfer at a time per direction: later transfers queue behind
        // the busy window, which is how the bandwidth bound is realized.
        let start = now.max(*busy_until);
        let complete_at = start + duration;
        *busy_until = complete_at;

        let id = self.next_transfer;
        self.next_transfer += 1;
        if direction == Direction::Reload {
            for hash in &hashes {
                let _ = self.pending_reload.insert(*hash, id);
            }
        }
        let _ = self.in_flight.insert(
            id,
            Transfer {
                direction,
                ids,
                hashes,
            },
        );
        PendingTransfer { id, complete_at }
    }
}
