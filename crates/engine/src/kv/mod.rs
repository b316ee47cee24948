// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Block-granular KV cache stores.
//!
//! Blocks are fixed-size (in tokens) and content-addressed: a block's hash
//! covers the whole token prefix it terminates, so two requests share block
//! `k` iff their first `k * block_size` tokens agree — the prefix structure
//! is a DAG rooted at the empty prefix, never a cycle. Stores own their
//! blocks exclusively; requests hold plain ids.

use blis_config::Ticks;
use serde::Serialize;
use xxhash_rust::xxh3::Xxh3;

pub mod gpu;
pub mod tiered;

pub use gpu::GpuKvStore;
pub use tiered::{TieredConfig, TieredKvStore};

/// Index of a block within its GPU store.
pub type BlockId = usize;

/// Content hash over the token prefix a block terminates.
pub type BlockHash = u64;

/// Identifier of an in-flight tier transfer.
pub type TransferId = u64;

/// Chained content hashes for every *full* block of a token sequence.
///
/// Hash `k` covers tokens `[0, (k+1) * block_size)` by chaining the parent
/// hash into the block digest, so equal hashes imply equal full prefixes.
#[must_use]
pub fn prefix_hashes(tokens: &[u32], block_size: usize) -> Vec<BlockHash> {
    assert!(block_size > 0, "block_size must be positive");
    let full_blocks = tokens.len() / block_size;
    let mut hashes = Vec::with_capacity(full_blocks);
    let mut parent: BlockHash = 0;
    for block in tokens.chunks_exact(block_size) {
        let mut hasher = Xxh3::new();
        hasher.update(&parent.to_le_bytes());
        for token in block {
            hasher.update(&token.to_le_bytes());
        }
        parent = hasher.digest();
        hashes.push(parent);
    }
    hashes
}

/// Blocks required to hold `tokens` KV entries.
#[must_use]
pub fn blocks_for_tokens(tokens: usize, block_size: usize) -> usize {
    tokens.div_ceil(block_size)
}

/// Counters reported per store in the results.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    /// Prefix-cache block hits.
    pub hits: u64,
    /// Prefix lookups that stopped at a non-resident block.
    pub misses: u64,
    /// Cached blocks whose content was dropped to satisfy an allocation.
    pub evictions: u64,
    /// All-or-nothing allocations that could not be satisfied.
    pub allocation_failures: u64,
    /// Blocks offloaded to the CPU tier.
    pub offloads: u64,
    /// Blocks reloaded from the CPU tier.
    pub reloads: u64,
    /// Offload/reload round trips within the thrash window.
    pub thrashes: u64,
}

/// Per-tier accounting snapshot; `free + referenced + cached + transferring`
/// always equals `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierAccounting {
    /// Blocks with no content and no references.
    pub free: usize,
    /// Blocks held by at least one live request.
    pub referenced: usize,
    /// Unreferenced blocks still holding reusable cached content.
    pub cached: usize,
    /// Blocks leased to an in-flight transfer.
    pub transferring: usize,
    /// Tier capacity.
    pub total: usize,
}

impl TierAccounting {
    /// Checks the closed-sum invariant.
    #[must_use]
    pub fn balanced(&self) -> bool {
        self.free + self.referenced + self.cached + self.transferring == self.total
    }
}

/// All-or-nothing allocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocFailure {
    /// Blocks the caller asked for.
    pub requested: usize,
    /// Blocks that were actually available.
    pub available: usize,
}

/// A transfer the caller must schedule a `TransferComplete` event for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransfer {
    /// Transfer identifier, echoed back on completion.
    pub id: TransferId,
    /// Tick at which the transfer finishes.
    pub complete_at: Ticks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_prefixes_share_hashes_until_divergence() {
        let a: Vec<u32> = (0..64).collect();
        let mut b = a.clone();
        b[40] = 9999;
        let ha = prefix_hashes(&a, 16);
        let hb = prefix_hashes(&b, 16);
        assert_eq!(ha.len(), 4);
        assert_eq!(ha[0], hb[0]);
        assert_eq!(ha[1], hb[1]);
        assert_ne!(ha[2], hb[2]);
        // Divergence propagates: the chained parent changes every later hash.
        assert_ne!(ha[3], hb[3]);
    }

    #[test]
    fn same_block_content_at_different_depths_does_not_collide() {
        let a = vec![7u32; 32];
        let hashes = prefix_hashes(&a, 16);
        assert_ne!(hashes[0], hashes[1]);
    }

    #[test]
    fn blocks_for_tokens_rounds_up() {
        assert_eq!(blocks_for_tokens(0, 16), 0);
        assert_eq!(blocks_for_tokens(16, 16), 1);
        assert_eq!(blocks_for_tokens(17, 16), 2);
    }
}
