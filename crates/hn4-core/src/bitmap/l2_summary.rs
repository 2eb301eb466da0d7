//! L2 summary bitmap: one bit per 512-block region, used to skip dense
//! regions during scans (the Auditor's rolling window, the genesis probe
//! loop).
//!
//! Structurally this is a two-level page-ownership oracle generalized from
//! "does this 16MB chunk contain any live pointer" to "does this 512-block
//! region contain any allocated block".

use std::sync::atomic::{AtomicU64, Ordering};

/// Blocks covered by one L2 summary bit.
pub const L2_REGION_BLOCKS: u64 = 512;

pub struct L2Summary {
    words: Vec<AtomicU64>,
}

impl L2Summary {
    #[must_use]
    pub fn new(total_blocks: u64) -> Self {
        let regions = total_blocks.div_ceil(L2_REGION_BLOCKS);
        let words = regions.div_ceil(64);
        Self {
            words: (0..words).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn region_of(block_idx: u64) -> u64 {
        block_idx / L2_REGION_BLOCKS
    }

    #[must_use]
    pub fn is_set(&self, block_idx: u64) -> bool {
        let region = Self::region_of(block_idx);
        let (word, bit) = (region / 64, region % 64);
        match self.words.get(word as usize) {
            Some(w) => w.load(Ordering::Acquire) & (1 << bit) != 0,
            None => false,
        }
    }

    /// OR in the L2 bit for `block_idx`'s region. Idempotent; skips the CAS
    /// if already set.
    pub fn set(&self, block_idx: u64) {
        let region = Self::region_of(block_idx);
        let (word, bit) = (region / 64, region % 64);
        let Some(w) = self.words.get(word as usize) else { return };
        let mask = 1u64 << bit;
        if w.load(Ordering::Relaxed) & mask != 0 {
            return;
        }
        w.fetch_or(mask, Ordering::Release);
    }

    pub fn clear(&self, block_idx: u64) {
        let region = Self::region_of(block_idx);
        let (word, bit) = (region / 64, region % 64);
        if let Some(w) = self.words.get(word as usize) {
            w.fetch_and(!(1u64 << bit), Ordering::Release);
        }
    }
}
