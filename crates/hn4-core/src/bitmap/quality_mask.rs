//! Quality mask: two bits per block, four tiers.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum QualityTier {
    Toxic = 0,
    Bronze = 1,
    Silver = 2,
    Gold = 3,
}

impl QualityTier {
    const fn from_bits(b: u8) -> Self {
        match b & 0b11 {
            0 => Self::Toxic,
            1 => Self::Bronze,
            2 => Self::Silver,
            _ => Self::Gold,
        }
    }
}

pub struct QualityMask {
    words: Vec<AtomicU64>,
}

impl QualityMask {
    #[must_use]
    pub fn new(total_blocks: u64) -> Self {
        // 32 two-bit slots per 64-bit word, all-Gold by default.
        let words = total_blocks.div_ceil(32);
        Self {
            words: (0..words).map(|_| AtomicU64::new(u64::MAX)).collect(),
        }
    }

    #[must_use]
    pub fn get(&self, block_idx: u64) -> QualityTier {
        let (word, slot) = (block_idx / 32, (block_idx % 32) * 2);
        let Some(w) = self.words.get(word as usize) else { return QualityTier::Toxic };
        QualityTier::from_bits(((w.load(Ordering::Acquire) >> slot) & 0b11) as u8)
    }

    /// Demote (never promote) the tier of `block_idx` via a CAS loop
    /// (Phase 8: "demote the quality tier... Bronze (or Toxic if
    /// already Bronze)").
    pub fn demote(&self, block_idx: u64) {
        let (word, slot) = (block_idx / 32, (block_idx % 32) * 2);
        let Some(w) = self.words.get(word as usize) else { return };
        loop {
            let current = w.load(Ordering::Acquire);
            let tier = QualityTier::from_bits(((current >> slot) & 0b11) as u8);
            let new_tier = match tier {
                QualityTier::Gold => QualityTier::Silver,
                QualityTier::Silver => QualityTier::Bronze,
                QualityTier::Bronze | QualityTier::Toxic => QualityTier::Toxic,
            };
            let cleared = current & !(0b11 << slot);
            let updated = cleared | ((new_tier as u64) << slot);
            if w
                .compare_exchange_weak(current, updated, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn set(&self, block_idx: u64, tier: QualityTier) {
        let (word, slot) = (block_idx / 32, (block_idx % 32) * 2);
        let Some(w) = self.words.get(word as usize) else { return };
        loop {
            let current = w.load(Ordering::Acquire);
            let cleared = current & !(0b11 << slot);
            let updated = cleared | ((tier as u64) << slot);
            if w
                .compare_exchange_weak(current, updated, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }
}
