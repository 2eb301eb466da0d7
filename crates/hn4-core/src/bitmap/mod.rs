//! The Armored Bitmap: atomic block ownership with per-word
//! SEC-DED ECC and an ABA-proof version counter.

pub mod ecc;
pub mod l2_summary;
pub mod quality_mask;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Hn4Error, Hn4Info, Outcome};
use crate::telemetry::{LogLevel, LogRecord, LogSink};
use ecc::{ecc_check_and_fix, ecc_encode, EccStatus};
use l2_summary::L2Summary;

/// In-RAM representation of one 16-byte Armored Bitmap word:
/// 64 bits of `data`, an 8-bit Hamming SEC-DED `ecc`, and a 56-bit
/// monotonic `version`.
///
/// A true 128-bit single-instruction CAS is not available on stable Rust
/// without hardware-specific intrinsics, so architectures lacking hardware
/// support fall back to a process-wide spinlock-guarded 16-byte swap: each
/// word is instead guarded by its own `parking_lot::Mutex`, sharded per
/// word rather than one lock for the whole bitmap. See `DESIGN.md` for the
/// decision extending this fallback to every profile, not just
/// PICO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WordState {
    data: u64,
    ecc: u8,
    /// 56-bit monotonic counter; the top 8 bits are always zero.
    version: u64,
}

const VERSION_MASK: u64 = (1u64 << 56) - 1;

impl WordState {
    fn bump(self, data: u64) -> Self {
        Self {
            data,
            ecc: ecc_encode(data),
            version: (self.version + 1) & VERSION_MASK,
        }
    }
}

/// Three atomic, linearizable operations over one bit each.
pub struct ArmoredBitmap {
    words: Vec<Mutex<WordState>>,
    l2: L2Summary,
    used_blocks: AtomicU64,
    heal_count: AtomicU64,
    read_only: AtomicBool,
    sink: Arc<dyn LogSink>,
}

fn locate(idx: u64) -> (usize, u32) {
    ((idx / 64) as usize, (idx % 64) as u32)
}

impl ArmoredBitmap {
    #[must_use]
    pub fn new(total_blocks: u64, read_only: bool, sink: Arc<dyn LogSink>) -> Self {
        let word_count = total_blocks.div_ceil(64) as usize;
        let words = (0..word_count)
            .map(|_| {
                Mutex::new(WordState {
                    data: 0,
                    ecc: ecc_encode(0),
                    version: 0,
                })
            })
            .collect();
        Self {
            words,
            l2: L2Summary::new(total_blocks),
            used_blocks: AtomicU64::new(0),
            heal_count: AtomicU64::new(0),
            read_only: AtomicBool::new(read_only),
            sink,
        }
    }

    #[must_use]
    pub fn used_blocks(&self) -> u64 {
        self.used_blocks.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn heal_count(&self) -> u64 {
        self.heal_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn l2(&self) -> &L2Summary {
        &self.l2
    }

    fn emit(&self, level: LogLevel, event: &'static str, outcome: &'static str, details: String) {
        self.sink.emit(LogRecord {
            decision_id: crate::telemetry::next_decision_id(),
            trace_id: 0,
            level,
            component: "bitmap",
            event,
            outcome,
            details,
        });
    }

    /// Load the word, ECC-heal it in place if needed, and report the
    /// healing-read policy's verdict.
    fn load_healed(&self, word_idx: usize) -> Result<(WordState, bool), Hn4Error> {
        let mut guard = self.words[word_idx].lock();
        let (fixed, status) = ecc_check_and_fix(guard.data, guard.ecc);
        match status {
            EccStatus::Uncorrectable => Err(Hn4Error::BitmapCorrupt),
            EccStatus::Clean => Ok((*guard, false)),
            EccStatus::Corrected => {
                let healed = if self.read_only.load(Ordering::Relaxed) {
                    // Read-only: return the corrected value without persisting.
                    WordState { data: fixed, ecc: ecc_encode(fixed), version: guard.version }
                } else {
                    let healed = guard.bump(fixed);
                    *guard = healed;
                    healed
                };
                self.heal_count.fetch_add(1, Ordering::Relaxed);
                self.emit(LogLevel::Warn, "ecc_heal", "corrected", format!("word_idx={word_idx}"));
                Ok((healed, true))
            }
        }
    }

    /// `test(idx)`.
    pub fn test(&self, idx: u64) -> Result<Outcome<bool>, Hn4Error> {
        let (word_idx, bit) = locate(idx);
        let word = self.words.get(word_idx).ok_or(Hn4Error::AlignmentFail)?;
        let _ = word; // bounds already proven by `get`.
        let (state, healed) = self.load_healed(word_idx)?;
        let value = (state.data >> bit) & 1 == 1;
        let info = if healed { Hn4Info::Healed } else { Hn4Info::Success };
        Ok(Outcome::new(value, info))
    }

    fn rescan_l2_region(&self, idx: u64) {
        let region_start_word = (idx / 64 / 8) * 8; // 8 words = 512 blocks
        let any_set = (0..8).any(|w| {
            self.words
                .get(region_start_word as usize + w)
                .is_some_and(|m| m.lock().data != 0)
        });
        if any_set {
            self.l2.set(idx);
        } else {
            self.l2.clear(idx);
            // Store-load fence then rescan: self-heal a race with a
            // concurrent allocator that set a bit after our scan.
            std::sync::atomic::fence(Ordering::SeqCst);
            let any_set_again = (0..8).any(|w| {
                self.words
                    .get(region_start_word as usize + w)
                    .is_some_and(|m| m.lock().data != 0)
            });
            if any_set_again {
                self.l2.set(idx);
            }
        }
    }

    /// `set(idx)`. Returns `(ok, changed)`.
    pub fn set(&self, idx: u64) -> Result<(bool, bool), Hn4Error> {
        let (word_idx, bit) = locate(idx);
        if word_idx >= self.words.len() {
            return Err(Hn4Error::AlignmentFail);
        }
        let mut guard = self.words[word_idx].lock();
        let (fixed, status) = ecc_check_and_fix(guard.data, guard.ecc);
        if status == EccStatus::Uncorrectable {
            return Err(Hn4Error::BitmapCorrupt);
        }
        let mask = 1u64 << bit;
        if fixed & mask != 0 {
            if status == EccStatus::Corrected {
                *guard = guard.bump(fixed);
            }
            return Ok((true, false));
        }
        let new_data = fixed | mask;
        *guard = guard.bump(new_data);
        drop(guard);
        self.used_blocks.fetch_add(1, Ordering::Relaxed);
        self.l2.set(idx);
        Ok((true, true))
    }

    /// `clear(idx)`. Returns `(ok, changed)`. Does not itself
    /// mark the volume dirty — callers (the allocator's `free_block`, the
    /// write pipeline's eclipse step) decide that per their own context;
    /// this makes `clear` usable both for an ordinary free and for the
    /// genesis probe loop's `BIT_FORCE_CLEAR` release.
    pub fn clear(&self, idx: u64) -> Result<(bool, bool), Hn4Error> {
        let (word_idx, bit) = locate(idx);
        if word_idx >= self.words.len() {
            return Err(Hn4Error::AlignmentFail);
        }
        let mut guard = self.words[word_idx].lock();
        let (fixed, status) = ecc_check_and_fix(guard.data, guard.ecc);
        if status == EccStatus::Uncorrectable {
            return Err(Hn4Error::BitmapCorrupt);
        }
        let mask = 1u64 << bit;
        if fixed & mask == 0 {
            if status == EccStatus::Corrected {
                *guard = guard.bump(fixed);
            }
            return Ok((true, false));
        }
        let new_data = fixed & !mask;
        *guard = guard.bump(new_data);
        drop(guard);
        // Underflow is a bug: log it, do not panic ().
        let prev = self.used_blocks.load(Ordering::Relaxed);
        if prev == 0 {
            self.emit(LogLevel::Error, "used_blocks_underflow", "logged", format!("idx={idx}"));
        } else {
            self.used_blocks.fetch_sub(1, Ordering::Relaxed);
        }
        self.rescan_l2_region(idx);
        Ok((true, true))
    }
}
