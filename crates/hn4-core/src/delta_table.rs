//! Zero-lock migration redirect table.
//!
//! Fixed power-of-two open-addressed hash, quadratic probe. Keys entries
//! by `(old_lba, seed_hash)` rather than `old_lba` alone: a lookup only
//! redirects when
//! both match, so a stale or colliding `old_lba` from an unrelated anchor
//! never misdirects a reader.

use std::sync::atomic::{AtomicU64, Ordering};

const SLOT_COUNT: usize = 1024;
const PROBE_LIMIT: usize = 32;

#[derive(Default)]
struct Slot {
    old_lba: AtomicU64,
    new_lba: AtomicU64,
    version: AtomicU64,
    seed_hash: AtomicU64,
}

/// The scavenger's lock-free migration redirect table.
pub struct DeltaTable {
    slots: Vec<Slot>,
}

/// Fold a 128-bit `seed_id` into the 64-bit `seed_hash` a [`DeltaTable`] slot
/// keys on alongside `old_lba`. Shared by every scavenger sub-task that
/// registers or looks up a migration entry so they all hash identity the
/// same way. Hashed with blake3 rather than folded directly so that two
/// `seed_id`s differing in a single bit don't produce neighboring
/// `seed_hash`es in the probe sequence.
#[must_use]
pub fn seed_hash(seed_id: u128) -> u64 {
    let digest = blake3::hash(&seed_id.to_le_bytes());
    let bytes: [u8; 8] = digest.as_bytes()[..8].try_into().unwrap();
    u64::from_le_bytes(bytes)
}

fn hash_index(old_lba: u64) -> usize {
    // Fixed-point multiplicative hash (Fibonacci hashing) into the table.
    let h = old_lba.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (h >> (64 - 10)) as usize // log2(SLOT_COUNT) = 10
}

impl Default for DeltaTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DeltaTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: (0..SLOT_COUNT).map(|_| Slot::default()).collect(),
        }
    }

    /// Register `(old_lba, new_lba, version, seed_hash)`. Returns `false` if
    /// every probed slot was occupied by a different `old_lba` (table full
    /// under contention at this key's neighborhood).
    pub fn register(&self, old_lba: u64, new_lba: u64, version: u64, seed_hash: u64) -> bool {
        debug_assert_ne!(old_lba, 0, "old_lba 0 is the empty-slot sentinel");
        let start = hash_index(old_lba);
        for step in 0..PROBE_LIMIT {
            let idx = (start + step * step) % SLOT_COUNT;
            let slot = &self.slots[idx];
            match slot.old_lba.compare_exchange(0, old_lba, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    slot.new_lba.store(new_lba, Ordering::Release);
                    slot.version.store(version, Ordering::Release);
                    slot.seed_hash.store(seed_hash, Ordering::Release);
                    return true;
                }
                Err(existing) if existing == old_lba => {
                    // Already registered (retry path); refresh the payload.
                    slot.new_lba.store(new_lba, Ordering::Release);
                    slot.version.store(version, Ordering::Release);
                    slot.seed_hash.store(seed_hash, Ordering::Release);
                    return true;
                }
                Err(_) => continue,
            }
        }
        false
    }

    /// Probe for `old_lba`; on a match of both `old_lba` and `seed_hash`,
    /// check `version` against `expected_version` and return `new_lba` iff
    /// it matches. Any mismatch returns `0`.
    #[must_use]
    pub fn lookup(&self, old_lba: u64, seed_hash: u64, expected_version: u64) -> u64 {
        let start = hash_index(old_lba);
        for step in 0..PROBE_LIMIT {
            let idx = (start + step * step) % SLOT_COUNT;
            let slot = &self.slots[idx];
            let slot_old = slot.old_lba.load(Ordering::Acquire);
            if slot_old == 0 {
                return 0;
            }
            if slot_old == old_lba && slot.seed_hash.load(Ordering::Acquire) == seed_hash {
                return if slot.version.load(Ordering::Acquire) == expected_version {
                    slot.new_lba.load(Ordering::Acquire)
                } else {
                    0
                };
            }
        }
        0
    }

    /// Clear the entry for `(old_lba, seed_hash)` on migration commit or
    /// rollback. Clears the key before the payload so a concurrent reader
    /// observes "no redirect" strictly before payload garbage.
    pub fn clear(&self, old_lba: u64, seed_hash: u64) {
        let start = hash_index(old_lba);
        for step in 0..PROBE_LIMIT {
            let idx = (start + step * step) % SLOT_COUNT;
            let slot = &self.slots[idx];
            let slot_old = slot.old_lba.load(Ordering::Acquire);
            if slot_old == 0 {
                return;
            }
            if slot_old == old_lba && slot.seed_hash.load(Ordering::Acquire) == seed_hash {
                slot.old_lba.store(0, Ordering::Release);
                slot.new_lba.store(0, Ordering::Relaxed);
                slot.version.store(0, Ordering::Relaxed);
                slot.seed_hash.store(0, Ordering::Relaxed);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_round_trips() {
        let dt = DeltaTable::new();
        assert!(dt.register(100, 200, 7, 0xABCD));
        assert_eq!(dt.lookup(100, 0xABCD, 7), 200);
    }

    #[test]
    fn version_mismatch_yields_zero() {
        let dt = DeltaTable::new();
        dt.register(100, 200, 7, 0xABCD);
        assert_eq!(dt.lookup(100, 0xABCD, 8), 0);
    }

    #[test]
    fn seed_hash_mismatch_yields_zero() {
        let dt = DeltaTable::new();
        dt.register(100, 200, 7, 0xABCD);
        assert_eq!(dt.lookup(100, 0xFFFF, 7), 0);
    }

    #[test]
    fn lookup_after_clear_returns_zero() {
        let dt = DeltaTable::new();
        dt.register(100, 200, 7, 0xABCD);
        dt.clear(100, 0xABCD);
        assert_eq!(dt.lookup(100, 0xABCD, 7), 0);
    }

    #[test]
    fn unregistered_key_returns_zero() {
        let dt = DeltaTable::new();
        assert_eq!(dt.lookup(999, 0, 0), 0);
    }

    #[test]
    fn distinct_keys_coexist() {
        let dt = DeltaTable::new();
        assert!(dt.register(1, 10, 1, 0x1));
        assert!(dt.register(2, 20, 1, 0x2));
        assert_eq!(dt.lookup(1, 0x1, 1), 10);
        assert_eq!(dt.lookup(2, 0x2, 1), 20);
    }
}
