//! Cortex (in-RAM anchor table) and the per-volume context that owns every
//! shared structure the allocator, resolver, write pipeline, and scavenger
//! touch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::bitmap::quality_mask::QualityMask;
use crate::bitmap::ArmoredBitmap;
use crate::delta_table::DeltaTable;
use crate::error::{Hn4Error, Outcome};
use crate::telemetry::{LogLevel, LogRecord, LogSink};
use crate::types::Anchor;

/// On-media address of an anchor slot, modeled as `(cortex_base_lba,
/// index)` rather than a raw pointer subtraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorSector {
    pub lba: u64,
}

/// In-RAM anchor table, keyed by `seed_id`.
#[derive(Default)]
pub struct Cortex {
    by_seed_id: RwLock<HashMap<u128, (u64, Anchor)>>,
}

impl Cortex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, seed_id: u128) -> Option<Anchor> {
        self.by_seed_id.read().get(&seed_id).map(|(_, a)| *a)
    }

    #[must_use]
    pub fn index_of(&self, seed_id: u128) -> Option<u64> {
        self.by_seed_id.read().get(&seed_id).map(|(idx, _)| *idx)
    }

    pub fn insert(&self, index: u64, anchor: Anchor) {
        self.by_seed_id.write().insert(anchor.seed_id(), (index, anchor));
    }

    /// Replace the RAM copy only if `write_gen` has not advanced past
    /// `expected_gen` since the caller snapshotted it: the commit half of
    /// every snapshot-then-rewrite pattern in this crate.
    pub fn replace_if_generation_unchanged(&self, seed_id: u128, expected_gen: u32, new: Anchor) -> bool {
        let mut table = self.by_seed_id.write();
        match table.get(&seed_id) {
            Some((idx, current)) if current.write_gen == expected_gen => {
                let idx = *idx;
                table.insert(seed_id, (idx, new));
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, seed_id: u128) {
        self.by_seed_id.write().remove(&seed_id);
    }

    /// Iterate a bounded window of `count` anchors starting at `cursor`,
    /// wrapping, for a scavenger sub-task's sliding scan.
    #[must_use]
    pub fn window(&self, cursor: usize, count: usize) -> Vec<(u128, Anchor)> {
        let table = self.by_seed_id.read();
        let all: Vec<_> = table.iter().map(|(k, (_, a))| (*k, *a)).collect();
        if all.is_empty() {
            return Vec::new();
        }
        let len = all.len();
        (0..count.min(len))
            .map(|i| all[(cursor + i) % len].clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_seed_id.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A candidate enqueued by the Medic for osteoplasty.
#[derive(Debug, Clone, Copy)]
pub struct MedicCandidate {
    pub seed_id: u128,
    pub bone_density: u32,
}

/// Bounded priority queue of medic candidates, guarded by its own mutex.
pub struct MedicQueue {
    capacity: usize,
    items: Mutex<Vec<MedicCandidate>>,
}

impl MedicQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, items: Mutex::new(Vec::with_capacity(capacity)) }
    }

    /// Insert, keeping only the `capacity` highest-`bone_density` entries.
    pub fn push(&self, candidate: MedicCandidate) {
        let mut items = self.items.lock();
        items.push(candidate);
        items.sort_unstable_by(|a, b| b.bone_density.cmp(&a.bone_density));
        items.truncate(self.capacity);
    }

    pub fn drain_top(&self, n: usize) -> Vec<MedicCandidate> {
        let mut items = self.items.lock();
        let take = n.min(items.len());
        items.drain(..take).collect()
    }
}

/// Process-wide (per mounted volume) shared state. Created at mount, destroyed at unmount; exactly one mount per
/// device.
pub struct VolumeContext {
    pub bitmap: ArmoredBitmap,
    pub quality: QualityMask,
    pub cortex: Cortex,
    pub delta_table: DeltaTable,
    pub medic_queue: MedicQueue,

    pub horizon_write_head: AtomicU64,
    pub crc_failures: AtomicU64,
    pub trajectory_collapse_counter: AtomicU32,
    pub taint: AtomicU32,
    panic: AtomicBool,
    dirty: AtomicBool,
    saturated: AtomicBool,
    unmounting: AtomicBool,
    pub scavenger_cursor: AtomicU64,
    /// Medic's own sliding scan cursor over the Cortex, independent of the
    /// Reaper's: bone-density sampling walks anchors on its own schedule,
    /// gated separately by `trajectory_collapse_counter`.
    pub medic_scan_cursor: AtomicU64,
    /// Stitcher's sliding scan cursor.
    pub stitcher_cursor: AtomicU64,
    /// Auditor's rolling-window cursor, in window units (1 GB each) rather
    /// than anchors.
    pub auditor_cursor: AtomicU64,
    /// Evacuator's round-robin victim-zone cursor.
    pub evacuator_cursor: AtomicU64,
    /// Pulse counter driving the "every 100 pulses" Evacuator/Auditor cadence
    /// and the Medic's wake check.
    pub pulse_count: AtomicU64,

    /// The single per-volume spinlock: anchor RAM-copy swaps
    /// during scavenger commit, L2 updates on system-profile volumes, and
    /// the PICO bitmap RMW fallback all serialize through this.
    pub l2_lock: Mutex<()>,

    sink: std::sync::Arc<dyn LogSink>,
}

/// Taint threshold above which a soft violation escalates to PANIC.
pub const TAINT_PANIC_THRESHOLD: u32 = 20;

/// Medic wake threshold for `trajectory_collapse_counter`.
pub const COLLAPSE_WAKE_THRESHOLD: u32 = 50;

impl VolumeContext {
    #[must_use]
    pub fn new(total_blocks: u64, read_only: bool, sink: std::sync::Arc<dyn LogSink>) -> Self {
        Self {
            bitmap: ArmoredBitmap::new(total_blocks, read_only, sink.clone()),
            quality: QualityMask::new(total_blocks),
            cortex: Cortex::new(),
            delta_table: DeltaTable::new(),
            medic_queue: MedicQueue::new(16),
            horizon_write_head: AtomicU64::new(0),
            crc_failures: AtomicU64::new(0),
            trajectory_collapse_counter: AtomicU32::new(0),
            taint: AtomicU32::new(0),
            panic: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            saturated: AtomicBool::new(false),
            unmounting: AtomicBool::new(false),
            scavenger_cursor: AtomicU64::new(0),
            medic_scan_cursor: AtomicU64::new(0),
            stitcher_cursor: AtomicU64::new(0),
            auditor_cursor: AtomicU64::new(0),
            evacuator_cursor: AtomicU64::new(0),
            pulse_count: AtomicU64::new(0),
            l2_lock: Mutex::new(()),
            sink,
        }
    }

    /// Request the scavenger stop at its next loop boundary. The scavenger
    /// drains its current pulse and exits; this never aborts an in-flight
    /// sub-task mid-pulse.
    pub fn request_unmount(&self) {
        self.unmounting.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_unmounting(&self) -> bool {
        self.unmounting.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_panicked(&self) -> bool {
        self.panic.load(Ordering::Acquire)
    }

    pub fn raise_panic(&self, reason: &'static str) {
        self.panic.store(true, Ordering::Release);
        self.mark_dirty();
        self.sink.emit(LogRecord {
            decision_id: crate::telemetry::next_decision_id(),
            trace_id: 0,
            level: LogLevel::Error,
            component: "volume",
            event: "panic",
            outcome: reason,
            details: String::new(),
        });
    }

    /// `bitmap.test`, escalating a DED (`BitmapCorrupt`) to volume PANIC
    /// before propagating it, so a double-bit ECC error blocks subsequent
    /// writes instead of surfacing as an ordinary error to the caller.
    pub fn bitmap_test(&self, idx: u64) -> Result<Outcome<bool>, Hn4Error> {
        self.bitmap.test(idx).inspect_err(|e| self.panic_on_bitmap_corrupt(*e))
    }

    /// `bitmap.set`, escalating a DED to volume PANIC; see [`Self::bitmap_test`].
    pub fn bitmap_set(&self, idx: u64) -> Result<(bool, bool), Hn4Error> {
        self.bitmap.set(idx).inspect_err(|e| self.panic_on_bitmap_corrupt(*e))
    }

    /// `bitmap.clear`, escalating a DED to volume PANIC; see [`Self::bitmap_test`].
    pub fn bitmap_clear(&self, idx: u64) -> Result<(bool, bool), Hn4Error> {
        self.bitmap.clear(idx).inspect_err(|e| self.panic_on_bitmap_corrupt(*e))
    }

    fn panic_on_bitmap_corrupt(&self, e: Hn4Error) {
        if e == Hn4Error::BitmapCorrupt {
            self.raise_panic("bitmap_ecc_ded");
        }
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Record a soft violation; escalate to PANIC past the threshold.
    pub fn taint(&self, reason: &'static str) {
        self.mark_dirty();
        let prev = self.taint.fetch_add(1, Ordering::AcqRel);
        if prev + 1 > TAINT_PANIC_THRESHOLD {
            self.raise_panic(reason);
        }
    }

    /// Recompute the saturation flag with hysteresis: set on
    /// `used >= 90%` usable capacity, cleared on `used < 85%`; "usable" is
    /// raw capacity minus 5% overhead. `total_blocks` is the raw device
    /// capacity in blocks; all arithmetic is widened to avoid overflow at
    /// exabyte scale.
    #[must_use]
    pub fn refresh_saturation(&self, total_blocks: u64) -> bool {
        let usable = (u128::from(total_blocks) * 95) / 100;
        let used = u128::from(self.bitmap.used_blocks());
        if used * 100 >= usable * 90 {
            self.saturated.store(true, Ordering::Release);
        } else if used * 100 < usable * 85 {
            self.saturated.store(false, Ordering::Release);
        }
        self.saturated.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.saturated.load(Ordering::Acquire)
    }

    /// Updates (per-block allocation of an existing file) are refused above
    /// a hard 95% wall regardless of hysteresis.
    #[must_use]
    pub fn updates_refused(&self, total_blocks: u64) -> bool {
        let usable = (u128::from(total_blocks) * 95) / 100;
        let used = u128::from(self.bitmap.used_blocks());
        used * 100 >= usable * 95
    }

    /// Refuse any write-path entry when the volume is panicked.
    pub fn check_not_panicked(&self) -> Result<(), Hn4Error> {
        if self.is_panicked() {
            Err(Hn4Error::VolumeLocked)
        } else {
            Ok(())
        }
    }

    /// Emit one structured lifecycle record through the volume's sink.
    /// Shared by every scavenger sub-task so each gets `"scavenger:<name>"`
    /// component tagging without holding its own `Arc<dyn LogSink>`.
    pub fn log(&self, level: LogLevel, component: &'static str, event: &'static str, outcome: &'static str, details: String) {
        self.sink.emit(LogRecord {
            decision_id: crate::telemetry::next_decision_id(),
            trace_id: 0,
            level,
            component,
            event,
            outcome,
            details,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NullSink;

    #[test]
    fn cortex_insert_and_get() {
        let cortex = Cortex::new();
        let a = Anchor::new(42, 0, 1, 0, 0);
        cortex.insert(0, a);
        assert_eq!(cortex.get(42), Some(a));
    }

    #[test]
    fn replace_refuses_on_generation_mismatch() {
        let cortex = Cortex::new();
        let a = Anchor::new(1, 0, 1, 0, 0);
        cortex.insert(0, a);
        let mut newer = a;
        newer.write_gen = 9;
        assert!(!cortex.replace_if_generation_unchanged(1, 999, newer));
        assert!(cortex.replace_if_generation_unchanged(1, a.write_gen, newer));
        assert_eq!(cortex.get(1).unwrap().write_gen, 9);
    }

    #[test]
    fn medic_queue_keeps_top_n() {
        let q = MedicQueue::new(2);
        q.push(MedicCandidate { seed_id: 1, bone_density: 5 });
        q.push(MedicCandidate { seed_id: 2, bone_density: 9 });
        q.push(MedicCandidate { seed_id: 3, bone_density: 1 });
        let drained = q.drain_top(10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].seed_id, 2);
    }

    #[test]
    fn taint_escalates_to_panic_past_threshold() {
        let ctx = VolumeContext::new(1024, false, std::sync::Arc::new(NullSink));
        for _ in 0..TAINT_PANIC_THRESHOLD {
            ctx.taint("test");
        }
        assert!(!ctx.is_panicked());
        ctx.taint("test");
        assert!(ctx.is_panicked());
    }

    #[test]
    fn saturation_has_hysteresis() {
        let ctx = VolumeContext::new(1000, false, std::sync::Arc::new(NullSink));
        for i in 0..920 {
            ctx.bitmap.set(i).unwrap();
        }
        assert!(ctx.refresh_saturation(1000));
        for i in 900..920 {
            ctx.bitmap.clear(i).unwrap();
        }
        // Still above the 85% clear threshold, so it stays set.
        assert!(ctx.refresh_saturation(1000));
        for i in 800..900 {
            ctx.bitmap.clear(i).unwrap();
        }
        assert!(!ctx.refresh_saturation(1000));
    }
}
