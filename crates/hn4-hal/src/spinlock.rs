//! The HAL-provided spinlock (`spinlock_acquire`/`spinlock_release`).
//!
//! Reserved for a PICO-profile bitmap read-modify-write fallback (the
//! non-resident bitmap path is a descoped Open Question — see
//! `DESIGN.md`); the 128-bit bitmap-word CAS fallback every profile
//! currently uses is a per-word `parking_lot::Mutex` owned by the bitmap
//! itself, not this spinlock. Backed by `parking_lot::Mutex`, the same
//! lock used throughout the HAL and core layers.

use parking_lot::{Mutex, MutexGuard};

pub struct HalSpinlock(Mutex<()>);

impl HalSpinlock {
    #[must_use]
    pub const fn new() -> Self {
        Self(Mutex::new(()))
    }

    /// Unbounded spin (cooperative yields allowed), per "Timeouts".
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }
}

impl Default for HalSpinlock {
    fn default() -> Self {
        Self::new()
    }
}
