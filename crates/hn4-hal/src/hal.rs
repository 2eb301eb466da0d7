//! The `BlockHal` contract.

use crate::caps::HalCaps;
use crate::error::HalError;
use crate::io::{IoCompletion, IoOp, IoOutcome, IoRequest, IoToken};
use crate::spinlock::HalSpinlock;

/// Everything HN4's core I/O engine requires from the hardware layer.
///
/// Production implementations (real block devices, `io_uring`, a PICO
/// sector-RMW backend) are external collaborators per; only
/// [`crate::InMemoryHal`] is implemented in this crate, as the reference
/// backend tests and fixtures drive.
pub trait BlockHal: Send + Sync {
    /// Synchronous single-op I/O. May block.
    fn sync_io(&self, op: IoOp, lba: u64, buf: &mut [u8], sectors: u32) -> Result<IoOutcome, HalError>;

    /// Queue an asynchronous I/O. Completion is observed via [`Self::poll`].
    fn submit_io(&self, req: IoRequest) -> Result<IoToken, HalError>;

    /// Drain completed asynchronous I/Os without blocking.
    fn poll(&self) -> Vec<IoCompletion>;

    /// Durability barrier. Required before Phase 10 of the write pipeline
    /// unless the device/profile combination in Phase 9 applies.
    fn barrier(&self) -> Result<(), HalError>;

    /// Monotonic wall-clock time in nanoseconds.
    fn get_time_ns(&self) -> u64;

    /// Uniform random 64-bit value. Cryptographic strength not required
    ///.
    fn get_random_u64(&self) -> u64;

    /// The process-wide spinlock used by the PICO bitmap fallback and the
    /// 128-bit CAS fallback.
    fn spinlock(&self) -> &HalSpinlock;

    /// Cooperative sleep, used between scavenger IOs.
    fn micro_sleep(&self, us: u64);

    fn get_caps(&self) -> HalCaps;

    /// `0xFFFF_FFFF` if no GPU is associated with the calling context.
    fn get_calling_gpu_id(&self) -> u32 {
        0xFFFF_FFFF
    }
}
