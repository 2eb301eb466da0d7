//! The HN4 result taxonomy.
//!
//! Every operation in `hn4-core` returns `Result<T, Hn4Error>` (or, for
//! operations that also have a positive informational outcome worth
//! surfacing, `Result<Hn4Info, Hn4Error>` via [`Outcome`]). Nothing in this
//! crate panics or uses `unwrap`/`expect` outside `#[cfg(test)]` — recovery
//! is local for retryable conditions and a terminal variant is returned for
//! everything else.

use thiserror::Error;

/// Positive, informational outcomes.
/// These are not errors; they ride along with a successful `Result::Ok` via
/// [`Outcome`] so callers that care (tests, the harness, telemetry) can
/// observe *how* an operation succeeded without every caller needing to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hn4Info {
    #[default]
    Success,
    Pending,
    Healed,
    Sparse,
    HorizonFallback,
    Thawed,
}

/// A successful result paired with its informational flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub info: Hn4Info,
}

impl<T> Outcome<T> {
    #[must_use]
    pub const fn new(value: T, info: Hn4Info) -> Self {
        Self { value, info }
    }

    #[must_use]
    pub const fn ok(value: T) -> Self {
        Self::new(value, Hn4Info::Success)
    }
}

/// The full negative taxonomy. One kind, one enumerator — never
/// raised as control flow, always returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Hn4Error {
    // --- Allocation family ---
    #[error("no space left on volume")]
    Enospc,
    #[error("event horizon (overflow ring) is full")]
    EventHorizon,
    #[error("allocator could not place the block (gravity collapse)")]
    GravityCollapse,
    #[error("armored bitmap word is corrupt beyond ECC correction")]
    BitmapCorrupt,
    #[error("placement/alignment computation failed")]
    AlignmentFail,
    #[error("atomic operation (CAS) timed out under contention")]
    AtomicsTimeout,
    #[error("ZNS zone is full")]
    ZoneFull,

    // --- Identity family ---
    #[error("anchor not found")]
    NotFound,
    #[error("anchor is tombstoned")]
    Tombstone,
    #[error("identity mismatch (seed_id/public_id)")]
    IdMismatch,

    // --- Access family ---
    #[error("access denied")]
    AccessDenied,
    #[error("anchor is immutable")]
    Immutable,

    // --- Integrity family ---
    #[error("hardware I/O failure")]
    HwIo,
    #[error("data rot: block failed identity/content verification")]
    DataRot,
    #[error("header rot: block header CRC mismatch")]
    HeaderRot,
    #[error("payload rot: block payload CRC mismatch")]
    PayloadRot,
    #[error("parity broken (double-bit ECC, uncorrectable)")]
    ParityBroken,
    #[error("phantom block: bitmap claims occupancy but block does not verify")]
    PhantomBlock,
    #[error("decompression failed")]
    DecompressFail,
    #[error("media region marked toxic")]
    MediaToxic,

    // --- Time family ---
    #[error("generation skew detected during migration")]
    GenerationSkew,

    // --- System family ---
    #[error("superblock is invalid or unrecognized")]
    BadSuperblock,
    #[error("out of memory")]
    Nomem,
    #[error("operation not valid for this device/profile combination")]
    ProfileMismatch,
    #[error("endianness mismatch")]
    EndianMismatch,
    #[error("internal invariant violated")]
    InternalFault,
    #[error("geometry violation (e.g. mid-file ZNS drift)")]
    Geometry,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("volume context is uninitialized")]
    Uninitialized,
    #[error("entity already exists")]
    Eexist,
    #[error("compression did not reduce payload size")]
    CompressionIneffective,

    // --- Volume-wide lock ---
    #[error("volume is locked (PANIC flag set)")]
    VolumeLocked,
}

impl From<hn4_hal::HalError> for Hn4Error {
    fn from(e: hn4_hal::HalError) -> Self {
        match e {
            hn4_hal::HalError::Io => Self::HwIo,
            hn4_hal::HalError::Timeout => Self::AtomicsTimeout,
            hn4_hal::HalError::OutOfRange => Self::Geometry,
            hn4_hal::HalError::Unsupported => Self::ProfileMismatch,
            hn4_hal::HalError::QueueFull => Self::AtomicsTimeout,
        }
    }
}
