//! HAL-level error taxonomy.
//!
//! Kept deliberately small: the HAL only needs to distinguish the handful of
//! failure shapes `hn4-core` reacts to differently (timeout vs. hard I/O
//! failure vs. capability mismatch). `hn4-core` maps these into the full
//! `Hn4Error` taxonomy at the call boundary.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HalError {
    /// The underlying device reported a hardware I/O failure.
    #[error("hardware I/O failure")]
    Io,
    /// The operation did not complete within its deadline (ZNS append 30s,
    /// or a write-retry policy's bound).
    #[error("operation timed out")]
    Timeout,
    /// `lba`/`sectors` fell outside the device's addressable range.
    #[error("out of range")]
    OutOfRange,
    /// The device does not support the requested operation (e.g.
    /// `ZONE_APPEND` on a non-ZNS device).
    #[error("operation not supported by this device")]
    Unsupported,
    /// The device queue is saturated; caller should back off.
    #[error("device queue full")]
    QueueFull,
}
