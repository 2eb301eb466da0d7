//! # hn4-hal
//!
//! Hardware abstraction layer boundary for HN4.
//!
//! HN4's core I/O engine (armored bitmap, ballistic allocator, atomic write
//! pipeline, residency resolver, scavenger — see `hn4-core`) never touches a
//! device directly. It calls through [`BlockHal`]. Production backends
//! (a real NVMe/ZNS driver, `io_uring` submission, a PICO sector-RMW spinlock
//! device) are external collaborators and are not implemented here; this
//! crate only defines the contract and ships [`InMemoryHal`], a reference
//! backend used by tests, fixtures, the harness, and the fuzz targets.
//!
//! # Architecture
//!
//! ```text
//! hn4-core (placement, allocator, write pipeline, resolver, scavenger)
//!     -> BlockHal (this crate's trait)
//!     -> production backend (external) | InMemoryHal (this crate, for tests)
//! ```

pub mod caps;
pub mod error;
pub mod hal;
pub mod in_memory;
pub mod io;
pub mod spinlock;

pub use caps::{DeviceClass, HalCaps, HwFlags, Profile};
pub use error::HalError;
pub use hal::BlockHal;
pub use in_memory::InMemoryHal;
pub use io::{IoCompletion, IoOp, IoOutcome, IoRequest, IoToken};
pub use spinlock::HalSpinlock;
