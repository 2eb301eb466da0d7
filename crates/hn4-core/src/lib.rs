//! # hn4-core
//!
//! The core I/O engine of HN4: the Armored Bitmap, the Ballistic
//! Allocator, the Atomic Write Pipeline (internally, the "Shadow Hop"), the
//! Residency Resolver, and the Scavenger — plus the Cortex anchor table and
//! Volume Context every one of them shares.
//!
//! Everything outside this crate's scope (the HAL's production backends,
//! CRC32C/ECC primitives beyond the bitmap's own SEC-DED, the TCC
//! compression codec, benchmarking, CLI glue, telemetry sinks, the
//! Chronicle audit log, epoch ring rotation, format/mount bootstrap) is
//! referenced only through the trait boundaries this crate defines
//! ([`hn4_hal::BlockHal`], [`codec::CompressionCodec`], [`telemetry::LogSink`]).

pub mod allocator;
pub mod bitmap;
pub mod codec;
pub mod cortex;
pub mod crc;
pub mod delta_table;
pub mod error;
pub mod geometry;
pub mod placement;
pub mod policy;
pub mod resolver;
pub mod scavenger;
pub mod telemetry;
pub mod types;
pub mod write_pipeline;

pub use cortex::{Cortex, VolumeContext};
pub use error::{Hn4Error, Hn4Info, Outcome};
pub use geometry::VolumeGeometry;
pub use types::{Anchor, BlockHeader, DataClass, Permissions};
