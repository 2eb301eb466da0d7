//! # hn4
//!
//! Public client crate for HN4, the thinnest layer in the workspace: wires
//! [`hn4_core`] to [`hn4_hal`] and exposes the record-oriented API a caller
//! actually uses — format a device, mount it, create/read/write/delete/
//! snapshot/rename anchors, unmount.
//!
//! Everything else (the Armored Bitmap, the Ballistic Allocator, the write
//! pipeline, the Residency Resolver, the Scavenger) lives in `hn4-core` and
//! is re-exported there for callers who need lower-level access; this
//! crate only adds the superblock and the `Volume` handle around it.

pub mod client;
pub mod superblock;
pub mod volume;

pub use hn4_core::error::{Hn4Error, Hn4Info, Outcome};
pub use hn4_core::types::{Anchor, DataClass, Permissions};
pub use superblock::SuperBlock;
pub use volume::{format_volume, FormatOptions, MountOptions, Volume};
