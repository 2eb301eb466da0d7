//! On-media and in-RAM data model.

pub mod anchor;
pub mod block;
pub mod magic;

pub use anchor::{Anchor, DataClass, Permissions};
pub use block::{BlockHeader, BLOCK_HEADER_SIZE};
