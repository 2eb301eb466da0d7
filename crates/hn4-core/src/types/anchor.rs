//! The anchor: a file's 128-byte identity record.

use crate::crc::crc32c;

bitflags::bitflags! {
    /// `data_class`: lower 8 bits are type/volatility, upper bits
    /// carry the flags named in this design.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DataClass: u64 {
        const VALID           = 1 << 8;
        const TOMBSTONE       = 1 << 9;
        const PINNED          = 1 << 10;
        const ROT             = 1 << 11;
        const NANO            = 1 << 12;
        const HINT_HORIZON    = 1 << 13;
        const HINT_STREAM     = 1 << 14;
        const HINT_COMPRESSED = 1 << 15;
        const HINT_ENCRYPTED  = 1 << 16;
        const FLAG_SHRED      = 1 << 17;
        const FLAG_SEQUENTIAL = 1 << 18;
    }
}

impl DataClass {
    const TYPE_MASK: u64 = 0xFF;

    /// `type_tag` value for an anchor carrying filesystem/volume metadata
    /// rather than user payload (e.g. a directory-equivalent or Cortex
    /// auxiliary record), distinct from the default `0` user-data tag.
    pub const TYPE_METADATA: u8 = 1;

    #[must_use]
    pub const fn type_tag(self) -> u8 {
        (self.bits() & Self::TYPE_MASK) as u8
    }

    #[must_use]
    pub const fn is_metadata(self) -> bool {
        self.type_tag() == Self::TYPE_METADATA
    }

    #[must_use]
    pub fn with_type_tag(self, tag: u8) -> Self {
        Self::from_bits_retain((self.bits() & !Self::TYPE_MASK) | u64::from(tag))
    }
}

bitflags::bitflags! {
    /// `permissions`: 32-bit capability mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Permissions: u32 {
        const READ      = 1 << 0;
        const WRITE     = 1 << 1;
        const EXEC      = 1 << 2;
        const APPEND    = 1 << 3;
        const IMMUTABLE = 1 << 4;
        const SOVEREIGN = 1 << 5;
        const ENCRYPTED = 1 << 6;
    }
}

/// Fixed 128-byte on-media identity record for one file.
///
/// `seed_id` is set at creation and never changes; `orbit_vector` is always
/// coerced odd at construction. These two invariants hold for every `Anchor`
/// value that this module hands out — see [`Anchor::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    seed_id: u128,
    pub public_id: u128,
    pub gravity_center: u64,
    /// Stored pre-masked to 48 bits and forced odd; see [`Self::orbit_vector`].
    orbit_vector: u64,
    pub fractal_scale: u8,
    pub mass: u64,
    pub data_class: DataClass,
    pub permissions: Permissions,
    pub write_gen: u32,
    pub mod_clock: u64,
    pub create_clock: u64,
    /// Records the collision shell `k` a recent shadow allocation landed on,
    /// one nibble per chunk of logical blocks (Phase 5: "Record
    /// `k` into a 32-bit `orbit_hints` field... if `k <= 3` and chunk index
    /// fits"). An advisory hint for the Medic's bone-density sampling, not
    /// load-bearing for correctness.
    pub orbit_hints: u32,
}

/// On-media size of one anchor record.
pub const ANCHOR_SIZE: usize = 128;

/// Mask for the 48-bit orbit vector.
const ORBIT_VECTOR_MASK: u64 = (1u64 << 48) - 1;

impl Anchor {
    #[must_use]
    pub fn new(
        seed_id: u128,
        gravity_center: u64,
        orbit_vector: u64,
        fractal_scale: u8,
        create_clock: u64,
    ) -> Self {
        Self {
            seed_id,
            public_id: seed_id,
            gravity_center,
            orbit_vector: (orbit_vector & ORBIT_VECTOR_MASK) | 1,
            fractal_scale: fractal_scale.min(16),
            mass: 0,
            data_class: DataClass::VALID,
            permissions: Permissions::READ | Permissions::WRITE,
            write_gen: 1,
            mod_clock: create_clock,
            create_clock,
            orbit_hints: 0,
        }
    }

    #[must_use]
    pub const fn seed_id(&self) -> u128 {
        self.seed_id
    }

    #[must_use]
    pub const fn orbit_vector(&self) -> u64 {
        self.orbit_vector
    }

    /// Replace the orbit vector, re-enforcing the odd/48-bit invariant.
    /// Used by the Medic's osteoplasty.
    pub fn set_orbit_vector(&mut self, v: u64) {
        self.orbit_vector = (v & ORBIT_VECTOR_MASK) | 1;
    }

    /// Advance `write_gen` by one, wrapping `UINT32_MAX -> 1` (never `0`,
    /// which is reserved for "no generation committed yet").
    #[must_use]
    pub fn next_generation(&self) -> u32 {
        if self.write_gen == u32::MAX {
            1
        } else {
            self.write_gen + 1
        }
    }

    #[must_use]
    pub const fn quantum(&self) -> u64 {
        1u64 << self.fractal_scale
    }

    /// "Bleach" the anchor for reaper reclamation: zero mass
    /// and physics, keep identity and `write_gen`, set
    /// `TOMBSTONE | VALID`.
    #[must_use]
    pub fn bleached(&self) -> Self {
        Self {
            seed_id: self.seed_id,
            public_id: self.public_id,
            gravity_center: 0,
            orbit_vector: 1,
            fractal_scale: 0,
            mass: 0,
            data_class: DataClass::TOMBSTONE | DataClass::VALID,
            permissions: self.permissions,
            write_gen: self.write_gen,
            mod_clock: self.mod_clock,
            create_clock: self.create_clock,
            orbit_hints: 0,
        }
    }

    /// Serialize to the 128-byte on-media layout, little-endian, with a
    /// trailing CRC32C over bytes `[0, ANCHOR_SIZE-4)`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ANCHOR_SIZE] {
        let mut buf = [0u8; ANCHOR_SIZE];
        let mut w = 0usize;
        macro_rules! put {
            ($bytes:expr) => {{
                let b = $bytes;
                buf[w..w + b.len()].copy_from_slice(&b);
                w += b.len();
            }};
        }
        put!(self.seed_id.to_le_bytes());
        put!(self.public_id.to_le_bytes());
        put!(self.gravity_center.to_le_bytes());
        put!(self.orbit_vector.to_le_bytes());
        put!([self.fractal_scale]);
        put!(self.mass.to_le_bytes());
        put!(self.data_class.bits().to_le_bytes());
        put!(self.permissions.bits().to_le_bytes());
        put!(self.write_gen.to_le_bytes());
        put!(self.mod_clock.to_le_bytes());
        put!(self.create_clock.to_le_bytes());
        put!(self.orbit_hints.to_le_bytes());
        let checksum = crc32c(&buf[..ANCHOR_SIZE - 4]);
        buf[ANCHOR_SIZE - 4..].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Parse from the on-media layout, verifying the trailing CRC32C.
    pub fn from_bytes(buf: &[u8; ANCHOR_SIZE]) -> Result<Self, crate::error::Hn4Error> {
        let expected = crc32c(&buf[..ANCHOR_SIZE - 4]);
        let stored = u32::from_le_bytes(buf[ANCHOR_SIZE - 4..].try_into().unwrap());
        if expected != stored {
            return Err(crate::error::Hn4Error::HeaderRot);
        }
        let mut r = 0usize;
        macro_rules! take {
            ($ty:ty) => {{
                const N: usize = std::mem::size_of::<$ty>();
                let v = <$ty>::from_le_bytes(buf[r..r + N].try_into().unwrap());
                r += N;
                v
            }};
        }
        let seed_id = take!(u128);
        let public_id = take!(u128);
        let gravity_center = take!(u64);
        let orbit_vector = take!(u64);
        let fractal_scale = buf[r];
        r += 1;
        let mass = take!(u64);
        let data_class = DataClass::from_bits_retain(take!(u64));
        let permissions = Permissions::from_bits_retain(take!(u32));
        let write_gen = take!(u32);
        let mod_clock = take!(u64);
        let create_clock = take!(u64);
        let orbit_hints = take!(u32);
        Ok(Self {
            seed_id,
            public_id,
            gravity_center,
            orbit_vector: (orbit_vector & ORBIT_VECTOR_MASK) | 1,
            fractal_scale,
            mass,
            data_class,
            permissions,
            write_gen,
            mod_clock,
            create_clock,
            orbit_hints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbit_vector_is_always_odd() {
        let a = Anchor::new(1, 100, 16, 0, 0);
        assert_eq!(a.orbit_vector() & 1, 1);
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut a = Anchor::new(0xDEAD_BEEF, 42, 17, 3, 1000);
        a.mass = 4096;
        a.write_gen = 7;
        let bytes = a.to_bytes();
        let back = Anchor::from_bytes(&bytes).unwrap();
        assert_eq!(a, back);
    }

    #[test]
    fn corrupt_checksum_is_rejected() {
        let a = Anchor::new(1, 1, 1, 0, 0);
        let mut bytes = a.to_bytes();
        bytes[0] ^= 0xFF;
        assert!(Anchor::from_bytes(&bytes).is_err());
    }

    #[test]
    fn generation_wraps_to_one_never_zero() {
        let mut a = Anchor::new(1, 1, 1, 0, 0);
        a.write_gen = u32::MAX;
        assert_eq!(a.next_generation(), 1);
    }

    #[test]
    fn bleached_anchor_preserves_identity_and_generation() {
        let mut a = Anchor::new(7, 10, 3, 2, 0);
        a.mass = 99;
        a.write_gen = 5;
        let b = a.bleached();
        assert_eq!(b.seed_id(), a.seed_id());
        assert_eq!(b.write_gen, a.write_gen);
        assert_eq!(b.mass, 0);
        assert!(b.data_class.contains(DataClass::TOMBSTONE | DataClass::VALID));
    }
}
