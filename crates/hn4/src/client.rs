//! Anchor-level record API. Mount/unmount live
//! in [`crate::volume`]; this module is everything a caller does once
//! mounted.

use hn4_core::allocator::{self, AllocIntent};
use hn4_core::codec::NullCodec;
use hn4_core::error::Hn4Error;
use hn4_core::resolver;
use hn4_core::types::{Anchor, DataClass, Permissions};

use crate::volume::Volume;

impl Volume {
    /// Create a new anchor and run Genesis to place it.
    /// Fails with [`Hn4Error::Eexist`] if `seed_id` is already live.
    pub fn create(&self, seed_id: u128, fractal_scale: u8, permissions: Permissions) -> Result<Anchor, Hn4Error> {
        self.ctx.check_not_panicked()?;
        if self.ctx.cortex.get(seed_id).is_some() {
            return Err(Hn4Error::Eexist);
        }

        let mut last_g = self.last_alloc_g.lock();
        let (g, v) = allocator::genesis(&self.ctx, self.hal.as_ref(), &self.geometry, fractal_scale, AllocIntent::Normal, *last_g)?;
        *last_g = Some(g);
        drop(last_g);

        let now = self.hal.get_time_ns();
        let mut anchor = Anchor::new(seed_id, g, v, fractal_scale, now);
        anchor.permissions = permissions;
        self.ctx.cortex.insert(0, anchor);
        Ok(anchor)
    }

    /// Write `data` starting at the block-aligned logical `offset`,
    /// chunked into `geometry.block_size`-sized calls through the write
    /// pipeline. `anchor` is updated in place on success, same
    /// as [`hn4_core::write_pipeline::write`].
    pub fn write(&self, anchor: &mut Anchor, offset: u64, data: &[u8]) -> Result<(), Hn4Error> {
        self.ctx.check_not_panicked()?;
        let block_size = u64::from(self.geometry.block_size);
        if offset % block_size != 0 {
            return Err(Hn4Error::InvalidArgument);
        }
        let codec = NullCodec;
        let mut n = offset / block_size;
        for chunk in data.chunks(self.geometry.block_size as usize) {
            hn4_core::write_pipeline::write(
                &self.ctx,
                self.hal.as_ref(),
                &self.geometry,
                &codec,
                anchor,
                n,
                chunk,
                chunk.len(),
                Permissions::WRITE,
                false,
            )?;
            n += 1;
        }
        Ok(())
    }

    /// Read the anchor's full contents back, resolving and verifying every
    /// logical block `0..mass`.
    pub fn read(&self, anchor: &Anchor) -> Result<Vec<u8>, Hn4Error> {
        self.ctx.check_not_panicked()?;
        let codec = NullCodec;
        let mut out = Vec::with_capacity((anchor.mass * u64::from(self.geometry.block_size)) as usize);
        for n in 0..anchor.mass {
            let idx = resolver::resolve(&self.ctx, self.hal.as_ref(), &self.geometry, anchor, n)?.value;
            let (header, payload) =
                resolver::verify_block(&self.ctx, self.hal.as_ref(), &self.geometry, idx, anchor.seed_id(), n, anchor.write_gen)?
                    .ok_or(Hn4Error::DataRot)?;
            let decoded = if header.comp_meta.compressed {
                let compressed_len = header.comp_meta.compressed_len as usize;
                codec.decompress(&payload[..compressed_len.min(payload.len())], payload.len()).ok_or(Hn4Error::DecompressFail)?
            } else {
                payload
            };
            out.extend_from_slice(&decoded);
        }
        Ok(out)
    }

    /// Tombstone the anchor (Reaper picks it up after the
    /// 24-hour grace period; no blocks are freed synchronously here).
    pub fn delete(&self, anchor: &mut Anchor) -> Result<(), Hn4Error> {
        self.ctx.check_not_panicked()?;
        if anchor.permissions.contains(Permissions::IMMUTABLE) {
            return Err(Hn4Error::Immutable);
        }
        let expected_gen = anchor.write_gen;
        let mut tombstoned = *anchor;
        tombstoned.data_class |= DataClass::TOMBSTONE;
        tombstoned.mod_clock = self.hal.get_time_ns();
        if !self.ctx.cortex.replace_if_generation_unchanged(anchor.seed_id(), expected_gen, tombstoned) {
            return Err(Hn4Error::GenerationSkew);
        }
        *anchor = tombstoned;
        Ok(())
    }

    /// A consistent, point-in-time copy of the anchor's current state. The
    /// Medic and Reaper use the same snapshot-then-atomic-rewrite pattern
    /// internally before committing a migration or a tombstone.
    /// `Anchor` is `Copy`, so this is exactly that: no new identity, no
    /// physical block movement, just a value the caller can keep comparing
    /// `write_gen` against without racing the live Cortex entry.
    #[must_use]
    pub fn snapshot(&self, anchor: &Anchor) -> Anchor {
        *anchor
    }

    /// Rename/reflink on `public_id` (supplemented feature): CAS the
    /// in-RAM `public_id` only. No physical block movement, no generation
    /// bump — `seed_id` and every on-media block reference are untouched.
    pub fn rename_anchor(&self, seed_id: u128, expected_public_id: u128, new_public_id: u128) -> Result<(), Hn4Error> {
        let Some(mut anchor) = self.ctx.cortex.get(seed_id) else {
            return Err(Hn4Error::NotFound);
        };
        if anchor.public_id != expected_public_id {
            return Err(Hn4Error::IdMismatch);
        }
        let expected_gen = anchor.write_gen;
        anchor.public_id = new_public_id;
        if !self.ctx.cortex.replace_if_generation_unchanged(seed_id, expected_gen, anchor) {
            return Err(Hn4Error::GenerationSkew);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{FormatOptions, MountOptions};
    use hn4_hal::{BlockHal, DeviceClass, HwFlags, InMemoryHal, Profile};
    use std::sync::Arc;

    fn mounted() -> Volume {
        let backing = InMemoryHal::new(16 * 1024 * 1024, DeviceClass::Ssd, HwFlags::empty(), 0);
        crate::volume::format_volume(
            &backing,
            &FormatOptions { device_class: DeviceClass::Ssd, profile: Profile::System, block_size: 4096, horizon_capacity_blocks: 64 },
        )
        .unwrap();
        let hal: Arc<dyn BlockHal> = Arc::new(backing);
        Volume::mount(hal, MountOptions { scavenger_interval: None, ..Default::default() }).unwrap()
    }

    #[test]
    fn create_write_read_round_trip() {
        let volume = mounted();
        let mut anchor = volume.create(1, 0, Permissions::READ | Permissions::WRITE).unwrap();
        volume.write(&mut anchor, 0, b"hello hn4").unwrap();
        let data = volume.read(&anchor).unwrap();
        assert_eq!(&data[..9], b"hello hn4");
    }

    #[test]
    fn create_twice_is_rejected() {
        let volume = mounted();
        volume.create(1, 0, Permissions::READ | Permissions::WRITE).unwrap();
        assert!(matches!(volume.create(1, 0, Permissions::READ), Err(Hn4Error::Eexist)));
    }

    #[test]
    fn delete_then_write_is_refused() {
        let volume = mounted();
        let mut anchor = volume.create(2, 0, Permissions::READ | Permissions::WRITE).unwrap();
        volume.delete(&mut anchor).unwrap();
        assert!(matches!(volume.write(&mut anchor, 0, b"x"), Err(Hn4Error::Tombstone)));
    }

    #[test]
    fn rename_requires_matching_expected_public_id() {
        let volume = mounted();
        let anchor = volume.create(3, 0, Permissions::READ | Permissions::WRITE).unwrap();
        assert!(matches!(volume.rename_anchor(3, 999, 42), Err(Hn4Error::IdMismatch)));
        volume.rename_anchor(3, anchor.public_id, 42).unwrap();
        assert_eq!(volume.ctx.cortex.get(3).unwrap().public_id, 42);
    }

    #[test]
    fn snapshot_is_a_stable_copy() {
        let volume = mounted();
        let mut anchor = volume.create(4, 0, Permissions::READ | Permissions::WRITE).unwrap();
        let before = volume.snapshot(&anchor);
        volume.write(&mut anchor, 0, b"data").unwrap();
        assert_ne!(before.write_gen, anchor.write_gen);
    }
}
