//! Atomic Write Pipeline — the Shadow Hop.
//!
//! `write(anchor, N, buffer, len, session_perms)`: allocate a fresh shadow
//! block, fill it, seal it, land it, then swing the anchor's generation
//! over to it with a single CAS. A reader either resolves the old block (if
//! it read before the CAS) or the new one (after) — never a torn mix.

use hn4_hal::{BlockHal, DeviceClass, HwFlags, IoOp, Profile};

use crate::allocator::{self, horizon, AllocIntent};
use crate::codec::CompressionCodec;
use crate::cortex::VolumeContext;
use crate::error::{Hn4Error, Hn4Info, Outcome};
use crate::geometry::VolumeGeometry;
use crate::policy;
use crate::resolver;
use crate::types::block::{BlockHeader, CompMeta, BLOCK_HEADER_SIZE};
use crate::types::{Anchor, DataClass, Permissions};

/// Bound on Phase-10-CAS-loss restarts from Phase 0. An unbounded retry
/// would let a pathologically hot anchor spin forever, so we cap it and
/// surface `AtomicsTimeout` past the cap.
const RESTART_LIMIT: u32 = 8;

/// Logical blocks per `orbit_hints` nibble (Phase 5: "Record `k`
/// into a 32-bit `orbit_hints` field... for the chunk containing `N`").
const ORBIT_HINT_CHUNK_BLOCKS: u64 = 64;

const fn preflight_table() -> [Option<Hn4Error>; 16] {
    let mut table = [None; 16];
    let mut i = 0;
    while i < 16 {
        let read_only = i & 1 != 0;
        let panicked = i & 2 != 0;
        let tombstone = i & 4 != 0;
        let immutable = i & 8 != 0;
        table[i] = if panicked {
            Some(Hn4Error::VolumeLocked)
        } else if read_only {
            Some(Hn4Error::AccessDenied)
        } else if tombstone {
            Some(Hn4Error::Tombstone)
        } else if immutable {
            Some(Hn4Error::Immutable)
        } else {
            None
        };
        i += 1;
    }
    table
}

static PREFLIGHT_TABLE: [Option<Hn4Error>; 16] = preflight_table();

/// Single 4-bit lookup fusing {read_only, volume PANIC, anchor TOMBSTONE,
/// anchor IMMUTABLE} into one refusal decision (Preflight).
fn preflight(ctx: &VolumeContext, read_only: bool, anchor: &Anchor) -> Result<(), Hn4Error> {
    let idx = usize::from(read_only)
        | (usize::from(ctx.is_panicked()) << 1)
        | (usize::from(anchor.data_class.contains(DataClass::TOMBSTONE)) << 2)
        | (usize::from(anchor.permissions.contains(Permissions::IMMUTABLE)) << 3);
    match PREFLIGHT_TABLE[idx] {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn intent_for(geometry: &VolumeGeometry, anchor: &Anchor) -> AllocIntent {
    if anchor.data_class.contains(DataClass::PINNED) {
        AllocIntent::Pinned
    } else if anchor.data_class.is_metadata() {
        AllocIntent::Metadata
    } else {
        match geometry.profile {
            Profile::System => AllocIntent::System,
            Profile::Ai => AllocIntent::Ai,
            _ => AllocIntent::Normal,
        }
    }
}

/// Record collision shell `k` into the anchor's `orbit_hints` advisory
/// field, one nibble per 64-block chunk, only for shallow hits that fit
/// (Phase 5).
fn record_orbit_hint(anchor: &mut Anchor, n: u64, shell: u8) {
    if shell > 3 {
        return;
    }
    let chunk = n / ORBIT_HINT_CHUNK_BLOCKS;
    if chunk >= 8 {
        return;
    }
    let nibble_shift = (chunk as u32) * 4;
    let cleared = anchor.orbit_hints & !(0xFu32 << nibble_shift);
    anchor.orbit_hints = cleared | (u32::from(shell) << nibble_shift);
}

/// `write(anchor, N, buffer, len, session_perms)`.
///
/// `anchor` is the caller's local copy; on success it has been updated
/// in place (new `write_gen`, `mod_clock`, `mass`, possibly `gravity_center`
/// or `orbit_hints`) and the same snapshot has been committed into
/// `ctx.cortex` — the caller does not need to re-insert it.
#[allow(clippy::too_many_arguments)]
pub fn write(
    ctx: &VolumeContext,
    hal: &dyn BlockHal,
    geometry: &VolumeGeometry,
    codec: &dyn CompressionCodec,
    anchor: &mut Anchor,
    n: u64,
    buffer: &[u8],
    len: usize,
    session_perms: Permissions,
    read_only: bool,
) -> Result<Outcome<()>, Hn4Error> {
    preflight(ctx, read_only, anchor)?;

    let effective_perms = anchor.permissions | session_perms;
    if !effective_perms.intersects(Permissions::WRITE | Permissions::APPEND | Permissions::SOVEREIGN) {
        return Err(Hn4Error::AccessDenied);
    }
    let tail = anchor.mass;
    let append_only = effective_perms.contains(Permissions::APPEND) && !effective_perms.contains(Permissions::WRITE);
    if append_only && n < tail {
        return Err(Hn4Error::AccessDenied);
    }
    if geometry.block_size % geometry.sector_size != 0 {
        return Err(Hn4Error::AlignmentFail);
    }
    let payload_capacity = (geometry.block_size as usize).saturating_sub(BLOCK_HEADER_SIZE);
    if len > payload_capacity || len > buffer.len() {
        return Err(Hn4Error::InvalidArgument);
    }

    'attempt: for _ in 0..RESTART_LIMIT {
        ctx.check_not_panicked()?;

        // Phase 0 — old residency.
        let old_physical = match resolver::resolve(ctx, hal, geometry, anchor, n) {
            Ok(outcome) => Some(outcome.value),
            Err(Hn4Error::NotFound) => None,
            Err(e) => return Err(e),
        };
        let is_overwrite = old_physical.is_some();

        // Phase 1 — RMW thaw, only for a partial overwrite of an existing block.
        let mut output = vec![0u8; payload_capacity];
        if let Some(old_idx) = old_physical {
            if len < payload_capacity {
                let sectors = geometry.sectors_per_block();
                let mut old_buf = vec![0u8; geometry.block_size as usize];
                hal.sync_io(IoOp::Read, geometry.block_to_lba(old_idx), &mut old_buf, sectors)?;
                let header_bytes: [u8; BLOCK_HEADER_SIZE] = old_buf[..BLOCK_HEADER_SIZE]
                    .try_into()
                    .map_err(|_| Hn4Error::HeaderRot)?;
                let old_header = BlockHeader::from_bytes(&header_bytes)?;
                let old_payload = &old_buf[BLOCK_HEADER_SIZE..];
                if BlockHeader::compute_data_crc(old_payload) != old_header.data_crc {
                    return Err(Hn4Error::PayloadRot);
                }
                let decoded = if old_header.comp_meta.compressed {
                    let slice = &old_payload[..old_header.comp_meta.compressed_len as usize];
                    codec.decompress(slice, payload_capacity).ok_or(Hn4Error::DecompressFail)?
                } else {
                    old_payload.to_vec()
                };
                output.copy_from_slice(&decoded[..payload_capacity]);
            }
        }
        output[..len].copy_from_slice(&buffer[..len]);

        // Phase 2 — compression decision.
        let mut comp_meta = CompMeta::default();
        let mut sealed_payload = output;
        let want_compress = (anchor.data_class.contains(DataClass::HINT_COMPRESSED) || geometry.profile == Profile::Archive)
            && !anchor.data_class.contains(DataClass::HINT_ENCRYPTED)
            && !is_overwrite
            && len > 128;
        if want_compress {
            if let Some(compressed) = codec.compress(&sealed_payload[..len]) {
                if compressed.len() < len && compressed.len() <= payload_capacity {
                    let mut padded = vec![0u8; payload_capacity];
                    padded[..compressed.len()].copy_from_slice(&compressed);
                    sealed_payload = padded;
                    comp_meta = CompMeta { compressed: true, compressed_len: compressed.len() as u32 };
                }
            }
        }

        // Phase 3 — CRC.
        let data_crc = BlockHeader::compute_data_crc(&sealed_payload);

        // Phase 4 — generation.
        let next_gen = anchor.next_generation();
        let current_gen = anchor.write_gen;

        // Phase 5 — allocate shadow location.
        let intent = intent_for(geometry, anchor);
        let mut shadow_idx;
        match allocator::allocate_block(ctx, geometry, anchor.gravity_center, anchor.orbit_vector(), n, anchor.fractal_scale, intent) {
            Ok(allocated) => {
                shadow_idx = allocated.block_index;
                record_orbit_hint(anchor, n, allocated.shell);
            }
            Err(Hn4Error::GravityCollapse) => match horizon::horizon_allocate(ctx, geometry, n, anchor.fractal_scale, geometry.profile, intent) {
                Ok(h) => {
                    shadow_idx = h.block_index;
                    anchor.gravity_center = h.new_gravity_center;
                    anchor.data_class |= DataClass::HINT_HORIZON;
                }
                Err(e) => return Err(e),
            },
            Err(e) => return Err(e),
        }

        // Phase 6 — seal header.
        let header = BlockHeader {
            well_id: anchor.seed_id(),
            seq_index: n,
            generation: next_gen,
            data_crc,
            comp_meta,
        };
        let mut block_buf = vec![0u8; geometry.block_size as usize];
        block_buf[..BLOCK_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        block_buf[BLOCK_HEADER_SIZE..].copy_from_slice(&sealed_payload);

        // Phase 7 — write the shadow block.
        let sectors = geometry.sectors_per_block();
        let mut predicted_lba = geometry.block_to_lba(shadow_idx);
        let mut rescue_needed = false;

        if geometry.device_class == DeviceClass::Zns {
            match hal.sync_io(IoOp::ZoneAppend, predicted_lba, &mut block_buf, sectors) {
                Ok(outcome) if outcome.landed_lba != predicted_lba => {
                    let actual_idx = outcome.landed_lba / u64::from(sectors);
                    if n == 0 {
                        if ctx.bitmap_test(actual_idx)?.value {
                            ctx.raise_panic("zns_genesis_drift_desync");
                            return Err(Hn4Error::DataRot);
                        }
                        ctx.bitmap_clear(shadow_idx)?;
                        ctx.bitmap_set(actual_idx)?;
                        shadow_idx = actual_idx;
                        predicted_lba = outcome.landed_lba;
                        // Re-ballistify: a genesis write has no prior
                        // residency to eclipse, so the drive's chosen LBA
                        // simply becomes the file's gravity center, the same
                        // way Horizon fallback rewrites G for its own linear
                        // addressing below.
                        anchor.gravity_center = actual_idx;
                    } else {
                        // Mid-file drift: releasing the predicted bit alone
                        // would leave the drive's actual landing block
                        // dangling with a clear bit while it still holds
                        // this write's payload. Keep the actual bit set
                        // (leaked for the scavenger) and release only the
                        // predicted one.
                        ctx.bitmap_clear(shadow_idx)?;
                        ctx.bitmap_set(actual_idx)?;
                        ctx.mark_dirty();
                        return Err(Hn4Error::Geometry);
                    }
                }
                Ok(_) => {}
                Err(hn4_hal::HalError::Timeout) => rescue_needed = true,
                Err(e) => {
                    ctx.bitmap_clear(shadow_idx)?;
                    return Err(e.into());
                }
            }
        } else {
            let retry = policy::write_retry_policy(geometry.device_class, geometry.profile);
            let mut succeeded = false;
            let mut timed_out = false;
            let mut hard_err = None;
            for _ in 0..=retry.retries {
                match hal.sync_io(IoOp::Write, predicted_lba, &mut block_buf, sectors) {
                    Ok(_) => {
                        succeeded = true;
                        break;
                    }
                    Err(hn4_hal::HalError::Timeout) => {
                        timed_out = true;
                        hal.micro_sleep(retry.sleep_us);
                    }
                    Err(e) => {
                        hard_err = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = hard_err {
                ctx.bitmap_clear(shadow_idx)?;
                return Err(e.into());
            }
            if !succeeded {
                rescue_needed = timed_out;
                if !rescue_needed {
                    ctx.bitmap_clear(shadow_idx)?;
                    return Err(Hn4Error::HwIo);
                }
            }
        }

        // Phase 8 — rescue protocol (write timeout only, non-ZNS).
        if rescue_needed && geometry.device_class != DeviceClass::Zns {
            hal.barrier()?;
            let mut readback = vec![0u8; geometry.block_size as usize];
            hal.sync_io(IoOp::Read, predicted_lba, &mut readback, sectors)?;
            if readback != block_buf {
                ctx.mark_dirty();
                ctx.quality.demote(shadow_idx);
                return Err(Hn4Error::AtomicsTimeout);
            }
        }

        // Phase 9 — durability barrier.
        let caps = hal.get_caps();
        let defer_durability =
            (caps.hw_flags.contains(HwFlags::NVM) && caps.hw_flags.contains(HwFlags::STRICT_FLUSH)) || geometry.profile == Profile::HyperCloud;
        if !defer_durability {
            hal.barrier()?;
        }

        // Phase 10 — commit anchor.
        anchor.mass = (n + 1).max(anchor.mass);
        anchor.write_gen = next_gen;
        anchor.mod_clock = hal.get_time_ns();
        let committed = ctx.cortex.replace_if_generation_unchanged(anchor.seed_id(), current_gen, *anchor);
        if !committed {
            let retry = policy::write_retry_policy(geometry.device_class, geometry.profile);
            ctx.mark_dirty();
            if geometry.device_class != DeviceClass::Zns {
                ctx.bitmap_clear(shadow_idx)?;
            } // ZNS: cannot roll back the write pointer, so the shadow leaks.
            hal.micro_sleep(retry.sleep_us);
            if let Some(latest) = ctx.cortex.get(anchor.seed_id()) {
                *anchor = latest;
            }
            continue 'attempt;
        }

        // Phase 11 — eclipse the old block.
        if let Some(old_idx) = old_physical {
            if old_idx != shadow_idx {
                ctx.bitmap_clear(old_idx)?;
            }
        }

        return Ok(Outcome::new((), Hn4Info::Success));
    }

    Err(Hn4Error::AtomicsTimeout)
}
