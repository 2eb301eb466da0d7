//! Quantified invariants 1-7 from, as `proptest` properties.
//!
//! These need the shrinking search a plain `#[test]` doesn't give you, so
//! they live here rather than in `src/boundary.rs`'s deterministic checks.

use std::sync::Arc;

use hn4_core::allocator::{horizon, AllocIntent};
use hn4_core::bitmap::ecc::{ecc_check_and_fix, ecc_encode, EccStatus};
use hn4_core::codec::{CompressionCodec, NullCodec};
use hn4_core::cortex::VolumeContext;
use hn4_core::delta_table::{seed_hash, DeltaTable};
use hn4_core::error::Hn4Error;
use hn4_core::placement::{trajectory, FluxGeometry};
use hn4_core::resolver;
use hn4_core::telemetry::NullSink;
use hn4_core::types::{Anchor, Permissions};
use hn4_core::write_pipeline;
use hn4_core::geometry::VolumeGeometry;
use hn4_hal::{BlockHal, DeviceClass, HwFlags, InMemoryHal, Profile};
use proptest::prelude::*;

fn geometry() -> VolumeGeometry {
    VolumeGeometry {
        flux: FluxGeometry { flux_start_lba: 0, flux_blocks: 4096 },
        horizon_start_block: 4096,
        horizon_capacity_blocks: 256,
        block_size: 4096,
        sector_size: 512,
        device_class: DeviceClass::Ssd,
        profile: Profile::System,
    }
}

fn mounted() -> (VolumeContext, InMemoryHal, VolumeGeometry) {
    let geo = geometry();
    let ctx = VolumeContext::new(geo.total_blocks(), false, Arc::new(NullSink));
    let hal = InMemoryHal::new(geo.total_blocks() * u64::from(geo.block_size), DeviceClass::Ssd, HwFlags::empty(), 0);
    (ctx, hal, geo)
}

/// A plain run-length codec to exercise invariant 4 through a codec that
/// actually compresses, since the reference `NullCodec` by construction
/// never does. A real compression codec is an external collaborator, so
/// this is a contract-conformance stand-in, not a candidate codec.
struct RunLengthCodec;

impl CompressionCodec for RunLengthCodec {
    fn compress(&self, input: &[u8]) -> Option<Vec<u8>> {
        if input.is_empty() {
            return None;
        }
        let mut out = Vec::new();
        let mut iter = input.iter().peekable();
        while let Some(&byte) = iter.next() {
            let mut run = 1u8;
            while run < u8::MAX && iter.peek() == Some(&&byte) {
                iter.next();
                run += 1;
            }
            out.push(run);
            out.push(byte);
        }
        (out.len() < input.len()).then_some(out)
    }

    fn decompress(&self, input: &[u8], original_len: usize) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(original_len);
        let mut pairs = input.chunks_exact(2);
        for pair in &mut pairs {
            out.extend(std::iter::repeat(pair[1]).take(usize::from(pair[0])));
        }
        (pairs.remainder().is_empty() && out.len() == original_len).then_some(out)
    }
}

proptest! {
    /// Invariant 2: for odd V coprime with phi, trajectory(.., k=0) is a
    /// bijection over N in [0, phi).
    #[test]
    fn trajectory_is_a_bijection_over_phi(
        g in 0u64..4096,
        v_raw in 1u64..4096,
    ) {
        let flux = FluxGeometry { flux_start_lba: 0, flux_blocks: 4096 };
        let v = v_raw | 1;
        let mut seen = std::collections::HashSet::new();
        for n in 0..64u64 {
            if let Ok(idx) = trajectory(&flux, g, v, n, 0, 0, DeviceClass::Ssd, Profile::System) {
                prop_assert!(seen.insert(idx), "trajectory collided at N={n}");
            }
        }
    }

    /// Invariant 3: ECC is a no-op on a clean word, corrects any single-bit
    /// flip of either the data or the ECC byte, and flags any two-bit flip
    /// of the data as uncorrectable.
    #[test]
    fn ecc_corrects_single_bit_flips_and_detects_double_flips(
        data: u64,
        data_flip in 0u32..64,
        ecc_flip in 0u32..8,
    ) {
        let ecc = ecc_encode(data);

        let (clean, status) = ecc_check_and_fix(data, ecc);
        prop_assert_eq!(clean, data);
        prop_assert_eq!(status, EccStatus::Clean);

        let flipped_data = data ^ (1u64 << data_flip);
        let (fixed, status) = ecc_check_and_fix(flipped_data, ecc);
        prop_assert_eq!(fixed, data);
        prop_assert_eq!(status, EccStatus::Corrected);

        let flipped_ecc = ecc ^ (1u8 << ecc_flip);
        let (fixed, status) = ecc_check_and_fix(data, flipped_ecc);
        prop_assert_eq!(fixed, data);
        prop_assert_eq!(status, EccStatus::Corrected);

        if data_flip != ecc_flip.into() {
            let second_bit = if data_flip == 0 { 1 } else { 0 };
            let double_flipped = data ^ (1u64 << data_flip) ^ (1u64 << second_bit);
            let (_, status) = ecc_check_and_fix(double_flipped, ecc);
            prop_assert_eq!(status, EccStatus::Uncorrectable);
        }
    }

    /// Invariant 4: decompress(compress(x)) == x whenever compress opts in,
    /// and NullCodec's always-opt-out path still round-trips the raw bytes.
    #[test]
    fn compress_decompress_round_trips(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
        let rle = RunLengthCodec;
        if let Some(compressed) = rle.compress(&bytes) {
            let restored = rle.decompress(&compressed, bytes.len());
            prop_assert_eq!(restored, Some(bytes.clone()));
        }

        let null = NullCodec;
        prop_assert!(null.compress(&bytes).is_none());
        prop_assert_eq!(null.decompress(&bytes, bytes.len()), Some(bytes));
    }

    /// Invariant 6: Delta Table idempotence across arbitrary keys.
    #[test]
    fn delta_table_lookup_respects_register_and_clear(
        old_lba in 0u64..10_000,
        new_lba in 1u64..10_000,
        version in 1u64..1000,
        seed in 0u128..u128::MAX,
    ) {
        let dt = DeltaTable::new();
        let hash = seed_hash(seed);
        prop_assert_eq!(dt.lookup(old_lba, hash, version), 0);
        prop_assert!(dt.register(old_lba, new_lba, version, hash));
        prop_assert_eq!(dt.lookup(old_lba, hash, version), new_lba);
        dt.clear(old_lba, hash);
        prop_assert_eq!(dt.lookup(old_lba, hash, version), 0);
    }

    /// Invariant 1 & 5: after a sequence of overwrites to the same logical
    /// block, the resolver returns exactly one physical block, and its
    /// contents and generation always match the most recent write — never a
    /// stale payload, never a mix.
    #[test]
    fn overwrites_leave_exactly_one_verifying_block_at_the_latest_generation(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 1..5),
    ) {
        let (ctx, hal, geo) = mounted();
        let codec = NullCodec;
        let mut anchor = Anchor::new(0xABCD, 200, 33, 0, 0);
        ctx.cortex.insert(0, anchor);

        for payload in &payloads {
            write_pipeline::write(&ctx, &hal, &geo, &codec, &mut anchor, 0, payload, payload.len(), Permissions::WRITE, false).unwrap();
        }

        let outcome = resolver::resolve(&ctx, &hal, &geo, &anchor, 0).unwrap();
        let resolved_lba = outcome.value;

        let mut verifying_shells = 0u32;
        for k in 0..=11u8 {
            if let Ok(candidate) = trajectory(&geo.flux, anchor.gravity_center, anchor.orbit_vector(), 0, anchor.fractal_scale, k, geo.device_class, geo.profile) {
                if resolver::verify_block(&ctx, &hal, &geo, candidate, anchor.seed_id(), 0, anchor.write_gen).unwrap().is_some() {
                    verifying_shells += 1;
                    prop_assert_eq!(geo.block_to_lba(candidate), resolved_lba);
                }
            }
        }
        prop_assert_eq!(verifying_shells, 1, "expected exactly one physical block verifying at the committed generation");

        let last = payloads.last().unwrap();
        let mut readback = vec![0u8; geo.block_size as usize];
        hal.sync_io(hn4_hal::IoOp::Read, resolved_lba, &mut readback, geo.sectors_per_block()).unwrap();
        let header = hn4_core::types::BlockHeader::from_bytes(&readback[..hn4_core::types::BLOCK_HEADER_SIZE].try_into().unwrap()).unwrap();
        prop_assert!(!header.comp_meta.compressed, "NullCodec never compresses");
        let payload = &readback[hn4_core::types::BLOCK_HEADER_SIZE..];
        prop_assert_eq!(&payload[..last.len()], last.as_slice(), "latest write's bytes were not what the resolved block landed");
    }
}

/// Invariant 7: once the Horizon ring is fully occupied, allocation fails
/// within `HORIZON_RETRY_LIMIT` (4) attempts rather than scanning.
#[test]
fn horizon_ring_full_returns_enospc_quickly() {
    let geo = VolumeGeometry {
        flux: FluxGeometry { flux_start_lba: 0, flux_blocks: 1024 },
        horizon_start_block: 1024,
        horizon_capacity_blocks: 3,
        block_size: 4096,
        sector_size: 512,
        device_class: DeviceClass::Ssd,
        profile: Profile::Archive,
    };
    let ctx = VolumeContext::new(geo.total_blocks(), false, Arc::new(NullSink));
    for slot in 0..geo.horizon_capacity_blocks {
        ctx.bitmap.set(geo.horizon_start_block + slot).unwrap();
    }
    match horizon::horizon_allocate(&ctx, &geo, 0, 0, Profile::Archive, AllocIntent::Normal) {
        Err(Hn4Error::Enospc) => {}
        other => panic!("expected Enospc on a full ring, got {other:?}"),
    }
}
