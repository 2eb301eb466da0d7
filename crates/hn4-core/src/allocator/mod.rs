//! Ballistic Allocator: genesis placement for new files,
//! per-block allocation for existing ones, horizon fallback, and free.

pub mod horizon;

use hn4_hal::BlockHal;

use crate::bitmap::quality_mask::QualityTier;
use crate::cortex::VolumeContext;
use crate::error::Hn4Error;
use crate::geometry::VolumeGeometry;
use crate::placement::trajectory;
use crate::policy;

/// Placement intent, used to decide whether a Bronze-quality candidate is
/// acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocIntent {
    Normal,
    Metadata,
    System,
    Ai,
    Pinned,
}

impl AllocIntent {
    #[must_use]
    pub const fn rejects_bronze(self) -> bool {
        matches!(self, Self::Metadata | Self::System | Self::Ai | Self::Pinned)
    }
}

fn quality_acceptable(tier: QualityTier, intent: AllocIntent) -> bool {
    match tier {
        QualityTier::Toxic => false,
        QualityTier::Bronze => !intent.rejects_bronze(),
        QualityTier::Silver | QualityTier::Gold => true,
    }
}

/// Result of a successful allocation: the physical block index and the
/// collision shell it was claimed at.
#[derive(Debug, Clone, Copy)]
pub struct Allocated {
    pub block_index: u64,
    pub shell: u8,
}

/// Rejection-sampled uniform `[0, bound)`, eliminating modulo bias by
/// discarding any draw `>= (UINT64_MAX/bound)*bound`.
fn uniform_below(hal: &dyn BlockHal, bound: u64) -> u64 {
    if bound == 0 {
        return 0;
    }
    let limit = (u64::MAX / bound) * bound;
    loop {
        let r = hal.get_random_u64();
        if r < limit {
            return r % bound;
        }
    }
}

/// Per-block allocation for an existing file at logical index `N`.
/// Iterates collision shells `0..=k_limit`; on full saturation falls back
/// to the Horizon (caller decides whether that's permitted).
pub fn allocate_block(
    ctx: &VolumeContext,
    geometry: &VolumeGeometry,
    gravity_center: u64,
    orbit_vector: u64,
    n: u64,
    fractal_scale: u8,
    intent: AllocIntent,
) -> Result<Allocated, Hn4Error> {
    if ctx.updates_refused(geometry.total_blocks()) {
        return Err(Hn4Error::Enospc);
    }
    let limit = policy::k_limit(geometry.device_class, geometry.profile);
    for k in 0..=limit {
        let Ok(candidate) = trajectory(
            &geometry.flux,
            gravity_center,
            orbit_vector,
            n,
            fractal_scale,
            k,
            geometry.device_class,
            geometry.profile,
        ) else {
            continue;
        };
        if candidate >= geometry.total_blocks() {
            continue;
        }
        let tier = ctx.quality.get(candidate);
        if !quality_acceptable(tier, intent) {
            continue;
        }
        let (ok, changed) = ctx.bitmap_set(candidate)?;
        if ok && changed {
            return Ok(Allocated { block_index: candidate, shell: k });
        }
        // Bit was already set (collision): try the next shell.
    }
    Err(Hn4Error::GravityCollapse)
}

/// No GPU is associated with the calling context (`BlockHal::get_calling_gpu_id`'s
/// documented sentinel); topology is treated as unknown and the AI-profile
/// affinity window is not enforced.
const TOPOLOGY_UNKNOWN_GPU_ID: u32 = 0xFFFF_FFFF;

/// Contiguous partitions the Flux region is divided into for AI-profile GPU
/// locality. The calling GPU's affinity window is partition
/// `get_calling_gpu_id() % AI_AFFINITY_PARTITIONS`.
const AI_AFFINITY_PARTITIONS: u64 = 16;

/// Probe depth for the AI-profile affinity check: the first
/// `HN4_MAX_TRAJECTORY_K` logical indices are simulated at shell 0 and `V`
/// is rejected if any of them lands outside the calling GPU's window.
const HN4_MAX_TRAJECTORY_K: u64 = 12;

/// The calling GPU's affinity window as a half-open `[start, end)` range of
/// block indices.
fn affinity_window(total_blocks: u64, gpu_id: u32) -> (u64, u64) {
    let partition = u64::from(gpu_id) % AI_AFFINITY_PARTITIONS;
    let width = total_blocks.div_ceil(AI_AFFINITY_PARTITIONS).max(1);
    let start = partition * width;
    (start, (start + width).min(total_blocks))
}

/// `true` iff simulating the first `HN4_MAX_TRAJECTORY_K` logical indices of
/// `(g, v)` at shell 0 stays within the calling GPU's affinity window for
/// every index that lands in range.
fn respects_ai_affinity(geometry: &VolumeGeometry, hal: &dyn BlockHal, g: u64, v: u64, fractal_scale: u8) -> bool {
    let gpu_id = hal.get_calling_gpu_id();
    if gpu_id == TOPOLOGY_UNKNOWN_GPU_ID {
        return true;
    }
    let (win_start, win_end) = affinity_window(geometry.total_blocks(), gpu_id);
    for n in 0..HN4_MAX_TRAJECTORY_K {
        if let Ok(candidate) = trajectory(&geometry.flux, g, v, n, fractal_scale, 0, geometry.device_class, geometry.profile) {
            if candidate < win_start || candidate >= win_end {
                return false;
            }
        }
    }
    true
}

/// Genesis: choose `(G, V)` for a new file such that shells `0..=3` of
/// indices `0..tail_limit` are free.
pub fn genesis(
    ctx: &VolumeContext,
    hal: &dyn BlockHal,
    geometry: &VolumeGeometry,
    fractal_scale: u8,
    intent: AllocIntent,
    last_alloc_g: Option<u64>,
) -> Result<(u64, u64), Hn4Error> {
    if ctx.refresh_saturation(geometry.total_blocks()) {
        return Err(Hn4Error::Enospc);
    }

    let s = 1u64 << fractal_scale;
    let phi = (geometry.flux.flux_blocks / s).max(1);
    let max_probes = policy::max_genesis_probes(geometry.profile);
    let tail_width = policy::tail_check_width(geometry.device_class);
    let sequential = policy::device_policy(geometry.device_class).contains(policy::AllocPolicy::SEQ)
        || policy::profile_policy(geometry.profile).contains(policy::AllocPolicy::SEQ);

    for _ in 0..max_probes {
        let g_fractal = if geometry.device_class == hn4_hal::DeviceClass::Hdd {
            if let Some(prev) = last_alloc_g {
                // Golden-ratio drift from the previous successful G, jittered.
                const GOLDEN_FRAC_BITS: u64 = 0x9E37_79B9;
                let drift = (prev.wrapping_add(GOLDEN_FRAC_BITS)) % phi;
                let jitter = uniform_below(hal, phi.max(1)) % 8;
                (drift + jitter) % phi
            } else {
                uniform_below(hal, phi)
            }
        } else {
            uniform_below(hal, phi)
        };
        let g = g_fractal * s;

        let v_raw = if sequential {
            1
        } else {
            hal.get_random_u64() | 1
        };

        if geometry.profile == hn4_hal::Profile::Ai && !respects_ai_affinity(geometry, hal, g, v_raw, fractal_scale) {
            continue;
        }

        // Head (N=0) across shells 0..=3.
        let mut head_claimed = None;
        for k in 0..=3u8 {
            let Ok(candidate) = trajectory(&geometry.flux, g, v_raw, 0, fractal_scale, k, geometry.device_class, geometry.profile) else {
                continue;
            };
            if candidate >= geometry.total_blocks() {
                continue;
            }
            let tier = ctx.quality.get(candidate);
            if !quality_acceptable(tier, intent) {
                continue;
            }
            let (ok, changed) = ctx.bitmap_set(candidate)?;
            if ok && changed {
                head_claimed = Some((candidate, v_raw, k));
                break;
            }
        }

        let Some((head_idx, v, k_hit)) = head_claimed else {
            continue;
        };

        // Tail check: N in [1, tail_width], shell 0 only, test-only.
        let mut tail_ok = true;
        for n in 1..=tail_width {
            if let Ok(candidate) = trajectory(&geometry.flux, g, v, n, fractal_scale, 0, geometry.device_class, geometry.profile) {
                if candidate < geometry.total_blocks() && ctx.bitmap_test(candidate)?.value {
                    tail_ok = false;
                    break;
                }
            }
        }

        if tail_ok {
            let _ = k_hit;
            ctx.mark_dirty();
            return Ok((g, v));
        }

        // Tail collision: release the head without marking dirty (BIT_FORCE_CLEAR).
        ctx.bitmap_clear(head_idx)?;
    }

    Err(Hn4Error::GravityCollapse)
}

/// `free_block(phys_lba)`.
pub fn free_block(ctx: &VolumeContext, geometry: &VolumeGeometry, block_index: u64) -> Result<(), Hn4Error> {
    if block_index >= geometry.total_blocks() {
        ctx.taint("free_block_out_of_range");
        return Err(Hn4Error::AlignmentFail);
    }
    ctx.bitmap_clear(block_index)?;
    Ok(())
}
