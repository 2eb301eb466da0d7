//! The placement function, "Equation of State".
//!
//! `trajectory` is pure and deterministic: the allocator, the resolver, and
//! the medic's osteoplasty all call through this one function rather than
//! duplicating the arithmetic, so a change to the dispersion algorithm only
//! has one place to go wrong.

use hn4_hal::{DeviceClass, Profile};

use crate::error::Hn4Error;

/// Fixed triangular-number jitter table, `T[k] = k*(k+1)/2`.
const JITTER_TABLE: [u64; 16] = [0, 1, 3, 6, 10, 15, 21, 28, 36, 45, 55, 66, 78, 91, 105, 120];

/// The slice of on-media geometry `trajectory` needs: where the Flux region
/// starts and how many blocks it spans. Everything else (Horizon bounds,
/// metadata regions) is irrelevant to placement math.
#[derive(Debug, Clone, Copy)]
pub struct FluxGeometry {
    pub flux_start_lba: u64,
    pub flux_blocks: u64,
}

fn align_up(x: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (x + align - 1) & !(align - 1)
}

/// `gravity_assist(V) = rotate_left(V, 17) XOR 0xA5A5...A5`, restricted to
/// the 48 bits an orbit vector actually occupies.
#[must_use]
pub fn gravity_assist(v: u64) -> u64 {
    const MASK48: u64 = (1u64 << 48) - 1;
    let rotated = ((v << 17) | (v >> (48 - 17))) & MASK48;
    (rotated ^ 0xA5A5_A5A5_A5A5) | 1
}

/// Binary GCD, used to test `V` for coprimality with `phi`.
fn binary_gcd(mut a: u64, mut b: u64) -> u64 {
    if a == 0 {
        return b;
    }
    if b == 0 {
        return a;
    }
    let shift = (a | b).trailing_zeros();
    a >>= a.trailing_zeros();
    loop {
        b >>= b.trailing_zeros();
        if a > b {
            std::mem::swap(&mut a, &mut b);
        }
        b -= a;
        if b == 0 {
            return a << shift;
        }
    }
}

/// Reduce `v` modulo `phi`, force it odd, and perturb until it is coprime
/// with `phi` — up to 32 attempts, falling back to the identity stride `1`
///.
fn coprime_stride(mut v: u64, phi: u64) -> u64 {
    if phi <= 1 {
        return 1;
    }
    v %= phi;
    v |= 1;
    for _ in 0..32 {
        if binary_gcd(v, phi) == 1 {
            return v;
        }
        v = (v + 2) % phi;
        v |= 1;
    }
    1
}

/// `trajectory(G, V, N, M, k) -> block_index`.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn trajectory(
    geometry: &FluxGeometry,
    g: u64,
    v: u64,
    n: u64,
    m: u8,
    k: u8,
    device_class: DeviceClass,
    profile: Profile,
) -> Result<u64, Hn4Error> {
    let s = 1u64.checked_shl(u32::from(m)).ok_or(Hn4Error::AlignmentFail)?;

    let flux_start_aligned = align_up(geometry.flux_start_lba, s);
    let alignment_waste = flux_start_aligned.saturating_sub(geometry.flux_start_lba);
    let usable = geometry.flux_blocks.saturating_sub(alignment_waste);
    let phi = usable / s;
    if phi == 0 {
        return Err(Hn4Error::AlignmentFail);
    }

    let g_aligned = g - (g % s);
    let entropy_loss = g % s;
    let g_fractal = g_aligned / s;

    let effective_v = if k >= 4 { gravity_assist(v) } else { v | 1 };
    let stride = coprime_stride(effective_v, phi);

    // Overflow-safe modular multiplication via a 128-bit intermediate.
    let offset = ((u128::from(n) * u128::from(stride)) % u128::from(phi)) as u64;
    let entropy_term = entropy_loss % phi;

    let non_linear = matches!(device_class, DeviceClass::Hdd | DeviceClass::Tape);
    let theta = if non_linear && profile != Profile::System && phi >= 32 {
        JITTER_TABLE[usize::from(k.min(15))] % phi
    } else {
        0
    };

    let slot = (g_fractal % phi)
        .checked_add(offset)
        .and_then(|x| x.checked_add(entropy_term))
        .and_then(|x| x.checked_add(theta))
        .map(|x| x % phi)
        .ok_or(Hn4Error::AlignmentFail)?;

    let block_index = flux_start_aligned
        .checked_add(slot.checked_mul(s).ok_or(Hn4Error::AlignmentFail)?)
        .and_then(|x| x.checked_add(entropy_loss))
        .ok_or(Hn4Error::AlignmentFail)?;

    Ok(block_index)
}
