//! Device-class × profile policy tables: retry/timeout behavior and
//! placement-search depth both vary by the combination of storage medium
//! and workload profile, so this module centralizes that cross-product.
//!
//! Two small lookup tables OR'd into one mask, rather than a dispatch over
//! every `(DeviceClass, Profile)` pair directly.

use hn4_hal::{DeviceClass, Profile};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocPolicy: u8 {
        /// Sequential-only placement: skip the collision-shell search.
        const SEQ = 1 << 0;
    }
}

/// Device contribution to the allocation policy mask.
#[must_use]
pub const fn device_policy(device_class: DeviceClass) -> AllocPolicy {
    match device_class {
        DeviceClass::Ssd => AllocPolicy::empty(),
        DeviceClass::Hdd | DeviceClass::Zns | DeviceClass::Tape => AllocPolicy::SEQ,
    }
}

/// Profile contribution to the allocation policy mask.
#[must_use]
pub const fn profile_policy(profile: Profile) -> AllocPolicy {
    match profile {
        Profile::Pico | Profile::Usb => AllocPolicy::SEQ,
        Profile::System | Profile::Ai | Profile::Archive | Profile::HyperCloud => AllocPolicy::empty(),
    }
}

/// `k_limit` for a per-block/shadow allocation: `0` under `SEQ`, else the
/// full 12-shell search.
#[must_use]
pub fn k_limit(device_class: DeviceClass, profile: Profile) -> u8 {
    let mask = device_policy(device_class) | profile_policy(profile);
    if mask.contains(AllocPolicy::SEQ) {
        0
    } else {
        12
    }
}

/// Maximum probe attempts during genesis: 128 for deep-scan
/// profiles (AI, Archive — both benefit from exhaustive placement search),
/// 20 otherwise.
#[must_use]
pub const fn max_genesis_probes(profile: Profile) -> u32 {
    match profile {
        Profile::Ai | Profile::Archive => 128,
        _ => 20,
    }
}

/// Tail-check width for genesis head/tail validation:
/// `N∈[1..4]` on SSD, `[1..8]` on HDD.
#[must_use]
pub const fn tail_check_width(device_class: DeviceClass) -> u64 {
    match device_class {
        DeviceClass::Hdd => 8,
        _ => 4,
    }
}

/// One entry of the write-retry policy table: `(retry_count, sleep_us)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub sleep_us: u64,
}

/// 16-entry (2 device-buckets × profile-ish buckets Phase 7)
/// write-retry policy table: rotational media doubles both the sleep and
/// the retry count relative to non-rotational media.
#[must_use]
pub fn write_retry_policy(device_class: DeviceClass, profile: Profile) -> RetryPolicy {
    let rotational = matches!(device_class, DeviceClass::Hdd | DeviceClass::Tape);
    let base_retries: u32 = match profile {
        Profile::Pico => 2,
        Profile::HyperCloud => 5,
        _ => 3,
    };
    let base_sleep_us: u64 = match profile {
        Profile::Pico => 500,
        Profile::HyperCloud => 2_000,
        _ => 1_000,
    };
    if rotational {
        RetryPolicy { retries: (base_retries * 2).min(5), sleep_us: base_sleep_us * 2 }
    } else {
        RetryPolicy { retries: base_retries.min(5), sleep_us: base_sleep_us }
    }
}
