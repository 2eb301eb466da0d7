//! Device capability reporting (`get_caps`).

/// Device class, as distinguished by the allocator's sequential-vs-ballistic
/// policy and the write-retry policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Solid-state, random-access friendly. Full collision-shell search.
    Ssd,
    /// Rotational. Sequential allocation bias, C-LOOK candidate ordering.
    Hdd,
    /// Zoned namespace. Zone-append writes, Evacuator zone packing.
    Zns,
    /// Tape. Strictly sequential, no collision-shell search.
    Tape,
}

/// Volume profile, as distinguished by allocation policy, saturation
/// sensitivity, and write retry/durability policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    /// General-purpose desktop/server volume.
    System,
    /// Deeply embedded target. Sequential allocation bias; the bitmap's
    /// non-resident sector-RMW fallback is a descoped Open Question, see
    /// `DESIGN.md`.
    Pico,
    /// Removable USB-class media. Sequential allocation bias.
    Usb,
    /// AI/ML workload profile. Topology-affinity-aware `V` selection.
    Ai,
    /// Archival/cold-storage profile. Compression preferred.
    Archive,
    /// Cloud volume backed by a battery-backed write cache; durability
    /// barriers may be deferred to journal flush (Phase 9).
    HyperCloud,
}

bitflags::bitflags! {
    /// Hardware feature flags reported by `get_caps`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HwFlags: u32 {
        /// Device is backed by non-volatile memory (persistent write buffer).
        const NVM          = 1 << 0;
        /// Device honors a strict-flush contract without an explicit barrier.
        const STRICT_FLUSH = 1 << 1;
        /// Device supports `ZONE_APPEND`/`ZONE_RESET`.
        const ZONED        = 1 << 2;
        /// Device supports range `DISCARD`.
        const DISCARD      = 1 << 3;
    }
}

/// Snapshot of device capabilities (`get_caps`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalCaps {
    pub logical_block_size: u32,
    pub total_capacity_bytes: u64,
    pub queue_count: u32,
    pub hw_flags: HwFlags,
    /// Zero for non-zoned devices.
    pub zone_size_bytes: u64,
    pub device_class: DeviceClass,
}

impl HalCaps {
    #[must_use]
    pub const fn is_zoned(&self) -> bool {
        self.hw_flags.contains(HwFlags::ZONED)
    }
}
