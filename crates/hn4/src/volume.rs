//! Volume lifecycle: [`format_volume`], [`Volume::mount`], [`Volume::unmount`].
//!
//! This intentionally stops well short of the full bootstrap/epoch-ring
//! rotation machinery places out of scope: `format_volume` persists
//! only the geometry-carrying superblock, and `mount` always starts a
//! volume from a fresh (empty) Cortex and bitmap rather than replaying an
//! on-media anchor table. Good enough to stand a volume up and exercise
//! every anchor-level operation against it; not a crash-recovery story.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use hn4_core::cortex::VolumeContext;
use hn4_core::error::Hn4Error;
use hn4_core::geometry::VolumeGeometry;
use hn4_core::placement::FluxGeometry;
use hn4_core::scavenger;
use hn4_core::telemetry::{LogSink, NullSink};
use hn4_hal::{BlockHal, DeviceClass, Profile};

use crate::superblock::{self, SuperBlock, SUPERBLOCK_SIZE};

/// Epoch ring reservation immediately following the North superblock copy:
/// 1 MB, enough for the 128-byte epoch headers. Its rotation machinery is
/// out of scope; only the space is reserved so `flux_start_lba` does not
/// overlap it.
const EPOCH_RING_BYTES: u64 = 1 << 20;

/// Parameters for [`format_volume`].
pub struct FormatOptions {
    pub device_class: DeviceClass,
    pub profile: Profile,
    pub block_size: u32,
    /// Logical blocks reserved at the tail of the device for the Horizon
    /// overflow ring.
    pub horizon_capacity_blocks: u64,
}

/// Lay out a fresh [`VolumeGeometry`] across the HAL's reported capacity
/// and persist it as the on-media superblock. Does not
/// initialize any Flux-region content; a freshly formatted volume simply
/// has every block unclaimed until the allocator claims it.
pub fn format_volume(hal: &dyn BlockHal, options: &FormatOptions) -> Result<VolumeGeometry, Hn4Error> {
    let caps = hal.get_caps();
    if options.block_size == 0
        || options.block_size < caps.logical_block_size
        || options.block_size % caps.logical_block_size != 0
    {
        return Err(Hn4Error::InvalidArgument);
    }

    let blocks_per_device = caps.total_capacity_bytes / u64::from(options.block_size);
    if blocks_per_device <= options.horizon_capacity_blocks {
        return Err(Hn4Error::InvalidArgument);
    }
    let flux_blocks = blocks_per_device - options.horizon_capacity_blocks;

    let reserved_bytes = SUPERBLOCK_SIZE as u64 + EPOCH_RING_BYTES;
    let flux_start_lba = reserved_bytes.div_ceil(u64::from(options.block_size));
    if flux_start_lba >= flux_blocks {
        return Err(Hn4Error::InvalidArgument);
    }

    let geometry = VolumeGeometry {
        flux: FluxGeometry { flux_start_lba, flux_blocks: flux_blocks - flux_start_lba },
        horizon_start_block: flux_blocks,
        horizon_capacity_blocks: options.horizon_capacity_blocks,
        block_size: options.block_size,
        sector_size: caps.logical_block_size,
        device_class: options.device_class,
        profile: options.profile,
    };

    let sb = SuperBlock::from_geometry(&geometry, false);
    superblock::write_copies(hal, caps.total_capacity_bytes, &sb)?;
    Ok(geometry)
}

/// Options accepted by [`Volume::mount`].
pub struct MountOptions {
    pub read_only: bool,
    pub sink: Arc<dyn LogSink>,
    /// Background scavenger cadence. `None` disables the background thread
    /// entirely (tests that want to call [`hn4_core::scavenger::pulse`]
    /// manually use this instead).
    pub scavenger_interval: Option<Duration>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self { read_only: false, sink: Arc::new(NullSink), scavenger_interval: Some(Duration::from_millis(50)) }
    }
}

/// A mounted volume: owns the [`VolumeContext`] and, if requested, a
/// background thread driving [`scavenger::pulse`] for the lifetime of the
/// mount; the caller supplies the cadence. Takes the HAL by `Arc` rather
/// than by reference so that cadence thread can hold its own handle
/// without borrowing the caller.
pub struct Volume {
    pub(crate) ctx: Arc<VolumeContext>,
    pub(crate) hal: Arc<dyn BlockHal>,
    pub(crate) geometry: VolumeGeometry,
    pub(crate) last_alloc_g: Mutex<Option<u64>>,
    scavenger_thread: Option<JoinHandle<()>>,
}

impl Volume {
    /// Mount: read back the superblock (quorum of 3) and start a
    /// fresh `VolumeContext`. Does not attempt to reconstruct the Cortex or
    /// Armored Bitmap from media; both live purely in RAM for the lifetime
    /// of the mount (bootstrap/epoch-ring rotation is out of
    /// scope).
    pub fn mount(hal: Arc<dyn BlockHal>, options: MountOptions) -> Result<Self, Hn4Error> {
        let caps = hal.get_caps();
        let sb = superblock::read_quorum(hal.as_ref(), caps.total_capacity_bytes)?;
        let geometry = sb.geometry();

        let ctx = Arc::new(VolumeContext::new(geometry.total_blocks(), options.read_only, options.sink));

        let scavenger_thread = options.scavenger_interval.filter(|_| !options.read_only).map(|interval| {
            let ctx = Arc::clone(&ctx);
            let hal = Arc::clone(&hal);
            std::thread::spawn(move || {
                while !ctx.is_unmounting() {
                    scavenger::pulse(&ctx, hal.as_ref(), &geometry);
                    std::thread::sleep(interval);
                }
            })
        });

        Ok(Self { ctx, hal, geometry, last_alloc_g: Mutex::new(None), scavenger_thread })
    }

    /// Stop the scavenger thread and mark the superblock clean, clearing
    /// the DIRTY flag set by a graceful unmount.
    pub fn unmount(mut self) -> Result<(), Hn4Error> {
        self.ctx.request_unmount();
        if let Some(handle) = self.scavenger_thread.take() {
            let _ = handle.join();
        }
        let caps = self.hal.get_caps();
        let sb = SuperBlock::from_geometry(&self.geometry, self.ctx.is_dirty());
        superblock::write_copies(self.hal.as_ref(), caps.total_capacity_bytes, &sb)?;
        Ok(())
    }

    #[must_use]
    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    #[must_use]
    pub fn context(&self) -> &VolumeContext {
        self.ctx.as_ref()
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        self.ctx.request_unmount();
        if let Some(handle) = self.scavenger_thread.take() {
            let _ = handle.join();
        }
    }
}
