//! The Scavenger: five independent, cooperatively-scheduled
//! background sub-tasks sharing one [`VolumeContext`]. Each sub-task does a
//! small bounded unit of work per call and returns; nothing here blocks
//! waiting for more work to show up. The caller (the `hn4` façade's
//! background loop) supplies the cadence by calling [`pulse`] repeatedly.

pub mod auditor;
pub mod evacuator;
pub mod medic;
pub mod reaper;
pub mod stitcher;

use std::sync::atomic::Ordering;

use hn4_hal::BlockHal;

use crate::cortex::VolumeContext;
use crate::geometry::VolumeGeometry;

/// Evacuator and Auditor run every 100 pulses; Reaper, Stitcher, and Medic
/// run (or at least check in) every pulse.
const SLOW_CADENCE_PULSES: u64 = 100;

/// Drive one scavenger pulse across every sub-task. Intended to
/// be called in a loop from a dedicated background thread/task for the
/// lifetime of the mount, stopping once [`VolumeContext::is_unmounting`]
/// returns `true`.
pub fn pulse(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry) {
    let n = ctx.pulse_count.fetch_add(1, Ordering::Relaxed);

    reaper::pulse(ctx, hal, geometry);
    stitcher::pulse(ctx, hal, geometry);
    medic::pulse(ctx, hal, geometry);

    if n % SLOW_CADENCE_PULSES == 0 {
        evacuator::pulse(ctx, hal, geometry);
        auditor::pulse(ctx, hal, geometry);
    }
}
