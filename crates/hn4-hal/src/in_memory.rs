//! Reference `BlockHal` backend: a volume image held in memory.
//!
//! This is the backend every test, fixture, benchmark, and fuzz target in
//! this workspace runs against. It is not a production backend — real
//! device drivers are an external collaborator — it exists purely so the
//! core I/O engine has something concrete to call through.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rand::RngCore;

use crate::caps::{DeviceClass, HalCaps, HwFlags};
use crate::error::HalError;
use crate::hal::BlockHal;
use crate::io::{IoCompletion, IoOp, IoOutcome, IoRequest, IoToken};
use crate::spinlock::HalSpinlock;

/// Default logical sector size used by the in-memory image.
pub const SECTOR_SIZE: u32 = 512;

pub struct InMemoryHal {
    image: RwLock<Vec<u8>>,
    caps: HalCaps,
    spinlock: HalSpinlock,
    clock_ns: AtomicU64,
    next_token: AtomicU64,
    pending: Mutex<VecDeque<IoCompletion>>,
    barrier_count: AtomicU64,
    /// Zone size in sectors, for `ZoneAppend`/`ZoneReset` emulation.
    zone_sectors: u64,
    /// Per-zone write pointer, in sectors relative to zone start.
    zone_pointers: Mutex<Vec<u64>>,
    /// `0xFFFF_FFFF` (topology unknown) unless overridden by
    /// `set_calling_gpu_id`.
    gpu_id: AtomicU32,
}

impl InMemoryHal {
    #[must_use]
    pub fn new(total_bytes: u64, device_class: DeviceClass, hw_flags: HwFlags, zone_size_bytes: u64) -> Self {
        let zone_sectors = if zone_size_bytes == 0 {
            0
        } else {
            zone_size_bytes / u64::from(SECTOR_SIZE)
        };
        let zone_count = if zone_sectors == 0 {
            0
        } else {
            (total_bytes / zone_size_bytes).max(1) as usize
        };
        Self {
            image: RwLock::new(vec![0u8; total_bytes as usize]),
            caps: HalCaps {
                logical_block_size: SECTOR_SIZE,
                total_capacity_bytes: total_bytes,
                queue_count: 1,
                hw_flags,
                zone_size_bytes,
                device_class,
            },
            spinlock: HalSpinlock::new(),
            clock_ns: AtomicU64::new(0),
            next_token: AtomicU64::new(1),
            pending: Mutex::new(VecDeque::new()),
            barrier_count: AtomicU64::new(0),
            zone_sectors,
            zone_pointers: Mutex::new(vec![0u64; zone_count]),
            gpu_id: AtomicU32::new(0xFFFF_FFFF),
        }
    }

    /// Override `get_calling_gpu_id`'s return value, simulating a caller
    /// with known GPU topology.
    pub fn set_calling_gpu_id(&self, gpu_id: u32) {
        self.gpu_id.store(gpu_id, Ordering::Relaxed);
    }

    #[must_use]
    pub fn barrier_count(&self) -> u64 {
        self.barrier_count.load(Ordering::Relaxed)
    }

    /// Fast-forward the clock by `delta_ns`. `get_time_ns`/`sync_io` only
    /// ever tick it forward by 1 per call, which real wall-clock time never
    /// does; tests that need to cross a multi-hour grace period (the
    /// Reaper's tombstone window) use this instead of calling
    /// the HAL billions of times.
    pub fn advance_clock(&self, delta_ns: u64) {
        self.clock_ns.fetch_add(delta_ns, Ordering::Relaxed);
    }

    fn byte_range(lba: u64, sectors: u32) -> (usize, usize) {
        let start = lba as usize * SECTOR_SIZE as usize;
        let len = sectors as usize * SECTOR_SIZE as usize;
        (start, start + len)
    }

    fn do_read(&self, lba: u64, buf: &mut [u8], sectors: u32) -> Result<IoOutcome, HalError> {
        let (start, end) = Self::byte_range(lba, sectors);
        let image = self.image.read();
        if end > image.len() || buf.len() < end - start {
            return Err(HalError::OutOfRange);
        }
        buf[..end - start].copy_from_slice(&image[start..end]);
        Ok(IoOutcome { landed_lba: lba, sectors_done: sectors })
    }

    fn do_write(&self, lba: u64, buf: &[u8], sectors: u32) -> Result<IoOutcome, HalError> {
        let (start, end) = Self::byte_range(lba, sectors);
        let mut image = self.image.write();
        if end > image.len() || buf.len() < end - start {
            return Err(HalError::OutOfRange);
        }
        image[start..end].copy_from_slice(&buf[..end - start]);
        Ok(IoOutcome { landed_lba: lba, sectors_done: sectors })
    }

    fn do_discard(&self, lba: u64, sectors: u32) -> Result<IoOutcome, HalError> {
        let (start, end) = Self::byte_range(lba, sectors);
        let mut image = self.image.write();
        if end > image.len() {
            return Err(HalError::OutOfRange);
        }
        image[start..end].iter_mut().for_each(|b| *b = 0);
        Ok(IoOutcome { landed_lba: lba, sectors_done: sectors })
    }

    fn do_zone_append(&self, zone_lba: u64, buf: &[u8], sectors: u32) -> Result<IoOutcome, HalError> {
        if self.zone_sectors == 0 {
            return Err(HalError::Unsupported);
        }
        let zone_idx = (zone_lba / self.zone_sectors) as usize;
        let mut pointers = self.zone_pointers.lock();
        let ptr = pointers.get_mut(zone_idx).ok_or(HalError::OutOfRange)?;
        if *ptr + u64::from(sectors) > self.zone_sectors {
            return Err(HalError::OutOfRange);
        }
        let landed = zone_idx as u64 * self.zone_sectors + *ptr;
        *ptr += u64::from(sectors);
        drop(pointers);
        self.do_write(landed, buf, sectors)?;
        Ok(IoOutcome { landed_lba: landed, sectors_done: sectors })
    }

    fn do_zone_reset(&self, zone_lba: u64, sectors: u32) -> Result<IoOutcome, HalError> {
        if self.zone_sectors == 0 {
            return Err(HalError::Unsupported);
        }
        let zone_idx = (zone_lba / self.zone_sectors) as usize;
        let zone_start = zone_idx as u64 * self.zone_sectors;
        self.do_discard(zone_start, self.zone_sectors as u32)?;
        let mut pointers = self.zone_pointers.lock();
        if let Some(ptr) = pointers.get_mut(zone_idx) {
            *ptr = 0;
        }
        Ok(IoOutcome { landed_lba: zone_start, sectors_done: sectors })
    }
}

impl BlockHal for InMemoryHal {
    fn sync_io(&self, op: IoOp, lba: u64, buf: &mut [u8], sectors: u32) -> Result<IoOutcome, HalError> {
        self.clock_ns.fetch_add(1, Ordering::Relaxed);
        match op {
            IoOp::Read => self.do_read(lba, buf, sectors),
            IoOp::Write => self.do_write(lba, buf, sectors),
            IoOp::Discard => self.do_discard(lba, sectors),
            IoOp::ZoneAppend => self.do_zone_append(lba, buf, sectors),
            IoOp::ZoneReset => self.do_zone_reset(lba, sectors),
        }
    }

    fn submit_io(&self, req: IoRequest) -> Result<IoToken, HalError> {
        let token = IoToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        // The in-memory backend has no real queue depth; resolve immediately
        // and park the completion for `poll`.
        let mut scratch = vec![0u8; req.sectors as usize * SECTOR_SIZE as usize];
        let result = self.sync_io(req.op, req.lba, &mut scratch, req.sectors);
        self.pending.lock().push_back(IoCompletion { token, result });
        Ok(token)
    }

    fn poll(&self) -> Vec<IoCompletion> {
        let mut pending = self.pending.lock();
        pending.drain(..).collect()
    }

    fn barrier(&self) -> Result<(), HalError> {
        self.barrier_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get_time_ns(&self) -> u64 {
        self.clock_ns.fetch_add(1, Ordering::Relaxed)
    }

    fn get_random_u64(&self) -> u64 {
        rand::thread_rng().next_u64()
    }

    fn spinlock(&self) -> &HalSpinlock {
        &self.spinlock
    }

    fn micro_sleep(&self, _us: u64) {
        std::thread::yield_now();
    }

    fn get_caps(&self) -> HalCaps {
        self.caps
    }

    fn get_calling_gpu_id(&self) -> u32 {
        self.gpu_id.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hal() -> InMemoryHal {
        InMemoryHal::new(1 << 20, DeviceClass::Ssd, HwFlags::empty(), 0)
    }

    #[test]
    fn write_then_read_round_trips() {
        let h = hal();
        let payload = vec![0xAAu8; 512];
        h.sync_io(IoOp::Write, 10, &mut payload.clone(), 1).unwrap();
        let mut out = vec![0u8; 512];
        h.sync_io(IoOp::Read, 10, &mut out, 1).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn discard_zeroes() {
        let h = hal();
        h.sync_io(IoOp::Write, 0, &mut vec![0x7Fu8; 512], 1).unwrap();
        h.sync_io(IoOp::Discard, 0, &mut [], 1).unwrap();
        let mut out = vec![0xFFu8; 512];
        h.sync_io(IoOp::Read, 0, &mut out, 1).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn zone_append_advances_write_pointer() {
        let h = InMemoryHal::new(1 << 20, DeviceClass::Zns, HwFlags::ZONED, 4096);
        let zone_sectors = 4096 / u64::from(SECTOR_SIZE);
        let out1 = h.sync_io(IoOp::ZoneAppend, 0, &mut vec![1u8; 512], 1).unwrap();
        let out2 = h.sync_io(IoOp::ZoneAppend, 0, &mut vec![2u8; 512], 1).unwrap();
        assert_eq!(out1.landed_lba, 0);
        assert_eq!(out2.landed_lba, 1);
        assert!(u64::from(out2.sectors_done) <= zone_sectors);
    }

    #[test]
    fn advance_clock_jumps_forward_without_extra_calls() {
        let h = hal();
        let before = h.get_time_ns();
        h.advance_clock(1_000_000);
        let after = h.get_time_ns();
        assert!(after - before >= 1_000_000);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let h = hal();
        let mut buf = vec![0u8; 512];
        let res = h.sync_io(IoOp::Read, u64::MAX / 512, &mut buf, 1);
        assert!(matches!(res, Err(HalError::OutOfRange)));
    }
}
