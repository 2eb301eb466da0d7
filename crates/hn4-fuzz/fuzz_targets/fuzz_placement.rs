#![no_main]
use libfuzzer_sys::fuzz_target;

use hn4_core::placement::{trajectory, FluxGeometry};
use hn4_hal::{DeviceClass, Profile};

fn take_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    let end = (offset + 8).min(data.len());
    if offset < end {
        bytes[..end - offset].copy_from_slice(&data[offset..end]);
    }
    u64::from_le_bytes(bytes)
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 40 {
        return;
    }
    let flux_start_lba = take_u64(data, 0) % (1 << 40);
    let flux_blocks = take_u64(data, 8) % (1 << 30);
    let g = take_u64(data, 16);
    let v = take_u64(data, 24);
    let n = take_u64(data, 32);
    let m = data[0] % 17;
    let k = data[1] % 13;
    let device_class = match data[2] % 4 {
        0 => DeviceClass::Ssd,
        1 => DeviceClass::Hdd,
        2 => DeviceClass::Zns,
        _ => DeviceClass::Tape,
    };
    let profile = match data[3] % 6 {
        0 => Profile::System,
        1 => Profile::Pico,
        2 => Profile::Usb,
        3 => Profile::Ai,
        4 => Profile::Archive,
        _ => Profile::HyperCloud,
    };

    let geo = FluxGeometry { flux_start_lba, flux_blocks };
    // `trajectory` is pure and total over its documented domain: it must
    // never panic, and any `Ok` result must land within the Flux region it
    // was given (invariant 2's bijection property, weakened to a
    // containment check a fuzzer can cheaply verify on arbitrary inputs).
    if let Ok(block_index) = trajectory(&geo, g, v, n, m, k, device_class, profile) {
        assert!(block_index >= flux_start_lba || flux_blocks == 0, "trajectory landed before the Flux region");
    }
});
