#![no_main]
use libfuzzer_sys::fuzz_target;

use hn4_core::types::block::{BlockHeader, BLOCK_HEADER_SIZE};

fuzz_target!(|data: &[u8]| {
    if data.len() < BLOCK_HEADER_SIZE {
        return;
    }
    let mut buf = [0u8; BLOCK_HEADER_SIZE];
    buf.copy_from_slice(&data[..BLOCK_HEADER_SIZE]);

    // Parsing an arbitrary buffer must never panic: either it comes back
    // as a well-formed header, or it's rejected as a phantom block / header
    // rot, nothing else.
    if let Ok(header) = BlockHeader::from_bytes(&buf) {
        // A header that parsed clean must re-serialize to bytes that parse
        // right back to the same value.
        let reencoded = header.to_bytes();
        let reparsed = BlockHeader::from_bytes(&reencoded).expect("freshly serialized header failed to parse");
        assert_eq!(header, reparsed);
    }
});
