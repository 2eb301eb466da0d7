#![no_main]
use libfuzzer_sys::fuzz_target;

use hn4_core::bitmap::ecc::{ecc_check_and_fix, ecc_encode, EccStatus};

fuzz_target!(|data: &[u8]| {
    if data.len() < 9 {
        return;
    }
    let mut word_bytes = [0u8; 8];
    word_bytes.copy_from_slice(&data[0..8]);
    let word = u64::from_le_bytes(word_bytes);
    let flip_selector = data[8];

    let ecc = ecc_encode(word);

    // Clean round-trip: no flip at all.
    let (fixed, status) = ecc_check_and_fix(word, ecc);
    assert_eq!(status, EccStatus::Clean, "freshly encoded word reported non-clean");
    assert_eq!(fixed, word);

    // A single-bit flip, in either the data or the ecc byte, must always be
    // exactly correctable back to the original word (invariant 3).
    let bit = (flip_selector % 72) as u32; // 64 data bits + 8 ecc bits
    let (flipped_word, flipped_ecc) =
        if bit < 64 { (word ^ (1u64 << bit), ecc) } else { (word, ecc ^ (1u8 << (bit - 64))) };
    let (corrected, status) = ecc_check_and_fix(flipped_word, flipped_ecc);
    assert_eq!(status, EccStatus::Corrected, "single-bit flip was not reported as corrected");
    assert_eq!(corrected, word, "single-bit correction did not recover the original word");
});
