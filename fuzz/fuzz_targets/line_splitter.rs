#![no_main]

use libfuzzer_sys::fuzz_target;
use tailf_core::splitter::{LINE_BOUNDARY, LineSplitter, split};

fuzz_target!(|data: &[u8]| {
    if data.len() > 16_384 || data.is_empty() {
        return;
    }

    // First byte picks the chunk size so every split point gets exercised.
    let chunk = usize::from(data[0]).max(1);
    let input = &data[1..];

    let mut splitter = LineSplitter::new();
    let mut lines = 0;
    for piece in input.chunks(chunk) {
        lines += splitter.push(piece).len();
        assert!(!splitter.partial().contains(&LINE_BOUNDARY));
    }

    let whole = split(&[], input);
    assert_eq!(whole.lines.len(), lines);
    assert_eq!(whole.partial, splitter.partial());
});
