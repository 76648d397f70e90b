//! Line splitting for append-only byte streams.
//!
//! Lines are delimited by a single `\n` byte. The byte `0x0A` never occurs as a
//! continuation byte of a UTF-8 sequence, so splitting on it cannot cut a
//! multi-byte character in half. Other encodings are only safe if the same
//! holds for them (UTF-16, for example, is not supported).
//!
//! Complete lines are decoded lossily; the unterminated remainder is kept as
//! raw bytes so a character split across two reads is reassembled before it is
//! decoded.

use memchr::memchr_iter;

/// The line boundary marker.
pub const LINE_BOUNDARY: u8 = b'\n';

/// Result of one split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitOutput {
    /// Complete lines in arrival order, boundary stripped.
    pub lines: Vec<String>,
    /// Bytes after the last boundary (possibly empty).
    pub partial: Vec<u8>,
}

/// Split `previous_partial + new_bytes` into complete lines and a new partial tail.
///
/// Pure and deterministic. With no new bytes, returns no lines and the
/// unchanged partial.
#[must_use]
pub fn split(previous_partial: &[u8], new_bytes: &[u8]) -> SplitOutput {
    if new_bytes.is_empty() {
        return SplitOutput {
            lines: Vec::new(),
            partial: previous_partial.to_vec(),
        };
    }

    let mut buf = Vec::with_capacity(previous_partial.len() + new_bytes.len());
    buf.extend_from_slice(previous_partial);
    buf.extend_from_slice(new_bytes);

    let mut lines = Vec::new();
    let mut start = 0;
    for end in memchr_iter(LINE_BOUNDARY, &buf) {
        lines.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
        start = end + 1;
    }

    buf.drain(..start);
    SplitOutput {
        lines,
        partial: buf,
    }
}

/// Stateful splitter carrying the partial tail between reads.
#[derive(Debug, Clone, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning the lines they completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        if bytes.is_empty() {
            return Vec::new();
        }
        let out = split(&self.partial, bytes);
        self.partial = out.partial;
        out.lines
    }

    /// Bytes read but not yet terminated.
    #[must_use]
    pub fn partial(&self) -> &[u8] {
        &self.partial
    }

    /// Take the partial tail as a final line (used when a source ends without
    /// a trailing newline). Returns `None` when nothing is pending.
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        Some(line)
    }

    /// Discard the partial tail (truncation, rotation).
    pub fn reset(&mut self) {
        self.partial.clear();
    }
}
