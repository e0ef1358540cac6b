//! Animal-ID reader: one identifier string per scan, deduplicating
//! repeated reads.

use std::time::{Duration, Instant};

/// Default fixed decoder length, in bytes, used to terminate a scan if
/// neither CR nor LF arrives first.
pub const DEFAULT_MAX_ID_LEN: usize = 10;

/// Silence duration after which the dedupe anchor is cleared, allowing the
/// same tag to be read again.
pub const DEDUPE_TIMEOUT: Duration = Duration::from_secs(3);

/// Accumulates printable bytes from a UART (or any byte source) into scans,
/// collapsing consecutive identical reads until the dedupe anchor times out.
pub struct AnimalIdReader {
    max_len: usize,
    buffer: String,
    last_read: Option<(String, Instant)>,
    now: fn() -> Instant,
}

impl AnimalIdReader {
    pub fn new() -> Self {
        Self {
            max_len: DEFAULT_MAX_ID_LEN,
            buffer: String::new(),
            last_read: None,
            now: Instant::now,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    #[cfg(test)]
    fn with_clock(mut self, now: fn() -> Instant) -> Self {
        self.now = now;
        self
    }

    /// Feeds one byte from the wire. Returns `Some(id)` the moment a scan
    /// completes and is not a duplicate of the still-live previous scan.
    pub fn feed_byte(&mut self, byte: u8) -> Option<String> {
        let is_terminator = byte == b'\r' || byte == b'\n';
        if !is_terminator && byte.is_ascii_graphic() {
            self.buffer.push(byte as char);
        }

        let complete = is_terminator || self.buffer.len() >= self.max_len;
        if !complete || self.buffer.is_empty() {
            return None;
        }

        let id = std::mem::take(&mut self.buffer);
        self.emit(id)
    }

    fn emit(&mut self, id: String) -> Option<String> {
        let now = (self.now)();
        if let Some((last_id, last_at)) = &self.last_read {
            if *last_id == id && now.duration_since(*last_at) < DEDUPE_TIMEOUT {
                self.last_read = Some((id, now));
                return None;
            }
        }
        self.last_read = Some((id.clone(), now));
        Some(id)
    }
}

impl Default for AnimalIdReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    thread_local! {
        static FAKE_NOW: Cell<Instant> = Cell::new(Instant::now());
    }

    fn fake_now() -> Instant {
        FAKE_NOW.with(|c| c.get())
    }

    fn advance(by: Duration) {
        FAKE_NOW.with(|c| c.set(c.get() + by));
    }

    fn feed_str(reader: &mut AnimalIdReader, s: &str) -> Vec<String> {
        let mut out = Vec::new();
        for b in s.bytes() {
            if let Some(id) = reader.feed_byte(b) {
                out.push(id);
            }
        }
        out
    }

    #[test]
    fn reads_one_id_terminated_by_cr() {
        let mut reader = AnimalIdReader::new();
        let ids = feed_str(&mut reader, "1000042\r");
        assert_eq!(ids, vec!["1000042".to_string()]);
    }

    #[test]
    fn reads_one_id_terminated_by_fixed_length() {
        let mut reader = AnimalIdReader::new().with_max_len(4);
        let ids = feed_str(&mut reader, "ABCD");
        assert_eq!(ids, vec!["ABCD".to_string()]);
    }

    #[test]
    fn consecutive_identical_reads_are_deduplicated() {
        advance(Duration::ZERO);
        let mut reader = AnimalIdReader::new().with_clock(fake_now);
        let first = feed_str(&mut reader, "42\r");
        let second = feed_str(&mut reader, "42\r");
        assert_eq!(first, vec!["42".to_string()]);
        assert!(second.is_empty());
    }

    #[test]
    fn dedupe_anchor_clears_after_silence() {
        let mut reader = AnimalIdReader::new().with_clock(fake_now);
        let first = feed_str(&mut reader, "42\r");
        advance(DEDUPE_TIMEOUT + Duration::from_millis(1));
        let second = feed_str(&mut reader, "42\r");
        assert_eq!(first, vec!["42".to_string()]);
        assert_eq!(second, vec!["42".to_string()]);
    }
}
