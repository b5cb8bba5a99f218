//! Newline-Delimited Packet Assembler
//!
//! TCP is a stream protocol: a record may arrive split across several reads,
//! and a single read may carry several records. The assembler sits between the
//! socket and the shared log and turns raw chunks back into records.
//!
//! ## How the Assembler Works
//!
//! 1. The caller appends each received chunk with [`PacketAssembler::extend`]
//! 2. The caller drains frames with [`PacketAssembler::next_frame`] until it
//!    returns `None`, then reads more data
//! 3. Each [`Frame::Record`] is the bytes before a delimiter plus the delimiter
//!
//! Bytes that were already scanned are never scanned again, so a record that
//! trickles in one byte at a time costs O(n) overall rather than O(n²).
//!
//! ## Size Policy
//!
//! With a maximum record size configured, a pending record that can no longer
//! fit is dropped and reported once as [`Frame::Discarded`]. The rest of that
//! record, up to and including its delimiter, is swallowed silently. Nothing
//! oversized ever reaches the shared log, truncated or otherwise.

use bytes::{Bytes, BytesMut};

/// The byte that terminates every record.
pub const DELIMITER: u8 = b'\n';

/// Initial capacity of the pending buffer
const INITIAL_BUFFER_SIZE: usize = 1024;

/// Output of the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete record, delimiter included.
    Record(Bytes),

    /// An oversized record was dropped. Carries the number of bytes dropped
    /// at the moment the limit was crossed.
    Discarded(usize),
}

/// Per-connection record reassembly buffer.
#[derive(Debug)]
pub struct PacketAssembler {
    /// Bytes received but not yet emitted as a record
    buffer: BytesMut,

    /// Prefix of `buffer` known to contain no delimiter
    scanned: usize,

    /// Largest record (delimiter included) that will be emitted
    max_record_size: Option<usize>,

    /// True while swallowing the tail of an oversized record
    discarding: bool,

    /// Total bytes dropped by the size policy
    discarded_bytes: u64,
}

impl Default for PacketAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketAssembler {
    /// Creates an assembler with no size limit.
    pub fn new() -> Self {
        Self::with_max_record_size(None)
    }

    /// Creates an assembler that drops records longer than `max` bytes.
    ///
    /// `None` leaves record size unbounded.
    pub fn with_max_record_size(max: Option<usize>) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            scanned: 0,
            max_record_size: max,
            discarding: false,
            discarded_bytes: 0,
        }
    }

    /// Appends a freshly received chunk to the pending buffer.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete frame, or `None` when more input is needed.
    ///
    /// Call repeatedly after each [`extend`](Self::extend): one chunk may
    /// complete several records, and they come out in arrival order.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let unscanned = &self.buffer[self.scanned..];

            match unscanned.iter().position(|&b| b == DELIMITER) {
                Some(pos) => {
                    let end = self.scanned + pos + 1;
                    let record = self.buffer.split_to(end).freeze();
                    self.scanned = 0;

                    if self.discarding {
                        // Tail of a record that was already reported
                        self.discarding = false;
                        self.discarded_bytes += record.len() as u64;
                        continue;
                    }

                    if self.exceeds_limit(record.len()) {
                        self.discarded_bytes += record.len() as u64;
                        return Some(Frame::Discarded(record.len()));
                    }

                    return Some(Frame::Record(record));
                }
                None => {
                    self.scanned = self.buffer.len();
                    return self.enforce_limit();
                }
            }
        }
    }

    /// Drops the pending bytes if they can no longer form a legal record.
    fn enforce_limit(&mut self) -> Option<Frame> {
        if self.buffer.is_empty() {
            return None;
        }

        if self.discarding {
            self.discarded_bytes += self.buffer.len() as u64;
            self.clear();
            return None;
        }

        // A pending record of `len` bytes completes at `len + 1` at the earliest
        if self.exceeds_limit(self.buffer.len() + 1) {
            let dropped = self.buffer.len();
            self.discarded_bytes += dropped as u64;
            self.clear();
            self.discarding = true;
            return Some(Frame::Discarded(dropped));
        }

        None
    }

    #[inline]
    fn exceeds_limit(&self, len: usize) -> bool {
        self.max_record_size.is_some_and(|max| len > max)
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    /// Number of bytes held for an incomplete record.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if a record has started but not yet completed.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || self.discarding
    }

    /// Total bytes dropped by the size policy over this assembler's life.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// The configured size limit, if any.
    pub fn max_record_size(&self) -> Option<usize> {
        self.max_record_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(assembler: &mut PacketAssembler) -> Vec<Frame> {
        std::iter::from_fn(|| assembler.next_frame()).collect()
    }

    fn record(s: &str) -> Frame {
        Frame::Record(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_single_record() {
        let mut asm = PacketAssembler::new();
        asm.extend(b"hello\n");
        assert_eq!(drain(&mut asm), vec![record("hello\n")]);
        assert_eq!(asm.pending(), 0);
        assert!(!asm.has_partial());
    }

    #[test]
    fn test_no_delimiter_waits() {
        let mut asm = PacketAssembler::new();
        asm.extend(b"partial");
        assert_eq!(asm.next_frame(), None);
        assert_eq!(asm.pending(), 7);
        assert!(asm.has_partial());
    }

    #[test]
    fn test_record_split_across_fragments() {
        let mut asm = PacketAssembler::new();

        asm.extend(b"frag");
        assert_eq!(asm.next_frame(), None);
        asm.extend(b"men");
        assert_eq!(asm.next_frame(), None);
        asm.extend(b"ted\n");

        assert_eq!(drain(&mut asm), vec![record("fragmented\n")]);
    }

    #[test]
    fn test_two_records_in_one_chunk() {
        let mut asm = PacketAssembler::new();
        asm.extend(b"first\nsecond\n");
        assert_eq!(drain(&mut asm), vec![record("first\n"), record("second\n")]);
    }

    #[test]
    fn test_residual_bytes_kept_for_next_record() {
        let mut asm = PacketAssembler::new();
        asm.extend(b"one\ntw");
        assert_eq!(drain(&mut asm), vec![record("one\n")]);
        assert_eq!(asm.pending(), 2);

        asm.extend(b"o\n");
        assert_eq!(drain(&mut asm), vec![record("two\n")]);
    }

    #[test]
    fn test_empty_record() {
        let mut asm = PacketAssembler::new();
        asm.extend(b"\n\n");
        assert_eq!(drain(&mut asm), vec![record("\n"), record("\n")]);
    }

    #[test]
    fn test_binary_content_passes_through() {
        let mut asm = PacketAssembler::new();
        asm.extend(&[0x00, 0xff, b'\r', 0x7f, DELIMITER]);
        assert_eq!(
            drain(&mut asm),
            vec![Frame::Record(Bytes::from_static(&[0x00, 0xff, b'\r', 0x7f, b'\n']))]
        );
    }

    #[test]
    fn test_scan_resumes_after_scanned_prefix() {
        let mut asm = PacketAssembler::new();
        asm.extend(b"abc");
        assert_eq!(asm.next_frame(), None);
        assert_eq!(asm.scanned, 3);

        asm.extend(b"d\n");
        assert_eq!(drain(&mut asm), vec![record("abcd\n")]);
        assert_eq!(asm.scanned, 0);
    }

    #[test]
    fn test_record_at_limit_is_kept() {
        let mut asm = PacketAssembler::with_max_record_size(Some(4));
        asm.extend(b"abc\n");
        assert_eq!(drain(&mut asm), vec![record("abc\n")]);
        assert_eq!(asm.discarded_bytes(), 0);
    }

    #[test]
    fn test_oversized_record_in_one_chunk_is_discarded() {
        let mut asm = PacketAssembler::with_max_record_size(Some(4));
        asm.extend(b"toolong\nok\n");
        assert_eq!(drain(&mut asm), vec![Frame::Discarded(8), record("ok\n")]);
        assert_eq!(asm.discarded_bytes(), 8);
    }

    #[test]
    fn test_oversized_pending_record_is_discarded_with_tail() {
        let mut asm = PacketAssembler::with_max_record_size(Some(4));

        asm.extend(b"abcd");
        assert_eq!(drain(&mut asm), vec![Frame::Discarded(4)]);
        assert!(asm.has_partial());

        // Tail of the dropped record is swallowed silently
        asm.extend(b"efgh");
        assert!(drain(&mut asm).is_empty());

        asm.extend(b"ij\nok\n");
        assert_eq!(drain(&mut asm), vec![record("ok\n")]);
        assert!(!asm.has_partial());
        assert_eq!(asm.discarded_bytes(), 4 + 4 + 3);

        // The next oversized record is reported again
        asm.extend(b"again\n");
        assert_eq!(drain(&mut asm), vec![Frame::Discarded(6)]);
    }

    #[test]
    fn test_unbounded_by_default() {
        let mut asm = PacketAssembler::new();
        let big = vec![b'x'; 1 << 20];
        asm.extend(&big);
        assert_eq!(asm.next_frame(), None);
        asm.extend(b"\n");

        match asm.next_frame() {
            Some(Frame::Record(r)) => assert_eq!(r.len(), (1 << 20) + 1),
            other => panic!("expected record, got {:?}", other),
        }
    }
}
