//! Line assembly out of the ring's data area.

use crate::sync::{AtomicU8, Ordering};

/// Default scratch size for one line, terminator included.
pub const DEFAULT_LINE_BUFFER_SIZE: usize = 256;

/// Fixed-capacity scratch for one line.
///
/// Holds at most `N - 1` bytes followed by a NUL terminator, so the contents
/// can be handed to C-style sinks unchanged.
pub struct LineBuffer<const N: usize = DEFAULT_LINE_BUFFER_SIZE> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> LineBuffer<N> {
    const CAPACITY_OK: () = assert!(N >= 2, "line buffer needs room for a byte and a terminator");

    pub const fn new() -> Self {
        let () = Self::CAPACITY_OK;
        Self {
            buf: [0; N],
            len: 0,
        }
    }

    /// Maximum number of payload bytes per line.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Copied bytes, including a trailing newline if one was read.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Copied bytes plus the NUL terminator.
    #[inline]
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf[..=self.len]
    }

    /// The line as emitted: copied bytes without the trailing newline.
    #[inline]
    pub fn line(&self) -> &[u8] {
        match self.as_bytes() {
            [rest @ .., b'\n'] => rest,
            all => all,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if the last copy stopped on a newline rather than a bound.
    #[inline]
    pub fn ends_with_newline(&self) -> bool {
        self.as_bytes().last() == Some(&b'\n')
    }

}

impl<const N: usize> Default for LineBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> core::fmt::Debug for LineBuffer<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LineBuffer")
            .field("len", &self.len)
            .field("line", &self.as_bytes().escape_ascii())
            .finish()
    }
}

/// Copy one line from `data` starting at counter `start` into `line`.
///
/// Copies until a newline has been copied or `min(end - start, N - 1)` bytes
/// have been copied, whichever comes first, then terminates the scratch.
/// Returns the number of source bytes consumed. A line longer than the
/// scratch comes back truncated and the rest is picked up by the next call.
///
/// `data.len()` must be a power of two; counters are masked into it, so the
/// copy never leaves `data` whatever `start` and `end` are. Bytes are loaded
/// relaxed: whether they are worth anything is for the caller to decide
/// after the copy.
pub fn read_line<const N: usize>(
    data: &[AtomicU8],
    start: u32,
    end: u32,
    line: &mut LineBuffer<N>,
) -> u32 {
    debug_assert!(data.len().is_power_of_two());
    let mask = data.len() - 1;
    let max = (end.wrapping_sub(start) as usize).min(N - 1);

    let mut i = 0;
    let mut get = start;
    while i < max {
        let c = data[get as usize & mask].load(Ordering::Relaxed);
        line.buf[i] = c;
        i += 1;
        get = get.wrapping_add(1);
        if c == b'\n' {
            break;
        }
    }
    line.buf[i] = 0;
    line.len = i;

    i as u32
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn ring_data(bytes: &[u8]) -> Vec<AtomicU8> {
        assert!(
            bytes.len().is_power_of_two(),
            "fixture is {} bytes, data areas are powers of two",
            bytes.len()
        );
        bytes.iter().map(|&b| AtomicU8::new(b)).collect()
    }

    #[test]
    fn test_stops_after_newline() {
        let data = ring_data(b"hi\nthere\n\0\0\0\0\0\0\0");
        let mut line = LineBuffer::<256>::new();

        let n = read_line(&data, 0, 9, &mut line);
        assert_eq!(n, 3);
        assert_eq!(line.as_bytes(), b"hi\n");
        assert_eq!(line.line(), b"hi");
        assert_eq!(line.as_bytes_with_nul(), b"hi\n\0");

        let n = read_line(&data, 3, 9, &mut line);
        assert_eq!(n, 6);
        assert_eq!(line.line(), b"there");
    }

    #[test]
    fn test_stops_at_end_without_newline() {
        let data = ring_data(b"partial_\0\0\0\0\0\0\0\0");
        let mut line = LineBuffer::<256>::new();
        let n = read_line(&data, 0, 4, &mut line);
        assert_eq!(n, 4);
        assert_eq!(line.line(), b"part");
        assert!(!line.ends_with_newline());
    }

    #[test]
    fn test_truncates_at_scratch_capacity() {
        let data = ring_data(b"abcdefghijklmnop");
        let mut line = LineBuffer::<8>::new();

        // Exactly capacity - 1 bytes, no newline: emitted as is, nothing more consumed.
        let n = read_line(&data, 0, 16, &mut line);
        assert_eq!(n, 7);
        assert_eq!(line.line(), b"abcdefg");
        assert_eq!(line.as_bytes_with_nul(), b"abcdefg\0");

        let n = read_line(&data, 7, 16, &mut line);
        assert_eq!(n, 7);
        assert_eq!(line.line(), b"hijklmn");
    }

    #[test]
    fn test_newline_in_last_slot_of_capacity() {
        let data = ring_data(b"abcdef\nXXXXXXXXX");
        let mut line = LineBuffer::<8>::new();
        let n = read_line(&data, 0, 16, &mut line);
        assert_eq!(n, 7);
        assert_eq!(line.line(), b"abcdef");
        assert!(line.ends_with_newline());
    }

    #[test]
    fn test_wraps_around_data_area() {
        // "hello\n" written starting at counter 13 in a 16-byte ring.
        let mut bytes = [0u8; 16];
        for (i, &b) in b"hello\n".iter().enumerate() {
            bytes[(13 + i) & 15] = b;
        }
        let data = ring_data(&bytes);
        let mut line = LineBuffer::<256>::new();
        let n = read_line(&data, 13, 19, &mut line);
        assert_eq!(n, 6);
        assert_eq!(line.line(), b"hello");
    }

    #[test]
    fn test_wraps_around_counter_max() {
        let start = u32::MAX - 1;
        let mut bytes = [0u8; 16];
        for (i, &b) in b"wrap\n".iter().enumerate() {
            bytes[(start.wrapping_add(i as u32) & 15) as usize] = b;
        }
        let data = ring_data(&bytes);
        let mut line = LineBuffer::<256>::new();
        let n = read_line(&data, start, start.wrapping_add(5), &mut line);
        assert_eq!(n, 5);
        assert_eq!(line.line(), b"wrap");
    }

    #[test]
    fn test_empty_range_copies_nothing() {
        let data = ring_data(b"abcd");
        let mut line = LineBuffer::<16>::new();
        assert_eq!(read_line(&data, 2, 2, &mut line), 0);
        assert!(line.is_empty());
        assert_eq!(line.as_bytes_with_nul(), b"\0");
    }
}
