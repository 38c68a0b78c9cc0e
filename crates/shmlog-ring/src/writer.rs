//! Producer side of the log ring.
//!
//! The real producer runs in the secure environment. This is a faithful
//! model of its protocol for simulations and tests: reserve by advancing
//! `alloc`, write the bytes, then publish by advancing `put`. It never looks
//! at the reader and never waits.

use crate::layout::LogRing;
use crate::sync::{Ordering, fence};

/// A span of counters claimed by [`LogWriter::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub start: u32,
    pub len: u32,
}

impl Reservation {
    #[inline]
    pub fn end(&self) -> u32 {
        self.start.wrapping_add(self.len)
    }
}

/// Producer handle for a [`LogRing`].
pub struct LogWriter<'a> {
    ring: &'a LogRing,
}

impl<'a> LogWriter<'a> {
    pub(crate) fn new(ring: &'a LogRing) -> Self {
        Self { ring }
    }

    #[inline]
    fn mask(&self) -> usize {
        let sz = self.ring.header().sz.load(Ordering::Relaxed) as usize;
        debug_assert!(sz.is_power_of_two());
        sz - 1
    }

    /// Claim `len` bytes by advancing `alloc`.
    ///
    /// The new `alloc` is made visible before any byte of the span is
    /// written, so a reader that copies the old contents will see the
    /// reservation when it validates.
    pub fn reserve(&mut self, len: u32) -> Reservation {
        let start = self.ring.header().alloc.fetch_add(len, Ordering::Relaxed);
        fence(Ordering::Release);
        Reservation { start, len }
    }

    /// Write `bytes` into a reservation, starting at its first counter.
    ///
    /// Panics if `bytes` is longer than the reservation.
    pub fn fill(&mut self, reservation: Reservation, bytes: &[u8]) {
        assert!(
            bytes.len() <= reservation.len as usize,
            "write larger than reservation"
        );
        let mask = self.mask();
        let data = self.ring.data(mask + 1);
        let mut at = reservation.start;
        for &b in bytes {
            data[at as usize & mask].store(b, Ordering::Relaxed);
            at = at.wrapping_add(1);
        }
    }

    /// Publish everything up to the end of `reservation`.
    pub fn commit(&mut self, reservation: Reservation) {
        self.ring
            .header()
            .put
            .store(reservation.end(), Ordering::Release);
    }

    /// Reserve, fill and publish `bytes` in one go.
    pub fn write(&mut self, bytes: &[u8]) {
        let reservation = self.reserve(bytes.len() as u32);
        self.fill(reservation, bytes);
        self.commit(reservation);
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::region::HeapRegion;

    #[test]
    fn test_write_advances_both_counters() {
        let mem = HeapRegion::new_zeroed(64);
        let ring = unsafe { LogRing::init(mem.region(), 16) };
        let mut writer = ring.writer();

        writer.write(b"hi\n");
        let status = ring.status();
        assert_eq!((status.alloc, status.put), (3, 3));

        let r = writer.reserve(5);
        assert_eq!(r, Reservation { start: 3, len: 5 });
        let status = ring.status();
        assert_eq!((status.alloc, status.put), (8, 3));

        writer.fill(r, b"abcde");
        writer.commit(r);
        assert_eq!(ring.status().put, 8);
    }

    #[test]
    fn test_write_wraps_data_area() {
        let mem = HeapRegion::new_zeroed(64);
        let ring = unsafe { LogRing::init(mem.region(), 16) };
        ring.writer().write(b"0123456789abcdefXY");

        let data = ring.data(16);
        assert_eq!(data[0].load(Ordering::Relaxed), b'X');
        assert_eq!(data[1].load(Ordering::Relaxed), b'Y');
        assert_eq!(data[2].load(Ordering::Relaxed), b'2');
    }

    #[test]
    #[should_panic(expected = "write larger than reservation")]
    fn test_fill_is_bounded_by_reservation() {
        let mem = HeapRegion::new_zeroed(64);
        let ring = unsafe { LogRing::init(mem.region(), 16) };
        let mut writer = ring.writer();
        let r = writer.reserve(2);
        writer.fill(r, b"abc");
    }
}
