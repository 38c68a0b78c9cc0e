//! Shared log ring layout.
//!
//! The secure side owns this layout; the host only reads it. It must match
//! byte for byte what the producer's compiler lays out, so it is spelled out
//! explicitly rather than left to struct packing.
//!
//! # Memory Layout
//!
//! ```text
//! +-------------------------------------------------------------------+
//! | alloc: u32   end of every byte the producer has started writing   |  offset 0
//! | put:   u32   end of the last fully written, published record      |  offset 4
//! | sz:    u32   size of the data area, power of two                  |  offset 8
//! +-------------------------------------------------------------------+
//! | data[sz]     addressed as data[counter & (sz - 1)]                |  offset 12
//! +-------------------------------------------------------------------+
//! ```
//!
//! `alloc` and `put` only ever grow (modulo 2^32). `alloc - put` is the
//! amount of data in flight. Nothing stops the producer from running more
//! than `sz` bytes ahead of the reader; see [`crate::reader`] for how the
//! reader notices.

use core::mem::{align_of, size_of};
use core::ptr;

use crate::reader::LogReader;
use crate::region::Region;
use crate::sync::{AtomicU8, AtomicU32, Ordering};
use crate::writer::LogWriter;

/// Log ring header (12 bytes).
///
/// Every field is written by the producer. `sz` is written once, when the
/// secure side adopts the region, but it is still producer memory and is
/// read atomically like the counters.
#[repr(C)]
pub struct LogRingHeader {
    /// Reservation counter ("reserved").
    pub alloc: AtomicU32,
    /// Publication counter ("committed").
    pub put: AtomicU32,
    /// Data area size in bytes.
    pub sz: AtomicU32,
}

#[cfg(not(feature = "loom"))]
mod layout_checks {
    use super::LogRingHeader;
    use core::mem::{offset_of, size_of};
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<LogRingHeader>(), 12);
    const_assert_eq!(offset_of!(LogRingHeader, alloc), 0);
    const_assert_eq!(offset_of!(LogRingHeader, put), 4);
    const_assert_eq!(offset_of!(LogRingHeader, sz), 8);
    const_assert_eq!(super::LOG_RING_DATA_OFFSET, 12);
}

/// Offset of the data area from the start of the region.
pub const LOG_RING_DATA_OFFSET: usize = {
    let header = size_of::<LogRingHeader>();
    let align = align_of::<AtomicU8>();
    header.div_ceil(align) * align
};

impl LogRingHeader {
    pub fn new(sz: u32) -> Self {
        Self {
            alloc: AtomicU32::new(0),
            put: AtomicU32::new(0),
            sz: AtomicU32::new(sz),
        }
    }
}

/// Snapshot of the header counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStatus {
    pub alloc: u32,
    pub put: u32,
    pub sz: u32,
}

/// A log ring laid out over a memory region.
///
/// The header sits at offset 0. `LogRing` itself holds no state; the
/// consumer's cursor lives with whoever drains it.
#[derive(Clone, Copy)]
pub struct LogRing {
    region: Region,
}

unsafe impl Send for LogRing {}
unsafe impl Sync for LogRing {}

impl LogRing {
    /// Lay out a fresh ring in the region, as the producer does when it
    /// adopts a newly shared buffer.
    ///
    /// # Safety
    ///
    /// The region must be writable and not concurrently accessed during
    /// initialization.
    pub unsafe fn init(region: Region, sz: u32) -> Self {
        let ring = unsafe { Self::attach(region) };
        assert!(
            sz as usize <= ring.data_len(),
            "region too small for a {sz}-byte ring"
        );

        // SAFETY: attach checked size and alignment; we have exclusive access.
        unsafe {
            ptr::write(region.as_ptr() as *mut LogRingHeader, LogRingHeader::new(sz));
            let data = region.offset(LOG_RING_DATA_OFFSET) as *mut AtomicU8;
            for i in 0..ring.data_len() {
                ptr::write(data.add(i), AtomicU8::new(0));
            }
        }
        ring
    }

    /// View a region whose layout the producer owns.
    ///
    /// Nothing in the header is validated here: the producer may not have
    /// filled it in yet, and the reader re-checks `sz` on every drain.
    ///
    /// # Safety
    ///
    /// The region must stay valid for the lifetime of the returned ring and
    /// any handle derived from it, and must hold an initialized header
    /// (zeroed memory counts, outside loom).
    pub unsafe fn attach(region: Region) -> Self {
        assert!(
            region.len() >= LOG_RING_DATA_OFFSET,
            "region too small for log ring header"
        );
        assert!(
            (region.as_ptr() as usize).is_multiple_of(align_of::<LogRingHeader>()),
            "log ring header misaligned"
        );
        Self { region }
    }

    #[inline]
    pub fn header(&self) -> &LogRingHeader {
        // SAFETY: size and alignment checked in attach.
        unsafe { self.region.get::<LogRingHeader>(0) }
    }

    #[inline]
    pub fn region(&self) -> Region {
        self.region
    }

    /// Number of data bytes the backing region can hold. This, not the
    /// producer's `sz`, bounds every access.
    #[inline]
    pub fn data_len(&self) -> usize {
        (self.region.len() - LOG_RING_DATA_OFFSET) / size_of::<AtomicU8>()
    }

    /// The first `len` bytes of the data area.
    ///
    /// Panics if `len` exceeds [`data_len`](Self::data_len).
    #[inline]
    pub fn data(&self, len: usize) -> &[AtomicU8] {
        assert!(len <= self.data_len(), "data view out of bounds");
        // SAFETY: within the region per the check above.
        unsafe {
            let base = self.region.offset(LOG_RING_DATA_OFFSET) as *const AtomicU8;
            core::slice::from_raw_parts(base, len)
        }
    }

    /// Consumer handle.
    #[inline]
    pub fn reader(&self) -> LogReader<'_> {
        LogReader::new(self)
    }

    /// Producer handle. Only one should exist at a time.
    #[inline]
    pub fn writer(&self) -> LogWriter<'_> {
        LogWriter::new(self)
    }

    /// Returns a snapshot of the header.
    pub fn status(&self) -> RingStatus {
        let header = self.header();
        let put = header.put.load(Ordering::Acquire);
        let alloc = header.alloc.load(Ordering::Acquire);
        let sz = header.sz.load(Ordering::Relaxed);
        RingStatus { alloc, put, sz }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::region::HeapRegion;

    #[test]
    fn test_zeroed_region_reads_as_empty_ring() {
        let mem = HeapRegion::new_zeroed(4096);
        let ring = unsafe { LogRing::attach(mem.region()) };
        assert_eq!(
            ring.status(),
            RingStatus {
                alloc: 0,
                put: 0,
                sz: 0
            }
        );
        assert_eq!(ring.data_len(), 4096 - 12);
    }

    #[test]
    fn test_init_writes_size() {
        let mem = HeapRegion::new_zeroed(64);
        let ring = unsafe { LogRing::init(mem.region(), 32) };
        assert_eq!(ring.status().sz, 32);
        assert_eq!(ring.data(32).len(), 32);
    }

    #[test]
    #[should_panic(expected = "region too small")]
    fn test_init_rejects_oversized_ring() {
        let mem = HeapRegion::new_zeroed(32);
        let _ = unsafe { LogRing::init(mem.region(), 32) };
    }

    #[test]
    #[should_panic(expected = "data view out of bounds")]
    fn test_data_view_is_bounded_by_region() {
        let mem = HeapRegion::new_zeroed(32);
        let ring = unsafe { LogRing::attach(mem.region()) };
        let _ = ring.data(64);
    }
}
