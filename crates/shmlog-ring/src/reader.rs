//! Consumer side of the log ring.
//!
//! The producer never synchronizes with the reader. It may lap the reader
//! at any time, including in the middle of a copy. The reader therefore
//! copies first and validates afterwards:
//!
//! 1. load `put` (acquire); everything before it was fully written
//! 2. acquire fence, copy one line out of `[get, put)`
//! 3. acquire fence, load `alloc` (acquire)
//! 4. if `alloc - get > sz`, the producer has reserved bytes that overlap what
//!    was just copied: throw the copy away and jump to `alloc - sz`, the
//!    oldest byte that is still intact
//!
//! `put` must be loaded before the copy and `alloc` after it. Loading
//! `alloc` first would validate against a stale reservation and let a torn
//! line through.

use crate::layout::LogRing;
use crate::line::{LineBuffer, read_line};
use crate::sync::{Ordering, fence};

/// Upper bound on loop iterations per drain, as a multiple of the ring size.
///
/// An honest producer cannot make a drain take more than about `sz` steps
/// (one per byte in the worst case, plus a resync). A producer that keeps
/// running ahead of the reader could otherwise hold it in the loop forever.
pub const DRAIN_STEP_BUDGET_FACTOR: u32 = 4;

/// Receives what a drain produces.
pub trait LineSink {
    /// One line, without its trailing newline. Lines longer than the scratch
    /// buffer arrive in pieces.
    fn line(&mut self, line: &[u8]);

    /// The producer overwrote data before it could be read; `skipped` bytes
    /// were jumped over. Called once per detection.
    fn overflow(&mut self, skipped: u32) {
        let _ = skipped;
    }
}

impl<T: LineSink + ?Sized> LineSink for &mut T {
    #[inline]
    fn line(&mut self, line: &[u8]) {
        (**self).line(line)
    }

    #[inline]
    fn overflow(&mut self, skipped: u32) {
        (**self).overflow(skipped)
    }
}

/// What a single drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Lines handed to the sink.
    pub lines: u32,
    /// Source bytes consumed by those lines.
    pub bytes: u64,
    /// Overwrites detected.
    pub overflows: u32,
    /// Bytes jumped over while resynchronizing.
    pub skipped: u64,
    /// The drain stopped because the cursor was ahead of `put`: the
    /// producer had reserved more than a ring's worth it had not published.
    pub ahead_of_commit: bool,
    /// The drain stopped on its step budget with data still pending.
    pub budget_exhausted: bool,
}

/// Why a drain was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// `sz` is not a power of two, so masked addressing is meaningless.
    CapacityNotPowerOfTwo { sz: u32 },
    /// `sz` claims more data than the region backing the ring holds.
    CapacityExceedsRegion { sz: u32, available: usize },
}

impl core::fmt::Display for RingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CapacityNotPowerOfTwo { sz } => {
                write!(f, "log ring size {} is not a power of two", sz)
            }
            Self::CapacityExceedsRegion { sz, available } => {
                write!(
                    f,
                    "log ring size {} exceeds the {} bytes backing it",
                    sz, available
                )
            }
        }
    }
}

impl core::error::Error for RingError {}

/// Consumer handle for a [`LogRing`].
///
/// The handle is stateless; the read position is passed in to each drain so
/// it can live wherever the caller keeps persistent state.
#[derive(Clone, Copy)]
pub struct LogReader<'a> {
    ring: &'a LogRing,
}

impl<'a> LogReader<'a> {
    pub(crate) fn new(ring: &'a LogRing) -> Self {
        Self { ring }
    }

    /// Validate the producer's `sz` against the region. Returns it on success.
    pub fn capacity(&self) -> Result<u32, RingError> {
        let sz = self.ring.header().sz.load(Ordering::Relaxed);
        if !sz.is_power_of_two() {
            return Err(RingError::CapacityNotPowerOfTwo { sz });
        }
        let available = self.ring.data_len();
        if sz as usize > available {
            return Err(RingError::CapacityExceedsRegion { sz, available });
        }
        Ok(sz)
    }

    /// Returns true if `put` has moved past `cursor`.
    #[inline]
    pub fn has_pending(&self, cursor: u32) -> bool {
        self.ring.header().put.load(Ordering::Acquire) != cursor
    }

    /// Drain everything published past `cursor` into `sink`, one line at a time.
    ///
    /// Never waits: returns as soon as the cursor catches up with `put`.
    /// `cursor` is updated in place, including when a resync moved it.
    pub fn drain<S, const N: usize>(
        &self,
        cursor: &mut u32,
        line: &mut LineBuffer<N>,
        sink: &mut S,
    ) -> Result<DrainStats, RingError>
    where
        S: LineSink + ?Sized,
    {
        let sz = self.capacity()?;
        let data = self.ring.data(sz as usize);
        let header = self.ring.header();

        let budget = sz as u64 * DRAIN_STEP_BUDGET_FACTOR as u64;
        let mut steps = 0u64;
        let mut stats = DrainStats::default();
        let mut get = *cursor;

        loop {
            let put = header.put.load(Ordering::Acquire);
            if put == get {
                break;
            }
            if steps == budget {
                stats.budget_exhausted = true;
                break;
            }
            steps += 1;

            // Data loads must not be satisfied before the load of put.
            fence(Ordering::Acquire);

            let read = read_line(data, get, put, line);

            // ...and must complete before the load of alloc.
            fence(Ordering::Acquire);
            let alloc = header.alloc.load(Ordering::Acquire);

            if alloc.wrapping_sub(get) > sz {
                let resync = alloc.wrapping_sub(sz);
                let skipped = resync.wrapping_sub(get);
                stats.overflows += 1;
                stats.skipped += skipped as u64;
                sink.overflow(skipped);
                get = resync;
                continue;
            }

            if put.wrapping_sub(get) > alloc.wrapping_sub(get) {
                // put lies behind the cursor: nothing here has been published.
                stats.ahead_of_commit = true;
                break;
            }

            sink.line(line.line());
            stats.lines += 1;
            stats.bytes += read as u64;
            get = get.wrapping_add(read);
        }

        *cursor = get;
        Ok(stats)
    }
}
