//! Views over memory that backs a log ring.

use core::ptr::NonNull;

/// A borrowed view of a memory region: base pointer plus length.
///
/// `Region` does not own the memory. Whoever hands one out (an mmap, a page
/// allocation shared with the secure side, a [`HeapRegion`]) must keep the
/// memory alive for as long as any ring built on it is used.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Create a region from a raw base pointer and length.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `len` bytes, aligned to at
    /// least 4 bytes, and must stay valid for as long as the region is used.
    #[inline]
    pub unsafe fn from_raw(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to `offset` bytes past the base.
    ///
    /// # Safety
    ///
    /// `offset` must be within the region.
    #[inline]
    pub unsafe fn offset(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.len);
        unsafe { self.base.as_ptr().add(offset) }
    }

    /// Reference to a `T` living at `offset`.
    ///
    /// # Safety
    ///
    /// `offset` must be aligned for `T`, `offset + size_of::<T>()` must be
    /// within the region, and the bytes there must be a valid `T`.
    #[inline]
    pub unsafe fn get<T>(&self, offset: usize) -> &T {
        debug_assert!(offset + core::mem::size_of::<T>() <= self.len);
        unsafe { &*(self.offset(offset) as *const T) }
    }
}

#[cfg(any(test, feature = "alloc"))]
mod heap {
    use super::Region;
    use alloc::alloc::{Layout, alloc_zeroed, dealloc};
    use core::ptr::NonNull;

    /// Alignment of heap-backed regions; matches a page so the layout
    /// resembles memory shared with another environment.
    const HEAP_REGION_ALIGN: usize = 4096;

    /// Zeroed, heap-allocated memory standing in for a shared region.
    pub struct HeapRegion {
        base: NonNull<u8>,
        layout: Layout,
    }

    unsafe impl Send for HeapRegion {}
    unsafe impl Sync for HeapRegion {}

    impl HeapRegion {
        /// Allocate `len` zeroed bytes.
        ///
        /// Panics if `len` is zero or the allocation fails.
        pub fn new_zeroed(len: usize) -> Self {
            assert!(len > 0, "region length must be non-zero");
            let layout = match Layout::from_size_align(len, HEAP_REGION_ALIGN) {
                Ok(layout) => layout,
                Err(_) => panic!("region too large: {len} bytes"),
            };
            // SAFETY: layout has non-zero size.
            let ptr = unsafe { alloc_zeroed(layout) };
            let base = match NonNull::new(ptr) {
                Some(base) => base,
                None => alloc::alloc::handle_alloc_error(layout),
            };
            Self { base, layout }
        }

        /// Borrowed view of the allocation.
        #[inline]
        pub fn region(&self) -> Region {
            // SAFETY: the allocation is valid for `layout.size()` bytes while self lives.
            unsafe { Region::from_raw(self.base, self.layout.size()) }
        }

        #[inline]
        pub fn len(&self) -> usize {
            self.layout.size()
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.layout.size() == 0
        }
    }

    impl Drop for HeapRegion {
        fn drop(&mut self) {
            // SAFETY: allocated in new_zeroed with this exact layout.
            unsafe { dealloc(self.base.as_ptr(), self.layout) }
        }
    }
}

#[cfg(any(test, feature = "alloc"))]
pub use heap::HeapRegion;
