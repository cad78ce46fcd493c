//! Bulk allocator seam.
//!
//! The raw heap never carves memory itself. It asks a [`BulkAllocator`] for
//! whole blocks and layers its header on top. [`LibcBulk`] forwards to the C
//! allocator; [`FaultInjector`] wraps any allocator and fails on demand.

#![allow(unsafe_code)]

use std::ptr::NonNull;

/// Minimum alignment every bulk allocator must return.
pub const BULK_ALIGN: usize = 16;

/// Source of raw memory for the raw heap.
///
/// # Safety
///
/// The raw heap writes its header and user bytes through every pointer this
/// trait hands out. Implementors must guarantee that:
///
/// - `allocate` returns a block valid for reads and writes of `size` bytes,
///   aligned to [`BULK_ALIGN`], that stays valid until released;
/// - `reallocate` returns a block valid for `new_size` bytes that holds the
///   first `min(old, new_size)` bytes of the old one, and leaves `ptr` alone
///   when it returns `None`;
/// - no returned block aliases another live block.
pub unsafe trait BulkAllocator {
    /// Allocate `size` bytes. `None` on failure.
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>>;

    /// Grow or shrink a block, possibly moving it. On `None` the original
    /// block is untouched and still owned by the caller.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator and not have been released.
    unsafe fn reallocate(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must come from this allocator and not have been released.
    unsafe fn release(&mut self, ptr: NonNull<u8>);
}

/// `malloc`/`realloc`/`free` from the platform C library.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcBulk;

// SAFETY: malloc/realloc/free meet the trait contract; glibc's malloc
// alignment is at least BULK_ALIGN on 64-bit targets.
unsafe impl BulkAllocator for LibcBulk {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        // SAFETY: malloc accepts any size; a null return is handled by NonNull::new.
        let ptr = unsafe { libc::malloc(size.max(1)) };
        NonNull::new(ptr.cast::<u8>())
    }

    unsafe fn reallocate(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        // SAFETY: caller guarantees ptr is a live malloc block.
        let ptr = unsafe { libc::realloc(ptr.as_ptr().cast(), new_size.max(1)) };
        NonNull::new(ptr.cast::<u8>())
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>) {
        // SAFETY: caller guarantees ptr is a live malloc block.
        unsafe { libc::free(ptr.as_ptr().cast()) }
    }
}

/// Wraps a bulk allocator and fails the next N allocate/reallocate calls.
#[derive(Debug, Default, Clone)]
pub struct FaultInjector<B> {
    inner: B,
    pending: u32,
    injected: u64,
}

impl<B: BulkAllocator> FaultInjector<B> {
    #[must_use]
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            pending: 0,
            injected: 0,
        }
    }

    /// Fail the next `n` requests.
    pub fn fail_next(&mut self, n: u32) {
        self.pending = n;
    }

    /// Failures injected so far.
    #[must_use]
    pub fn injected(&self) -> u64 {
        self.injected
    }

    #[must_use]
    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn trip(&mut self) -> bool {
        if self.pending == 0 {
            return false;
        }
        self.pending -= 1;
        self.injected += 1;
        true
    }
}

// SAFETY: every successful request is forwarded to `inner` unchanged.
unsafe impl<B: BulkAllocator> BulkAllocator for FaultInjector<B> {
    fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if self.trip() {
            return None;
        }
        self.inner.allocate(size)
    }

    unsafe fn reallocate(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        if self.trip() {
            return None;
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.reallocate(ptr, new_size) }
    }

    unsafe fn release(&mut self, ptr: NonNull<u8>) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.release(ptr) }
    }
}
