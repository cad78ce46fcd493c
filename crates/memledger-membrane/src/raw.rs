//! Header-tagged raw heap.
//!
//! Every block handed out is preceded by a [`RawHeader`]:
//!
//! ```text
//! bulk block: [ instances:u32 | flags:u32 | size:usize ][ user bytes ... ]
//!                                                       ^ returned pointer
//! ```
//!
//! The header is invisible above this layer. User bytes are zeroed on
//! allocation and on growth, so every byte of a live block is initialized.
//! Two counters, bytes outstanding and their running peak, move on every
//! call whether or not bookkeeping is enabled.

#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::bulk::{BULK_ALIGN, BulkAllocator};
use crate::fatal::FatalError;
use crate::site::Site;

/// Header flag: the block is registered with the tracker.
pub const FLAG_TRACKED: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    /// Extra owners beyond the first. Zero means a release frees the block.
    pub instances: u32,
    pub flags: u32,
    /// Requested user size in bytes.
    pub size: usize,
}

pub const HEADER_SIZE: usize = std::mem::size_of::<RawHeader>();

const _: () = assert!(HEADER_SIZE == 16);
const _: () = assert!(HEADER_SIZE % BULK_ALIGN == 0);

impl RawHeader {
    #[must_use]
    pub const fn is_tracked(&self) -> bool {
        self.flags & FLAG_TRACKED != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other owners remain; `instances` is the count left after this release.
    Retained { instances: u32 },
    /// The block went back to the bulk allocator.
    Freed { size: usize, tracked: bool },
}

/// Process-unique identity of one [`RawHeap`]. Every block remembers the
/// heap that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HeapId(u64);

impl HeapId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HeapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "heap#{}", self.0)
    }
}

/// Point-in-time copy of the heap counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapSnapshot {
    pub current: usize,
    pub peak: usize,
    pub allocations: u64,
    pub releases: u64,
    pub retries: u64,
}

pub struct RawHeap<B> {
    id: HeapId,
    bulk: B,
    current: usize,
    peak: usize,
    allocations: u64,
    releases: u64,
    retries: u64,
}

impl<B: BulkAllocator> RawHeap<B> {
    #[must_use]
    pub fn new(bulk: B) -> Self {
        Self {
            id: HeapId::next(),
            bulk,
            current: 0,
            peak: 0,
            allocations: 0,
            releases: 0,
            retries: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> HeapId {
        self.id
    }

    #[must_use]
    pub fn bulk(&self) -> &B {
        &self.bulk
    }

    pub fn bulk_mut(&mut self) -> &mut B {
        &mut self.bulk
    }

    /// Bytes currently outstanding.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak
    }

    #[must_use]
    pub fn snapshot(&self) -> HeapSnapshot {
        HeapSnapshot {
            current: self.current,
            peak: self.peak,
            allocations: self.allocations,
            releases: self.releases,
            retries: self.retries,
        }
    }

    fn out_of_memory(&self, site: Site, requested: usize) -> FatalError {
        FatalError::OutOfMemory {
            site,
            requested,
            current: self.current,
        }
    }

    fn grow_counters(&mut self, by: usize) {
        self.current += by;
        self.peak = self.peak.max(self.current);
    }

    /// Allocate `size` zeroed user bytes. The bulk allocator is retried
    /// once before giving up.
    pub fn allocate(&mut self, size: usize, flags: u32, site: Site) -> Result<NonNull<u8>, FatalError> {
        let total = size
            .checked_add(HEADER_SIZE)
            .ok_or_else(|| self.out_of_memory(site, size))?;
        let raw = match self.bulk.allocate(total) {
            Some(p) => p,
            None => {
                self.retries += 1;
                self.bulk
                    .allocate(total)
                    .ok_or_else(|| self.out_of_memory(site, size))?
            }
        };

        // SAFETY: the BulkAllocator contract makes raw valid for `total` bytes
        // and BULK_ALIGN-aligned, which satisfies RawHeader's alignment. User bytes start HEADER_SIZE in.
        let user = unsafe {
            raw.cast::<RawHeader>().write(RawHeader {
                instances: 0,
                flags,
                size,
            });
            let user = raw.add(HEADER_SIZE);
            std::ptr::write_bytes(user.as_ptr(), 0, size);
            user
        };
        self.allocations += 1;
        self.grow_counters(size);
        Ok(user)
    }

    /// Resize a block, possibly moving it. Grown bytes are zeroed. On error
    /// the original block is still valid.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap and not yet freed.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
        site: Site,
    ) -> Result<NonNull<u8>, FatalError> {
        // SAFETY: caller contract.
        let old = unsafe { Self::header_of(ptr) };
        let total = new_size
            .checked_add(HEADER_SIZE)
            .ok_or_else(|| self.out_of_memory(site, new_size))?;
        // SAFETY: the header sits HEADER_SIZE before every pointer we hand out.
        let raw = unsafe { ptr.sub(HEADER_SIZE) };

        // SAFETY: raw is the live bulk block backing ptr. A failed realloc
        // leaves it untouched, so retrying with the same pointer is sound.
        let moved = match unsafe { self.bulk.reallocate(raw, total) } {
            Some(p) => p,
            None => {
                self.retries += 1;
                unsafe { self.bulk.reallocate(raw, total) }
                    .ok_or_else(|| self.out_of_memory(site, new_size))?
            }
        };

        // SAFETY: per the BulkAllocator contract moved is valid for `total`
        // bytes and still carries the old header; grown user bytes lie inside the new block.
        let user = unsafe {
            let header = moved.cast::<RawHeader>();
            (*header.as_ptr()).size = new_size;
            let user = moved.add(HEADER_SIZE);
            if new_size > old.size {
                std::ptr::write_bytes(user.as_ptr().add(old.size), 0, new_size - old.size);
            }
            user
        };
        self.current -= old.size;
        self.grow_counters(new_size);
        Ok(user)
    }

    /// Drop one owner. The block is freed once no extra owners remain.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap and not yet freed.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) -> ReleaseOutcome {
        // SAFETY: caller contract.
        let header = unsafe { ptr.sub(HEADER_SIZE).cast::<RawHeader>() };
        // SAFETY: header points at an initialized RawHeader.
        let h = unsafe { &mut *header.as_ptr() };
        if h.instances > 0 {
            h.instances -= 1;
            return ReleaseOutcome::Retained {
                instances: h.instances,
            };
        }
        let (size, tracked) = (h.size, h.is_tracked());
        // SAFETY: header.cast() is the bulk block; nothing references it after this.
        unsafe { self.bulk.release(header.cast()) };
        self.current -= size;
        self.releases += 1;
        ReleaseOutcome::Freed { size, tracked }
    }

    /// Add one owner; returns the new extra-owner count.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap and not yet freed.
    pub unsafe fn retain(&mut self, ptr: NonNull<u8>) -> u32 {
        // SAFETY: caller contract.
        let h = unsafe { &mut *ptr.sub(HEADER_SIZE).cast::<RawHeader>().as_ptr() };
        h.instances += 1;
        h.instances
    }

    /// Copy of the header in front of `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this heap and not yet freed.
    #[must_use]
    pub unsafe fn header(&self, ptr: NonNull<u8>) -> RawHeader {
        // SAFETY: caller contract.
        unsafe { Self::header_of(ptr) }
    }

    unsafe fn header_of(ptr: NonNull<u8>) -> RawHeader {
        // SAFETY: caller contract; the header is initialized at allocation.
        unsafe { ptr.sub(HEADER_SIZE).cast::<RawHeader>().read() }
    }
}
