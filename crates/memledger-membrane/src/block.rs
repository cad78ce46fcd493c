//! Owned handles to allocated blocks.
//!
//! A [`Block`] is the only way to reach memory handed out by a tracker. It
//! carries the layout the block was built with, so resize calls get the old
//! shape from the caller without reading it back from the pointer chain.
//! There is exactly one handle per block: a retained block is handed back
//! from `release` instead of being duplicated.
//!
//! Dropping a `Block` without releasing it leaks the allocation. The leak
//! walk reports it.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use memledger_core::{ArrayLayout, Shape, ShapeError};
use thiserror::Error;

use crate::materialize;
use crate::raw::HeapId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error(transparent)]
    Index(#[from] ShapeError),
    #[error("item of {actual} bytes does not match block item size {expected}")]
    ItemSize { expected: usize, actual: usize },
}

mod sealed {
    pub trait Sealed {}
}

/// Plain numeric item readable from and writable to block bytes.
pub trait Item: Copy + sealed::Sealed {
    const SIZE: usize;
    fn read(bytes: &[u8]) -> Self;
    fn write(self, bytes: &mut [u8]);
}

macro_rules! impl_item {
    ($($t:ty),* $(,)?) => {$(
        impl sealed::Sealed for $t {}
        impl Item for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }
            fn write(self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_ne_bytes());
            }
        }
    )*};
}

impl_item!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64);

#[must_use = "dropping a Block leaks its allocation"]
#[derive(Debug)]
pub struct Block {
    ptr: NonNull<u8>,
    layout: ArrayLayout,
    heap: HeapId,
}

// SAFETY: a Block is the unique handle to its allocation; nothing else
// aliases the bytes, so moving it across threads is sound.
unsafe impl Send for Block {}

impl Block {
    /// # Safety
    ///
    /// `ptr` must be valid for `layout.total_bytes()` initialized bytes,
    /// owned by no other `Block`, and allocated by the heap named `heap`.
    pub(crate) unsafe fn from_raw(ptr: NonNull<u8>, layout: ArrayLayout, heap: HeapId) -> Self {
        Self { ptr, layout, heap }
    }

    /// Heap that allocated this block. Only that heap's tracker accepts it.
    #[must_use]
    pub fn heap_id(&self) -> HeapId {
        self.heap
    }

    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[must_use]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub fn layout(&self) -> &ArrayLayout {
        &self.layout
    }

    #[must_use]
    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    #[must_use]
    pub fn item_size(&self) -> usize {
        self.layout.item_size()
    }

    /// Total bytes including pointer tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layout.total_bytes()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: from_raw contract; the block is unique and fully initialized.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: from_raw contract; &mut self guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }

    /// Data region, after every pointer table.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.bytes()[self.layout.data_offset()..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let start = self.layout.data_offset();
        &mut self.bytes_mut()[start..]
    }

    /// Address held by the pointer-table slot at byte offset `slot`.
    #[must_use]
    pub fn pointer_at(&self, slot: usize) -> Option<usize> {
        let end = slot.checked_add(memledger_core::POINTER_SIZE)?;
        if end > self.layout.table_bytes() {
            return None;
        }
        materialize::read_pointer(self.bytes(), slot)
    }

    fn item_range(&self, index: &[usize], size: usize) -> Result<std::ops::Range<usize>, AccessError> {
        if size != self.item_size() {
            return Err(AccessError::ItemSize {
                expected: self.item_size(),
                actual: size,
            });
        }
        let start = self.layout.element_offset(index)?;
        Ok(start..start + size)
    }

    pub fn get<T: Item>(&self, index: &[usize]) -> Result<T, AccessError> {
        let range = self.item_range(index, T::SIZE)?;
        Ok(T::read(&self.bytes()[range]))
    }

    pub fn set<T: Item>(&mut self, index: &[usize], value: T) -> Result<(), AccessError> {
        let range = self.item_range(index, T::SIZE)?;
        value.write(&mut self.bytes_mut()[range]);
        Ok(())
    }

    /// Fill the data region from `values`, in layout order.
    pub fn fill_from<T: Item>(&mut self, values: &[T]) -> Result<(), AccessError> {
        if T::SIZE != self.item_size() {
            return Err(AccessError::ItemSize {
                expected: self.item_size(),
                actual: T::SIZE,
            });
        }
        for (chunk, &v) in self.data_mut().chunks_exact_mut(T::SIZE).zip(values) {
            v.write(chunk);
        }
        Ok(())
    }

    /// Data region decoded in layout order.
    pub fn to_vec<T: Item>(&self) -> Result<Vec<T>, AccessError> {
        if T::SIZE != self.item_size() {
            return Err(AccessError::ItemSize {
                expected: self.item_size(),
                actual: T::SIZE,
            });
        }
        Ok(self.data().chunks_exact(T::SIZE).map(T::read).collect())
    }
}

/// Per-row cell-count table built before a three-level jagged allocation.
///
/// Row `i` holds `rows()[i]` cells; each cell's item count is filled in with
/// [`JaggedSetup::set_cell_len`] and the finished table is consumed by
/// `alloc_jagged3_from_setup`.
#[must_use = "dropping a JaggedSetup leaks its allocation"]
#[derive(Debug)]
pub struct JaggedSetup {
    block: Block,
}

impl JaggedSetup {
    pub(crate) fn new(block: Block) -> Self {
        Self { block }
    }

    #[must_use]
    pub fn rows(&self) -> &[usize] {
        match self.block.shape() {
            Shape::JaggedSetup { rows } => rows,
            _ => &[],
        }
    }

    pub fn set_cell_len(&mut self, row: usize, cell: usize, len: usize) -> Result<(), AccessError> {
        self.block.set(&[row, cell], len)
    }

    pub fn cell_len(&self, row: usize, cell: usize) -> Result<usize, AccessError> {
        self.block.get(&[row, cell])
    }

    /// Cell lengths per row, ready for a `Jagged3` shape.
    #[must_use]
    pub fn cells(&self) -> Vec<Vec<usize>> {
        let mut lengths = self.block.data().chunks_exact(std::mem::size_of::<usize>()).map(usize::read);
        self.rows()
            .iter()
            .map(|&n| lengths.by_ref().take(n).collect())
            .collect()
    }

    #[must_use]
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Give back the underlying block, for release.
    pub fn into_block(self) -> Block {
        self.block
    }
}
