//! Allocation records.

use serde::Serialize;

use crate::layout::ArrayLayout;
use crate::shape::{AllocKind, Shape};
use crate::stats::NodeId;

/// Position of an allocation record in the registry log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordId(u32);

impl RecordId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Monotonic operation stamp. Every allocate, reallocate and release draws a
/// fresh stamp, so stamps totally order all operations on one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Stamp(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Live,
    Released,
}

/// Where a block is accounted: leaf and parent nodes in both hierarchies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Classification {
    /// Declared type, child of the types root.
    pub type_node: NodeId,
    /// Variable name, child of `type_node`; the types leaf.
    pub name_node: NodeId,
    /// Source file, child of the files root.
    pub file_node: NodeId,
    /// Function, child of `file_node`; the files leaf.
    pub function_node: NodeId,
    /// Source line, `0` when unknown.
    pub line: u32,
}

/// Metadata for one tracked block, live or historical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationRecord {
    id: RecordId,
    address: Option<usize>,
    last_address: usize,
    created: Stamp,
    stamp: Stamp,
    class: Classification,
    layout: ArrayLayout,
    status: RecordStatus,
}

impl AllocationRecord {
    pub(crate) fn new(
        id: RecordId,
        address: usize,
        stamp: Stamp,
        class: Classification,
        layout: ArrayLayout,
    ) -> Self {
        Self {
            id,
            address: Some(address),
            last_address: address,
            created: stamp,
            stamp,
            class,
            layout,
            status: RecordStatus::Live,
        }
    }

    #[must_use]
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Current address; `None` once released.
    #[must_use]
    pub fn address(&self) -> Option<usize> {
        self.address
    }

    /// Address the block had when last live.
    #[must_use]
    pub fn last_address(&self) -> usize {
        self.last_address
    }

    /// Stamp of the registration that created this record.
    #[must_use]
    pub fn created(&self) -> Stamp {
        self.created
    }

    /// Stamp of the most recent operation on this record.
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        self.stamp
    }

    #[must_use]
    pub fn classification(&self) -> &Classification {
        &self.class
    }

    #[must_use]
    pub fn layout(&self) -> &ArrayLayout {
        &self.layout
    }

    #[must_use]
    pub fn kind(&self) -> AllocKind {
        self.layout.kind()
    }

    #[must_use]
    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    #[must_use]
    pub fn item_size(&self) -> usize {
        self.layout.item_size()
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        self.layout.total_bytes()
    }

    #[must_use]
    pub fn status(&self) -> RecordStatus {
        self.status
    }

    /// Live with a non-null address.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status == RecordStatus::Live && self.address.is_some()
    }

    pub(crate) fn touch(&mut self, stamp: Stamp, layout: ArrayLayout) {
        self.stamp = stamp;
        self.layout = layout;
    }

    pub(crate) fn mark_released(&mut self, stamp: Stamp) {
        debug_assert_eq!(self.status, RecordStatus::Live, "record released twice");
        self.status = RecordStatus::Released;
        self.address = None;
        self.stamp = stamp;
    }
}
