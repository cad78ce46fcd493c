//! Allocation record registry.
//!
//! Two structures back the registry:
//! - an append-only log holding every record ever created, in registration
//!   order, so leak walks and reports can see released history;
//! - a map from address to the live record currently at that address.
//!
//! Identity lookups go through [`RecordId`] and can reach released records.
//! Value lookups go through an address and only ever see live ones, so an
//! address reused after release never collides with its old record.
//!
//! A single most-recently-used `(address, id)` slot sits in front of the map.
//! It is dropped whenever it would surface a released or different record.

use std::cell::Cell;
use std::collections::HashMap;

use thiserror::Error;

use crate::layout::ArrayLayout;
use crate::record::{AllocationRecord, Classification, RecordId, RecordStatus, Stamp};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("cannot register a null address")]
    NullAddress,
    #[error("address {address:#x} already has live record {existing:?}")]
    AddressLive { address: usize, existing: RecordId },
    #[error("no live record at {address:#x}")]
    NotFound { address: usize },
    #[error("record {id:?} is not live")]
    NotLive { id: RecordId },
}

#[derive(Debug, Default)]
pub struct Registry {
    log: Vec<AllocationRecord>,
    live: HashMap<usize, RecordId>,
    mru: Cell<Option<(usize, RecordId)>>,
    mru_hits: Cell<u64>,
    mru_misses: Cell<u64>,
    next_stamp: u64,
    live_bytes: u64,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_stamp(&mut self) -> Stamp {
        self.next_stamp += 1;
        Stamp(self.next_stamp)
    }

    /// Most recent stamp handed out, `Stamp(0)` before any operation.
    #[must_use]
    pub fn last_stamp(&self) -> Stamp {
        Stamp(self.next_stamp)
    }

    /// Create a live record for a freshly allocated block.
    pub fn register(
        &mut self,
        address: usize,
        class: Classification,
        layout: ArrayLayout,
    ) -> Result<RecordId, RegistryError> {
        if address == 0 {
            return Err(RegistryError::NullAddress);
        }
        if let Some(&existing) = self.live.get(&address) {
            return Err(RegistryError::AddressLive { address, existing });
        }
        let id = RecordId::from_index(self.log.len());
        let stamp = self.next_stamp();
        self.live_bytes += layout.total_bytes() as u64;
        self.log
            .push(AllocationRecord::new(id, address, stamp, class, layout));
        self.live.insert(address, id);
        self.mru.set(Some((address, id)));
        Ok(id)
    }

    /// Identity lookup; reaches released records too.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&AllocationRecord> {
        self.log.get(id.index())
    }

    /// Value lookup of the live record at `address`.
    #[must_use]
    pub fn lookup(&self, address: usize) -> Option<&AllocationRecord> {
        self.lookup_id(address).and_then(|id| self.get(id))
    }

    /// Value lookup returning the record id.
    #[must_use]
    pub fn lookup_id(&self, address: usize) -> Option<RecordId> {
        if let Some((cached_addr, cached_id)) = self.mru.get() {
            if cached_addr == address
                && self
                    .log
                    .get(cached_id.index())
                    .is_some_and(|r| r.is_live() && r.address() == Some(address))
            {
                self.mru_hits.set(self.mru_hits.get() + 1);
                return Some(cached_id);
            }
            if cached_addr == address {
                self.mru.set(None);
            }
        }
        self.mru_misses.set(self.mru_misses.get() + 1);
        let id = self.live.get(&address).copied()?;
        self.mru.set(Some((address, id)));
        Some(id)
    }

    /// Reallocation that kept the block at the same address.
    pub fn update_in_place(
        &mut self,
        id: RecordId,
        layout: ArrayLayout,
    ) -> Result<(), RegistryError> {
        let old_total = self.live_record(id)?.total_size() as u64;
        let stamp = self.next_stamp();
        self.live_bytes = self.live_bytes - old_total + layout.total_bytes() as u64;
        self.log[id.index()].touch(stamp, layout);
        Ok(())
    }

    /// Reallocation that may have moved the block.
    ///
    /// Same address: updated in place and `id` is returned. Different
    /// address: the old record is released and a new one, with the same
    /// classification, is created for `new_address`.
    pub fn relocate(
        &mut self,
        id: RecordId,
        new_address: usize,
        layout: ArrayLayout,
    ) -> Result<RecordId, RegistryError> {
        let old = self.live_record(id)?;
        let old_address = old.last_address();
        let class = *old.classification();
        if old_address == new_address {
            self.update_in_place(id, layout)?;
            return Ok(id);
        }
        if new_address == 0 {
            return Err(RegistryError::NullAddress);
        }
        if let Some(&existing) = self.live.get(&new_address) {
            return Err(RegistryError::AddressLive {
                address: new_address,
                existing,
            });
        }
        self.retire(old_address)?;
        self.register(new_address, class, layout)
    }

    /// Drop the live record at `address` from the index and mark it released.
    pub fn retire(&mut self, address: usize) -> Result<RecordId, RegistryError> {
        let id = self
            .live
            .remove(&address)
            .ok_or(RegistryError::NotFound { address })?;
        if self.mru.get().is_some_and(|(a, _)| a == address) {
            self.mru.set(None);
        }
        let stamp = self.next_stamp();
        let record = &mut self.log[id.index()];
        self.live_bytes -= record.total_size() as u64;
        record.mark_released(stamp);
        Ok(id)
    }

    fn live_record(&self, id: RecordId) -> Result<&AllocationRecord, RegistryError> {
        match self.log.get(id.index()) {
            Some(r) if r.status() == RecordStatus::Live => Ok(r),
            _ => Err(RegistryError::NotLive { id }),
        }
    }

    /// Every record in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.log.iter()
    }

    /// Live records in registration order.
    pub fn live(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.log.iter().filter(|r| r.is_live())
    }

    /// Every record ordered by address, then by stamp; records sharing an
    /// address (reuse after release) appear oldest first.
    #[must_use]
    pub fn iter_by_address(&self) -> Vec<&AllocationRecord> {
        let mut records: Vec<&AllocationRecord> = self.log.iter().collect();
        records.sort_by_key(|r| (r.last_address(), r.created()));
        records
    }

    /// Records ever created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Sum of total sizes over live records.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    /// `(hits, misses)` of the most-recently-used slot.
    #[must_use]
    pub fn mru_stats(&self) -> (u64, u64) {
        (self.mru_hits.get(), self.mru_misses.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;
    use crate::stats::StatsTree;

    fn class() -> Classification {
        let mut types = StatsTree::new("types");
        let mut files = StatsTree::new("files");
        let t = types.resolve(types.root(), Some("f64"));
        let n = types.resolve(t, Some("field"));
        let f = files.resolve(files.root(), Some("grid.rs"));
        let func = files.resolve(f, Some("build"));
        Classification {
            type_node: t,
            name_node: n,
            file_node: f,
            function_node: func,
            line: 7,
        }
    }

    fn vector(len: usize) -> ArrayLayout {
        ArrayLayout::compute(8, &Shape::Vector(len)).unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = Registry::new();
        let id = reg.register(0x1000, class(), vector(4)).unwrap();
        let rec = reg.lookup(0x1000).unwrap();
        assert_eq!(rec.id(), id);
        assert_eq!(rec.total_size(), 32);
        assert_eq!(reg.live_bytes(), 32);
        assert!(reg.lookup(0x2000).is_none());
    }

    #[test]
    fn double_register_is_rejected() {
        let mut reg = Registry::new();
        let id = reg.register(0x1000, class(), vector(1)).unwrap();
        assert_eq!(
            reg.register(0x1000, class(), vector(1)),
            Err(RegistryError::AddressLive {
                address: 0x1000,
                existing: id
            })
        );
        assert_eq!(
            reg.register(0, class(), vector(1)),
            Err(RegistryError::NullAddress)
        );
    }

    #[test]
    fn reuse_after_release_does_not_collide() {
        let mut reg = Registry::new();
        let first = reg.register(0x1000, class(), vector(1)).unwrap();
        reg.retire(0x1000).unwrap();
        let second = reg.register(0x1000, class(), vector(2)).unwrap();
        assert_ne!(first, second);
        assert_eq!(reg.lookup_id(0x1000), Some(second));
        assert_eq!(reg.get(first).unwrap().status(), RecordStatus::Released);
        assert_eq!(reg.get(first).unwrap().address(), None);
        let by_addr = reg.iter_by_address();
        assert_eq!(by_addr[0].id(), first);
        assert_eq!(by_addr[1].id(), second);
    }

    #[test]
    fn stamps_strictly_increase() {
        let mut reg = Registry::new();
        let a = reg.register(0x10, class(), vector(1)).unwrap();
        let s1 = reg.get(a).unwrap().stamp();
        reg.update_in_place(a, vector(3)).unwrap();
        let s2 = reg.get(a).unwrap().stamp();
        reg.retire(0x10).unwrap();
        let s3 = reg.get(a).unwrap().stamp();
        assert!(s1 < s2 && s2 < s3);
        assert_eq!(reg.last_stamp(), s3);
        assert_eq!(reg.get(a).unwrap().created(), s1);
    }

    #[test]
    fn relocate_moves_to_new_record() {
        let mut reg = Registry::new();
        let a = reg.register(0x10, class(), vector(1)).unwrap();
        let same = reg.relocate(a, 0x10, vector(2)).unwrap();
        assert_eq!(same, a);
        assert_eq!(reg.live_bytes(), 16);

        let b = reg.relocate(a, 0x20, vector(4)).unwrap();
        assert_ne!(a, b);
        assert_eq!(reg.get(a).unwrap().status(), RecordStatus::Released);
        assert_eq!(reg.get(a).unwrap().last_address(), 0x10);
        assert_eq!(reg.lookup_id(0x20), Some(b));
        assert!(reg.lookup(0x10).is_none());
        assert_eq!(reg.live_bytes(), 32);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.live_count(), 1);
    }

    #[test]
    fn retire_unknown_address_is_an_error() {
        let mut reg = Registry::new();
        assert_eq!(
            reg.retire(0x99),
            Err(RegistryError::NotFound { address: 0x99 })
        );
    }

    #[test]
    fn mru_slot_never_surfaces_released_records() {
        let mut reg = Registry::new();
        reg.register(0x10, class(), vector(1)).unwrap();
        assert!(reg.lookup(0x10).is_some());
        assert!(reg.lookup(0x10).is_some());
        let (hits, _) = reg.mru_stats();
        assert!(hits >= 2);
        reg.retire(0x10).unwrap();
        assert!(reg.lookup(0x10).is_none());
    }

    #[test]
    fn released_records_stay_in_the_log() {
        let mut reg = Registry::new();
        for addr in [0x10, 0x20, 0x30] {
            reg.register(addr, class(), vector(1)).unwrap();
        }
        reg.retire(0x20).unwrap();
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.live().count(), 2);
        assert_eq!(reg.iter().filter(|r| !r.is_live()).count(), 1);
    }
}
