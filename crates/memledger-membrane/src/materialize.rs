//! Writes computed layouts into real blocks.
//!
//! Pointer-table slots hold absolute addresses, so tables are rewritten
//! whenever a block is created or moved.

use memledger_core::{ArrayLayout, LayoutError, POINTER_SIZE, RelocationPlan};

/// Fill every pointer-table slot of `block` for a block based at `base`.
pub fn write_pointer_tables(block: &mut [u8], base: usize, layout: &ArrayLayout) {
    for entry in layout.pointer_entries() {
        let value = base + entry.target;
        block[entry.slot..entry.slot + POINTER_SIZE].copy_from_slice(&value.to_ne_bytes());
    }
}

/// Address stored in the pointer slot at byte offset `slot`.
#[must_use]
pub fn read_pointer(block: &[u8], slot: usize) -> Option<usize> {
    let bytes = block.get(slot..slot.checked_add(POINTER_SIZE)?)?;
    let mut raw = [0u8; POINTER_SIZE];
    raw.copy_from_slice(bytes);
    Some(usize::from_ne_bytes(raw))
}

/// Move cell data per `plan`, zero new cells and rebuild the tables for a
/// block now based at `base`.
pub fn relocate(block: &mut [u8], base: usize, plan: &RelocationPlan) -> Result<(), LayoutError> {
    plan.apply(block)?;
    write_pointer_tables(block, base, plan.new_layout());
    Ok(())
}
