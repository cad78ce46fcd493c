//! Byte layout of multi-dimensional arrays.
//!
//! One computation covers every [`Shape`]. The result describes where the
//! pointer tables sit, where the data region starts, and which absolute
//! offset each pointer slot must hold once the block has a base address.
//! All offsets are relative to the first byte handed to the caller.
//!
//! Layout families:
//! - **Pointer chain** (`Rect`, rank K): K-1 levels of pointer tables placed
//!   back to back in front of the data. Level L holds `d0 * .. * dL` entries.
//! - **Flat** and **vector**: data only, addressed by the row-major formula.
//! - **Jagged** (`Jagged2`, `Jagged3`, `JaggedSetup`): every table first,
//!   sized by the total row count across the structure, then the data in the
//!   same traversal order used to fill the tables. A zero-length row points
//!   at the next row's start and is never dereferenced.

use serde::Serialize;
use thiserror::Error;

use crate::shape::{AllocKind, Shape, ShapeError, checked_product, checked_sum, flat_index};

/// Size of one pointer-table entry.
pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// One pointer-table entry: the slot at `slot` must hold `base + target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PointerEntry {
    pub slot: usize,
    pub target: usize,
}

/// Layout computation and resize errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("byte length of {shape} with item size {item_size} overflows usize")]
    Overflow { shape: String, item_size: usize },
    #[error("{kind} layouts cannot be relocated in place")]
    NotResizable { kind: AllocKind },
    #[error("cannot resize {from} into {to}: rank differs")]
    RankMismatch { from: String, to: String },
    #[error("shrinking {from} to {to} is not supported")]
    Shrink { from: String, to: String },
    #[error("item size changed from {from} to {to}")]
    ItemSizeMismatch { from: usize, to: usize },
    #[error("block of {len} bytes is too small for a {needed}-byte relocation")]
    BlockTooSmall { len: usize, needed: usize },
}

/// Computed layout for one allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayLayout {
    item_size: usize,
    shape: Shape,
    table_bytes: usize,
    data_bytes: usize,
}

impl ArrayLayout {
    /// Compute the layout of `shape` with items of `item_size` bytes.
    pub fn compute(item_size: usize, shape: &Shape) -> Result<Self, LayoutError> {
        shape.validate()?;
        let overflow = || LayoutError::Overflow {
            shape: shape.to_string(),
            item_size,
        };

        let table_entries = match shape {
            Shape::Scalar | Shape::Vector(_) | Shape::Flat(_) => 0,
            Shape::Rect(dims) => rect_level_sizes(dims)
                .ok_or_else(overflow)?
                .iter()
                .try_fold(0usize, |acc, &n| acc.checked_add(n))
                .ok_or_else(overflow)?,
            Shape::Jagged2 { rows } | Shape::JaggedSetup { rows } => rows.len(),
            Shape::Jagged3 { cells } => cells
                .iter()
                .try_fold(cells.len(), |acc, row| acc.checked_add(row.len()))
                .ok_or_else(overflow)?,
        };
        let cells = shape.cell_count().ok_or_else(overflow)?;

        let table_bytes = table_entries.checked_mul(POINTER_SIZE).ok_or_else(overflow)?;
        let data_bytes = cells.checked_mul(item_size).ok_or_else(overflow)?;
        table_bytes.checked_add(data_bytes).ok_or_else(overflow)?;

        Ok(Self {
            item_size,
            shape: shape.clone(),
            table_bytes,
            data_bytes,
        })
    }

    #[must_use]
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[must_use]
    pub fn kind(&self) -> AllocKind {
        self.shape.kind()
    }

    /// Bytes taken by pointer tables in front of the data.
    #[must_use]
    pub fn table_bytes(&self) -> usize {
        self.table_bytes
    }

    /// Offset of the first data item.
    #[must_use]
    pub fn data_offset(&self) -> usize {
        self.table_bytes
    }

    #[must_use]
    pub fn data_bytes(&self) -> usize {
        self.data_bytes
    }

    /// Exact byte length of the whole block.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.table_bytes + self.data_bytes
    }

    /// Number of data items.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.data_bytes.checked_div(self.item_size).unwrap_or(0)
    }

    /// Every pointer-table entry in table order.
    #[must_use]
    pub fn pointer_entries(&self) -> Vec<PointerEntry> {
        match &self.shape {
            Shape::Scalar | Shape::Vector(_) | Shape::Flat(_) => Vec::new(),
            Shape::Rect(dims) => self.rect_entries(dims),
            Shape::Jagged2 { rows } | Shape::JaggedSetup { rows } => {
                let data = self.data_offset();
                let mut entries = Vec::with_capacity(rows.len());
                let mut cursor = data;
                for (i, &len) in rows.iter().enumerate() {
                    entries.push(PointerEntry {
                        slot: i * POINTER_SIZE,
                        target: cursor,
                    });
                    cursor += len * self.item_size;
                }
                entries
            }
            Shape::Jagged3 { cells } => {
                let n = cells.len();
                let mut entries = Vec::with_capacity(self.table_bytes / POINTER_SIZE);

                let mut cell_table = n * POINTER_SIZE;
                for (i, row) in cells.iter().enumerate() {
                    entries.push(PointerEntry {
                        slot: i * POINTER_SIZE,
                        target: cell_table,
                    });
                    cell_table += row.len() * POINTER_SIZE;
                }

                let mut slot = n * POINTER_SIZE;
                let mut cursor = self.data_offset();
                for row in cells {
                    for &len in row {
                        entries.push(PointerEntry {
                            slot,
                            target: cursor,
                        });
                        slot += POINTER_SIZE;
                        cursor += len * self.item_size;
                    }
                }
                entries
            }
        }
    }

    // Closed form: entry e of level L < K-2 points at table e of level L+1,
    // entries of level K-2 point at data row e.
    fn rect_entries(&self, dims: &[usize]) -> Vec<PointerEntry> {
        let Some(levels) = rect_level_sizes(dims) else {
            return Vec::new();
        };
        let rank = dims.len();
        let mut starts = Vec::with_capacity(levels.len());
        let mut offset = 0;
        for &n in &levels {
            starts.push(offset);
            offset += n * POINTER_SIZE;
        }
        let data = self.data_offset();
        let row_bytes = dims[rank - 1] * self.item_size;

        let mut entries = Vec::with_capacity(offset / POINTER_SIZE);
        for (level, &n) in levels.iter().enumerate() {
            for e in 0..n {
                let target = if level + 2 < rank {
                    starts[level + 1] + e * dims[level + 1] * POINTER_SIZE
                } else {
                    data + e * row_bytes
                };
                entries.push(PointerEntry {
                    slot: starts[level] + e * POINTER_SIZE,
                    target,
                });
            }
        }
        entries
    }

    /// Byte offset of one data item.
    ///
    /// Vector, rectangular and flat shapes take one index per dimension;
    /// `Jagged2`/`JaggedSetup` take `[row, item]`; `Jagged3` takes
    /// `[row, cell, item]`.
    pub fn element_offset(&self, index: &[usize]) -> Result<usize, ShapeError> {
        let bad = || ShapeError::BadIndex {
            index: index.to_vec(),
            shape: self.shape.to_string(),
        };
        let item = match &self.shape {
            Shape::Scalar => {
                if !index.iter().all(|&i| i == 0) {
                    return Err(bad());
                }
                0
            }
            Shape::Vector(len) => flat_index(&[*len], index)?,
            Shape::Rect(dims) | Shape::Flat(dims) => flat_index(dims, index)?,
            Shape::Jagged2 { rows } | Shape::JaggedSetup { rows } => {
                let &[row, i] = index else {
                    return Err(bad());
                };
                if row >= rows.len() || i >= rows[row] {
                    return Err(bad());
                }
                checked_sum(&rows[..row]).ok_or_else(bad)? + i
            }
            Shape::Jagged3 { cells } => {
                let &[row, cell, i] = index else {
                    return Err(bad());
                };
                if row >= cells.len() || cell >= cells[row].len() || i >= cells[row][cell] {
                    return Err(bad());
                }
                let before_rows: usize = cells[..row].iter().flatten().sum();
                let before_cells: usize = cells[row][..cell].iter().sum();
                before_rows + before_cells + i
            }
        };
        Ok(self.data_offset() + item * self.item_size)
    }
}

/// Entries per pointer-table level of a rank-K rectangular layout.
fn rect_level_sizes(dims: &[usize]) -> Option<Vec<usize>> {
    let levels = dims.len().saturating_sub(1);
    (1..=levels).map(|l| checked_product(&dims[..l])).collect()
}

/// One contiguous data run moved by a resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowMove {
    pub from: usize,
    pub to: usize,
    pub len: usize,
}

/// Data relocation for an enlarging resize.
///
/// Moves are ordered highest row first. Every row lands at or after its old
/// offset, so executing the moves in order never overwrites a row that has
/// not yet been moved. The caller must have grown the block to
/// [`RelocationPlan::new_layout`]'s total length before applying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationPlan {
    old: ArrayLayout,
    new: ArrayLayout,
    moves: Vec<RowMove>,
}

impl RelocationPlan {
    /// Plan a resize from `old` to `new`.
    ///
    /// Vectors may grow or shrink. Rectangular layouts must keep their rank
    /// and may only grow in every dimension. Every other kind is rejected.
    pub fn between(old: &ArrayLayout, new: &ArrayLayout) -> Result<Self, LayoutError> {
        if old.item_size != new.item_size {
            return Err(LayoutError::ItemSizeMismatch {
                from: old.item_size,
                to: new.item_size,
            });
        }

        let moves = match (&old.shape, &new.shape) {
            (Shape::Vector(old_len), Shape::Vector(new_len)) => vec![RowMove {
                from: 0,
                to: 0,
                len: (*old_len).min(*new_len) * old.item_size,
            }],
            (Shape::Rect(old_dims), Shape::Rect(new_dims)) => {
                if old_dims.len() != new_dims.len() {
                    return Err(LayoutError::RankMismatch {
                        from: old.shape.to_string(),
                        to: new.shape.to_string(),
                    });
                }
                if old_dims.iter().zip(new_dims).any(|(o, n)| n < o) {
                    return Err(LayoutError::Shrink {
                        from: old.shape.to_string(),
                        to: new.shape.to_string(),
                    });
                }
                rect_moves(old, new, old_dims, new_dims)
            }
            (Shape::Vector(_) | Shape::Rect(_), _) => {
                return Err(LayoutError::RankMismatch {
                    from: old.shape.to_string(),
                    to: new.shape.to_string(),
                });
            }
            (other, _) => {
                return Err(LayoutError::NotResizable { kind: other.kind() });
            }
        };

        Ok(Self {
            old: old.clone(),
            new: new.clone(),
            moves,
        })
    }

    #[must_use]
    pub fn old_layout(&self) -> &ArrayLayout {
        &self.old
    }

    #[must_use]
    pub fn new_layout(&self) -> &ArrayLayout {
        &self.new
    }

    /// Moves in execution order.
    #[must_use]
    pub fn moves(&self) -> &[RowMove] {
        &self.moves
    }

    /// Relocate cell data inside `block` and zero every newly exposed cell.
    ///
    /// `block` must already span the new layout. Pointer tables are left for
    /// the caller to rewrite.
    pub fn apply(&self, block: &mut [u8]) -> Result<(), LayoutError> {
        let needed = self.new.total_bytes();
        if block.len() < needed {
            return Err(LayoutError::BlockTooSmall {
                len: block.len(),
                needed,
            });
        }

        for m in &self.moves {
            if m.from != m.to && m.len > 0 {
                block.copy_within(m.from..m.from + m.len, m.to);
            }
        }

        let mut cursor = self.new.data_offset();
        for m in self.moves.iter().rev() {
            block[cursor..m.to].fill(0);
            cursor = m.to + m.len;
        }
        block[cursor..self.new.total_bytes()].fill(0);
        Ok(())
    }
}

fn rect_moves(
    old: &ArrayLayout,
    new: &ArrayLayout,
    old_dims: &[usize],
    new_dims: &[usize],
) -> Vec<RowMove> {
    let rank = old_dims.len();
    let old_outer = &old_dims[..rank - 1];
    let new_outer = &new_dims[..rank - 1];
    let old_row = old_dims[rank - 1] * old.item_size;
    let new_row = new_dims[rank - 1] * new.item_size;
    let rows: usize = old_outer.iter().product();

    let mut moves = Vec::with_capacity(rows);
    let mut index = vec![0usize; rank - 1];
    for r_old in 0..rows {
        // Decompose the old linear row into a multi-index, then re-linearize
        // over the new outer dimensions.
        let mut rem = r_old;
        for axis in (0..rank - 1).rev() {
            index[axis] = rem % old_outer[axis];
            rem /= old_outer[axis];
        }
        let r_new = index
            .iter()
            .zip(new_outer)
            .fold(0usize, |acc, (&i, &d)| acc * d + i);
        moves.push(RowMove {
            from: old.data_offset() + r_old * old_row,
            to: new.data_offset() + r_new * new_row,
            len: old_row,
        });
    }
    moves.reverse();
    moves
}
