//! Shape descriptors for tracked allocations.
//!
//! Every allocation entering the tracker carries a [`Shape`]: the uniform
//! dimension lengths of a rectangular or flat array, or the per-row (and
//! per-cell) length tables of a jagged one. The shape decides both the
//! [`AllocKind`] recorded in the registry and the byte layout computed by
//! [`crate::layout::ArrayLayout`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Highest rank supported by the pointer-chain (rectangular) layout family.
pub const MAX_RECT_RANK: usize = 4;

/// Allocation family recorded for each tracked block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocKind {
    Scalar,
    OneD,
    TwoD,
    ThreeD,
    FourD,
    Flat,
    Jagged2D,
    Jagged3D,
    JaggedSetup,
}

impl AllocKind {
    /// Stable short name used in reports and journal entries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::OneD => "1d",
            Self::TwoD => "2d",
            Self::ThreeD => "3d",
            Self::FourD => "4d",
            Self::Flat => "flat",
            Self::Jagged2D => "jagged2d",
            Self::Jagged3D => "jagged3d",
            Self::JaggedSetup => "jagged_setup",
        }
    }

    /// Parse a short name (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let kind = match s.to_ascii_lowercase().as_str() {
            "scalar" => Self::Scalar,
            "1d" | "vector" => Self::OneD,
            "2d" => Self::TwoD,
            "3d" => Self::ThreeD,
            "4d" => Self::FourD,
            "flat" => Self::Flat,
            "jagged2d" => Self::Jagged2D,
            "jagged3d" => Self::Jagged3D,
            "jagged_setup" | "setup" => Self::JaggedSetup,
            _ => return None,
        };
        Some(kind)
    }

    /// Jagged kinds carry per-row length tables.
    #[must_use]
    pub const fn is_jagged(self) -> bool {
        matches!(self, Self::Jagged2D | Self::Jagged3D | Self::JaggedSetup)
    }

    /// Kinds whose existing contents can be relocated by a resize.
    #[must_use]
    pub const fn is_resizable(self) -> bool {
        matches!(self, Self::OneD | Self::TwoD | Self::ThreeD | Self::FourD)
    }
}

impl fmt::Display for AllocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged shape descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// A single item.
    Scalar,
    /// A contiguous run of `len` items.
    Vector(usize),
    /// Pointer-chain array with 2..=4 uniform dimensions.
    Rect(Vec<usize>),
    /// One contiguous block addressed by the row-major formula.
    Flat(Vec<usize>),
    /// Rows of differing lengths.
    Jagged2 { rows: Vec<usize> },
    /// Rows of cells of differing lengths; `cells[i][j]` is the item count of
    /// cell `j` in row `i`.
    Jagged3 { cells: Vec<Vec<usize>> },
    /// Per-row-per-cell length table consumed by a later `Jagged3` allocation.
    /// `rows[i]` is the number of cells in row `i`.
    JaggedSetup { rows: Vec<usize> },
}

/// Structural shape errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("rectangular shapes need 2..={MAX_RECT_RANK} dimensions, got {0}")]
    RectRank(usize),
    #[error("flat shapes need at least one dimension")]
    EmptyFlat,
    #[error("index {index:?} does not address {shape}")]
    BadIndex { index: Vec<usize>, shape: String },
}

impl Shape {
    /// Check rank constraints.
    pub fn validate(&self) -> Result<(), ShapeError> {
        match self {
            Self::Rect(dims) if !(2..=MAX_RECT_RANK).contains(&dims.len()) => {
                Err(ShapeError::RectRank(dims.len()))
            }
            Self::Flat(dims) if dims.is_empty() => Err(ShapeError::EmptyFlat),
            _ => Ok(()),
        }
    }

    /// Allocation kind recorded for this shape.
    #[must_use]
    pub fn kind(&self) -> AllocKind {
        match self {
            Self::Scalar => AllocKind::Scalar,
            Self::Vector(_) => AllocKind::OneD,
            Self::Rect(dims) => match dims.len() {
                0..=2 => AllocKind::TwoD,
                3 => AllocKind::ThreeD,
                _ => AllocKind::FourD,
            },
            Self::Flat(_) => AllocKind::Flat,
            Self::Jagged2 { .. } => AllocKind::Jagged2D,
            Self::Jagged3 { .. } => AllocKind::Jagged3D,
            Self::JaggedSetup { .. } => AllocKind::JaggedSetup,
        }
    }

    /// Uniform dimensions for vector, rectangular and flat shapes.
    #[must_use]
    pub fn dims(&self) -> Option<&[usize]> {
        match self {
            Self::Vector(len) => Some(std::slice::from_ref(len)),
            Self::Rect(dims) | Self::Flat(dims) => Some(dims),
            _ => None,
        }
    }

    /// Number of data items the shape holds, `None` on overflow.
    ///
    /// Products for uniform shapes, sums for jagged ones. A setup table holds
    /// one length entry per cell.
    #[must_use]
    pub fn cell_count(&self) -> Option<usize> {
        match self {
            Self::Scalar => Some(1),
            Self::Vector(len) => Some(*len),
            Self::Rect(dims) | Self::Flat(dims) => checked_product(dims),
            Self::Jagged2 { rows } | Self::JaggedSetup { rows } => checked_sum(rows),
            Self::Jagged3 { cells } => cells
                .iter()
                .try_fold(0usize, |acc, row| acc.checked_add(checked_sum(row)?)),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(values: &[usize], sep: &str) -> String {
            values
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(sep)
        }

        match self {
            Self::Scalar => f.write_str("scalar"),
            Self::Vector(len) => write!(f, "[{len}]"),
            Self::Rect(dims) => write!(f, "[{}]", join(dims, "x")),
            Self::Flat(dims) => write!(f, "flat[{}]", join(dims, "x")),
            Self::Jagged2 { rows } => write!(f, "rows[{}]", join(rows, ",")),
            Self::JaggedSetup { rows } => write!(f, "setup[{}]", join(rows, ",")),
            Self::Jagged3 { cells } => {
                let rows: Vec<String> = cells.iter().map(|row| format!("[{}]", join(row, ","))).collect();
                write!(f, "cells[{}]", rows.join(","))
            }
        }
    }
}

/// Row-major item index of `index` within `dims`:
/// `((i0 * d1 + i1) * d2 + i2) ...`.
///
/// Multiply by the item size to get the byte offset inside a flat block.
pub fn flat_index(dims: &[usize], index: &[usize]) -> Result<usize, ShapeError> {
    let bad = || ShapeError::BadIndex {
        index: index.to_vec(),
        shape: Shape::Flat(dims.to_vec()).to_string(),
    };
    if dims.len() != index.len() {
        return Err(bad());
    }
    let mut linear = 0usize;
    for (&dim, &i) in dims.iter().zip(index) {
        if i >= dim {
            return Err(bad());
        }
        linear = linear.checked_mul(dim).and_then(|v| v.checked_add(i)).ok_or_else(bad)?;
    }
    Ok(linear)
}

pub(crate) fn checked_product(values: &[usize]) -> Option<usize> {
    values.iter().try_fold(1usize, |acc, &v| acc.checked_mul(v))
}

pub(crate) fn checked_sum(values: &[usize]) -> Option<usize> {
    values.iter().try_fold(0usize, |acc, &v| acc.checked_add(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_rank() {
        assert_eq!(Shape::Scalar.kind(), AllocKind::Scalar);
        assert_eq!(Shape::Vector(3).kind(), AllocKind::OneD);
        assert_eq!(Shape::Rect(vec![2, 2]).kind(), AllocKind::TwoD);
        assert_eq!(Shape::Rect(vec![2, 2, 2]).kind(), AllocKind::ThreeD);
        assert_eq!(Shape::Rect(vec![2, 2, 2, 2]).kind(), AllocKind::FourD);
        assert_eq!(Shape::Flat(vec![4]).kind(), AllocKind::Flat);
        assert_eq!(
            Shape::Jagged3 { cells: vec![vec![1]] }.kind(),
            AllocKind::Jagged3D
        );
    }

    #[test]
    fn rect_rank_is_validated() {
        assert_eq!(
            Shape::Rect(vec![4]).validate(),
            Err(ShapeError::RectRank(1))
        );
        assert_eq!(
            Shape::Rect(vec![1, 1, 1, 1, 1]).validate(),
            Err(ShapeError::RectRank(5))
        );
        assert_eq!(Shape::Flat(vec![]).validate(), Err(ShapeError::EmptyFlat));
        assert!(Shape::Rect(vec![3, 4]).validate().is_ok());
    }

    #[test]
    fn cell_counts() {
        assert_eq!(Shape::Rect(vec![2, 3, 4]).cell_count(), Some(24));
        assert_eq!(Shape::Jagged2 { rows: vec![3, 0, 2] }.cell_count(), Some(5));
        assert_eq!(
            Shape::Jagged3 {
                cells: vec![vec![1, 2], vec![], vec![4]]
            }
            .cell_count(),
            Some(7)
        );
        assert_eq!(Shape::Flat(vec![usize::MAX, 2]).cell_count(), None);
    }

    #[test]
    fn row_major_formula() {
        let dims = [2, 3, 4];
        assert_eq!(flat_index(&dims, &[0, 0, 0]), Ok(0));
        assert_eq!(flat_index(&dims, &[0, 0, 3]), Ok(3));
        assert_eq!(flat_index(&dims, &[0, 1, 0]), Ok(4));
        assert_eq!(flat_index(&dims, &[1, 2, 3]), Ok(23));
        assert!(flat_index(&dims, &[2, 0, 0]).is_err());
        assert!(flat_index(&dims, &[0, 0]).is_err());
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(Shape::Rect(vec![2, 3]).to_string(), "[2x3]");
        assert_eq!(Shape::Jagged2 { rows: vec![3, 0, 2] }.to_string(), "rows[3,0,2]");
        assert_eq!(
            Shape::Jagged3 {
                cells: vec![vec![1, 2], vec![]]
            }
            .to_string(),
            "cells[[1,2],[]]"
        );
    }

    #[test]
    fn kind_names_round_trip_loosely() {
        for kind in [
            AllocKind::Scalar,
            AllocKind::OneD,
            AllocKind::TwoD,
            AllocKind::Flat,
            AllocKind::Jagged3D,
            AllocKind::JaggedSetup,
        ] {
            assert_eq!(AllocKind::from_str_loose(kind.as_str()), Some(kind));
        }
        assert_eq!(AllocKind::from_str_loose("JAGGED2D"), Some(AllocKind::Jagged2D));
        assert_eq!(AllocKind::from_str_loose("cube"), None);
    }
}
