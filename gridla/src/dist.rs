/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Distribution schemes: the rules mapping a global row or column index to
//! an owning grid coordinate and a local offset.

use crate::error::{Error, Result};
use crate::grid::ProcessGrid;

/// How one axis of a distributed matrix maps onto the process grid.
///
/// Each scheme is a cyclic (round-robin) map from global indices to the
/// members of one team of the grid, plus a per-matrix alignment choosing
/// which member owns global index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dist {
    /// Cyclic over the grid's rows: index `i` lives on grid row
    /// `(align + i) % height`.
    MatRow,
    /// Cyclic over the grid's columns.
    MatCol,
    /// Cyclic over every in-grid rank, walking the grid column-major.
    VecCol,
    /// Cyclic over every in-grid rank, walking the grid row-major.
    VecRow,
    /// Replicated: every in-grid process stores the whole axis.
    Repl,
}

impl Dist {
    /// The cycle length of this scheme on `grid`.
    pub fn stride(self, grid: &ProcessGrid) -> usize {
        match self {
            Dist::MatRow => grid.height(),
            Dist::MatCol => grid.width(),
            Dist::VecCol | Dist::VecRow => grid.size(),
            Dist::Repl => 1,
        }
    }

    /// The team coordinate of grid cell `(row, col)` under this scheme.
    pub fn team_coord(self, grid: &ProcessGrid, row: usize, col: usize) -> usize {
        match self {
            Dist::MatRow => row,
            Dist::MatCol => col,
            Dist::VecCol => row + col * grid.height(),
            Dist::VecRow => col + row * grid.width(),
            Dist::Repl => 0,
        }
    }

    /// The grid cell holding team coordinate `coord` under this scheme.
    ///
    /// Meaningless for [`Dist::Repl`] (every cell holds every index);
    /// callers expand replicated axes before asking.
    pub fn coord_cell(self, grid: &ProcessGrid, coord: usize) -> (Option<usize>, Option<usize>) {
        match self {
            Dist::MatRow => (Some(coord), None),
            Dist::MatCol => (None, Some(coord)),
            Dist::VecCol => (
                Some(coord % grid.height()),
                Some(coord / grid.height()),
            ),
            Dist::VecRow => (Some(coord / grid.width()), Some(coord % grid.width())),
            Dist::Repl => (None, None),
        }
    }
}

/// The team coordinate owning global index `idx` for a scheme with the
/// given `stride` and `align`.
pub fn owner(idx: usize, stride: usize, align: usize) -> usize {
    (align + idx) % stride
}

/// The first global index owned by team coordinate `coord`.
pub fn shift(coord: usize, stride: usize, align: usize) -> usize {
    (coord + stride - align % stride) % stride
}

/// How many of `extent` global indices the coordinate with this `shift`
/// owns.
pub fn local_len(extent: usize, shift: usize, stride: usize) -> usize {
    if extent > shift {
        (extent - shift - 1) / stride + 1
    } else {
        0
    }
}

/// The global index of local entry `k` for a coordinate with this `shift`.
pub fn local_to_global(k: usize, shift: usize, stride: usize) -> usize {
    shift + k * stride
}

/// The local offset of global index `idx`, which must be owned by the
/// coordinate with this `shift`.
pub fn global_to_local(idx: usize, shift: usize, stride: usize) -> usize {
    debug_assert_eq!((idx + stride - shift) % stride, 0);
    (idx - shift) / stride
}

/// The pair of per-axis schemes a matrix is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DistPair {
    pub row: Dist,
    pub col: Dist,
}

impl DistPair {
    /// The workhorse layout: rows over grid rows, columns over grid
    /// columns.
    pub const STANDARD: DistPair = DistPair {
        row: Dist::MatRow,
        col: Dist::MatCol,
    };

    /// Fully replicated on every in-grid process.
    pub const REPLICATED: DistPair = DistPair {
        row: Dist::Repl,
        col: Dist::Repl,
    };

    pub const fn new(row: Dist, col: Dist) -> Self {
        Self { row, col }
    }

    /// Check that the two axes form one of the legal pairs.
    ///
    /// The grid's row and column teams can each carry at most one axis,
    /// and the linear (vector) schemes use every rank for a single axis,
    /// so their partner must be replicated.
    pub fn validate(self) -> Result<()> {
        use Dist::*;
        let ok = matches!(
            (self.row, self.col),
            (MatRow, MatCol)
                | (MatRow, Repl)
                | (Repl, MatCol)
                | (MatCol, MatRow)
                | (MatCol, Repl)
                | (Repl, MatRow)
                | (VecCol, Repl)
                | (Repl, VecCol)
                | (VecRow, Repl)
                | (Repl, VecRow)
                | (Repl, Repl)
        );
        if ok {
            Ok(())
        } else {
            Err(Error::Distribution {
                row: self.row,
                col: self.col,
            })
        }
    }

    /// Every legal pair, in a fixed order (useful for sweeps in tests).
    pub fn all() -> [DistPair; 11] {
        use Dist::*;
        [
            DistPair::new(MatRow, MatCol),
            DistPair::new(MatRow, Repl),
            DistPair::new(Repl, MatCol),
            DistPair::new(MatCol, MatRow),
            DistPair::new(MatCol, Repl),
            DistPair::new(Repl, MatRow),
            DistPair::new(VecCol, Repl),
            DistPair::new(Repl, VecCol),
            DistPair::new(VecRow, Repl),
            DistPair::new(Repl, VecRow),
            DistPair::new(Repl, Repl),
        ]
    }
}
