/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Panel views: borrowed rectangular sub-ranges of a distributed matrix.
//!
//! A view is `(parent, row range, col range)`: it shares the parent's
//! schemes and storage, never copies, and shifts the alignments by the
//! range start so that its own global index 0 maps to the right team
//! coordinate. Rust's borrow rules keep a view from outliving a resize of
//! its parent; the parent's generation counter serves the same role for
//! any descriptor that is persisted rather than borrowed.

use std::sync::Arc;

use gridla_utils::{MatView, MatViewMut};

use crate::dist::{self, Dist, DistPair};
use crate::grid::ProcessGrid;

/// One axis of a view: scheme, cycle, alignment, and global extent.
///
/// Everything the redistribution engine needs to reason about ownership —
/// on any process, not just this one — lives here, so receivers can replay
/// a sender's packing order from metadata alone.
#[derive(Debug, Clone, Copy)]
pub struct Axis {
    pub dist: Dist,
    pub stride: usize,
    pub align: usize,
    pub extent: usize,
}

impl Axis {
    pub(crate) fn new(dist: Dist, grid: &ProcessGrid, align: usize, extent: usize) -> Self {
        Self {
            dist,
            stride: dist.stride(grid),
            align: align % dist.stride(grid).max(1),
            extent,
        }
    }

    /// The owning team coordinate of global index `idx`.
    pub fn owner(&self, idx: usize) -> usize {
        dist::owner(idx, self.stride, self.align)
    }

    /// First global index owned by team coordinate `coord`.
    pub fn shift_of(&self, coord: usize) -> usize {
        dist::shift(coord, self.stride, self.align)
    }

    /// How many indices team coordinate `coord` owns.
    pub fn len_of(&self, coord: usize) -> usize {
        dist::local_len(self.extent, self.shift_of(coord), self.stride)
    }

    /// The team coordinate of grid cell `(row, col)` under this axis.
    pub fn coord_of_cell(&self, grid: &ProcessGrid, row: usize, col: usize) -> usize {
        self.dist.team_coord(grid, row, col)
    }
}

/// A read-only panel view of a distributed matrix.
#[derive(Clone, Copy)]
pub struct DistView<'a> {
    pub(crate) grid: &'a Arc<ProcessGrid>,
    pub(crate) pair: DistPair,
    pub(crate) row: Axis,
    pub(crate) col: Axis,
    pub(crate) local: MatView<'a, f64>,
}

/// A mutable panel view of a distributed matrix.
pub struct DistViewMut<'a> {
    pub(crate) grid: &'a Arc<ProcessGrid>,
    pub(crate) pair: DistPair,
    pub(crate) row: Axis,
    pub(crate) col: Axis,
    pub(crate) local: MatViewMut<'a, f64>,
}

impl<'a> DistView<'a> {
    pub fn grid(&self) -> &'a Arc<ProcessGrid> {
        self.grid
    }

    pub fn pair(&self) -> DistPair {
        self.pair
    }

    pub fn height(&self) -> usize {
        self.row.extent
    }

    pub fn width(&self) -> usize {
        self.col.extent
    }

    pub fn row_axis(&self) -> Axis {
        self.row
    }

    pub fn col_axis(&self) -> Axis {
        self.col
    }

    /// The locally owned block of this panel.
    pub fn local(&self) -> MatView<'a, f64> {
        self.local
    }
}

impl<'a> DistViewMut<'a> {
    pub fn grid(&self) -> &'a Arc<ProcessGrid> {
        self.grid
    }

    pub fn pair(&self) -> DistPair {
        self.pair
    }

    pub fn height(&self) -> usize {
        self.row.extent
    }

    pub fn width(&self) -> usize {
        self.col.extent
    }

    pub fn row_axis(&self) -> Axis {
        self.row
    }

    pub fn col_axis(&self) -> Axis {
        self.col
    }

    pub fn local(&self) -> MatView<'_, f64> {
        self.local.as_view()
    }

    pub fn local_mut(&mut self) -> &mut MatViewMut<'a, f64> {
        &mut self.local
    }

    /// Reborrow as a read-only view.
    pub fn as_view(&self) -> DistView<'_> {
        DistView {
            grid: self.grid,
            pair: self.pair,
            row: self.row,
            col: self.col,
            local: self.local.as_view(),
        }
    }
}
