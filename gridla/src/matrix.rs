/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::ops::Range;
use std::sync::Arc;

use gridla_utils::{MatView, MatViewMut, Matrix};

use crate::dist::{self, DistPair};
use crate::error::{Error, Result};
use crate::grid::ProcessGrid;
use crate::view::{Axis, DistView, DistViewMut};

/// A dense matrix partitioned across a process grid.
///
/// Each process stores exactly the entries its grid coordinate owns under
/// the matrix's distribution pair and alignments, as a packed column-major
/// block. The local buffer is exclusively owned: no other process ever
/// aliases it, and all cross-process movement goes through the explicit
/// redistribution operations.
#[derive(Debug)]
pub struct DistMatrix {
    grid: Arc<ProcessGrid>,
    pair: DistPair,
    row_align: usize,
    col_align: usize,
    height: usize,
    width: usize,
    local: Matrix<f64>,
    generation: u64,
}

impl DistMatrix {
    /// An empty (0x0) matrix under `pair` with zero alignments.
    pub fn new(grid: Arc<ProcessGrid>, pair: DistPair) -> Result<Self> {
        pair.validate()?;
        Ok(Self {
            grid,
            pair,
            row_align: 0,
            col_align: 0,
            height: 0,
            width: 0,
            local: Matrix::new(0.0, 0, 0),
            generation: 0,
        })
    }

    /// A `height x width` matrix under `pair` with zero alignments.
    ///
    /// Local contents are unspecified (currently zero) until filled.
    pub fn with_shape(
        grid: Arc<ProcessGrid>,
        pair: DistPair,
        height: usize,
        width: usize,
    ) -> Result<Self> {
        let mut matrix = Self::new(grid, pair)?;
        matrix.resize(height, width)?;
        Ok(matrix)
    }

    pub fn grid(&self) -> &Arc<ProcessGrid> {
        &self.grid
    }

    pub fn pair(&self) -> DistPair {
        self.pair
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row_align(&self) -> usize {
        self.row_align
    }

    pub fn col_align(&self) -> usize {
        self.col_align
    }

    /// Bumped by every resize; a persisted panel descriptor is stale once
    /// the generation it captured no longer matches.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// This process's team coordinate on the row axis, if it is in the
    /// grid.
    fn row_coord(&self) -> Option<usize> {
        let (row, col) = self.grid.coord()?;
        Some(self.pair.row.team_coord(&self.grid, row, col))
    }

    fn col_coord(&self) -> Option<usize> {
        let (row, col) = self.grid.coord()?;
        Some(self.pair.col.team_coord(&self.grid, row, col))
    }

    fn row_axis(&self) -> Axis {
        Axis::new(self.pair.row, &self.grid, self.row_align, self.height)
    }

    fn col_axis(&self) -> Axis {
        Axis::new(self.pair.col, &self.grid, self.col_align, self.width)
    }

    /// First global row this process owns.
    pub fn row_shift(&self) -> usize {
        self.row_coord()
            .map(|coord| self.row_axis().shift_of(coord))
            .unwrap_or(0)
    }

    /// First global column this process owns.
    pub fn col_shift(&self) -> usize {
        self.col_coord()
            .map(|coord| self.col_axis().shift_of(coord))
            .unwrap_or(0)
    }

    pub fn local_height(&self) -> usize {
        self.local.nrows()
    }

    pub fn local_width(&self) -> usize {
        self.local.ncols()
    }

    pub fn local(&self) -> MatView<'_, f64> {
        self.local.as_view()
    }

    pub fn local_mut(&mut self) -> MatViewMut<'_, f64> {
        self.local.as_view_mut()
    }

    /// The global row of local row `k`.
    pub fn global_row(&self, k: usize) -> usize {
        dist::local_to_global(k, self.row_shift(), self.pair.row.stride(&self.grid))
    }

    /// The global column of local column `k`.
    pub fn global_col(&self, k: usize) -> usize {
        dist::local_to_global(k, self.col_shift(), self.pair.col.stride(&self.grid))
    }

    /// The local row holding global row `i`, if this process owns it.
    pub fn local_row(&self, i: usize) -> Option<usize> {
        let coord = self.row_coord()?;
        let axis = self.row_axis();
        (axis.owner(i) == coord)
            .then(|| dist::global_to_local(i, axis.shift_of(coord), axis.stride))
    }

    /// The local column holding global column `j`, if this process owns it.
    pub fn local_col(&self, j: usize) -> Option<usize> {
        let coord = self.col_coord()?;
        let axis = self.col_axis();
        (axis.owner(j) == coord)
            .then(|| dist::global_to_local(j, axis.shift_of(coord), axis.stride))
    }

    /// Whether this process owns global entry `(i, j)`.
    pub fn owns(&self, i: usize, j: usize) -> bool {
        self.local_row(i).is_some() && self.local_col(j).is_some()
    }

    /// Reallocate for a new global shape.
    ///
    /// The local buffer is resized to exactly the entries this process
    /// owns under the current schemes and alignments; previous contents
    /// are discarded and the new contents are unspecified. Outstanding
    /// panel descriptors are invalidated (the generation advances).
    pub fn resize(&mut self, height: usize, width: usize) -> Result<()> {
        self.height = height;
        self.width = width;
        let (local_height, local_width) = match (self.row_coord(), self.col_coord()) {
            (Some(row_coord), Some(col_coord)) => (
                self.row_axis().len_of(row_coord),
                self.col_axis().len_of(col_coord),
            ),
            _ => (0, 0),
        };
        self.local.reshape(0.0, local_height, local_width);
        self.generation += 1;
        Ok(())
    }

    /// Set both alignments explicitly.
    ///
    /// Pure metadata: allowed only while the matrix is 0x0, before any
    /// data exists that the change would silently reinterpret.
    pub fn set_aligns(&mut self, row_align: usize, col_align: usize) -> Result<()> {
        if self.height != 0 || self.width != 0 {
            return Err(Error::AlignAfterAllocation);
        }
        let row_stride = self.pair.row.stride(&self.grid);
        let col_stride = self.pair.col.stride(&self.grid);
        if row_align >= row_stride {
            return Err(Error::Alignment {
                align: row_align,
                stride: row_stride,
            });
        }
        if col_align >= col_stride {
            return Err(Error::Alignment {
                align: col_align,
                stride: col_stride,
            });
        }
        self.row_align = row_align;
        self.col_align = col_align;
        Ok(())
    }

    /// Match this matrix's alignments to another's so later operations
    /// between the two can take the cheap redistribution path.
    ///
    /// Alignments carry over modulo this matrix's own team sizes. Like
    /// [`Self::set_aligns`], this is a metadata change and must happen
    /// before the matrix holds data.
    pub fn align_with(&mut self, other: &DistMatrix) -> Result<()> {
        let row_stride = self.pair.row.stride(&self.grid);
        let col_stride = self.pair.col.stride(&self.grid);
        self.set_aligns(
            other.row_align % row_stride,
            other.col_align % col_stride,
        )
    }

    /// Read global entry `(i, j)`.
    ///
    /// Storage is local-only: calling this on a process that does not own
    /// the entry is a programming error and panics. Use
    /// [`Self::get_broadcast`] when the value (not the storage) must
    /// become known beyond the owner.
    ///
    /// # Panics
    ///
    /// Panics if out of bounds or if this process does not own `(i, j)`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.check_bounds(i, j);
        let (li, lj) = self
            .local_row(i)
            .zip(self.local_col(j))
            .unwrap_or_else(|| panic!("entry ({i}, {j}) is not owned by this process"));
        self.local[(li, lj)]
    }

    /// Write global entry `(i, j)`.
    ///
    /// # Panics
    ///
    /// Panics if out of bounds or if this process does not own `(i, j)`.
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.check_bounds(i, j);
        let (li, lj) = self
            .local_row(i)
            .zip(self.local_col(j))
            .unwrap_or_else(|| panic!("entry ({i}, {j}) is not owned by this process"));
        self.local[(li, lj)] = value;
    }

    /// Read global entry `(i, j)` on every in-grid process.
    ///
    /// The lowest-coordinate owner broadcasts the value over the grid
    /// team. A synchronization point: every in-grid process must call it.
    ///
    /// # Panics
    ///
    /// Panics if out of bounds or called from a non-participating process.
    pub fn get_broadcast(&self, i: usize, j: usize) -> f64 {
        self.check_bounds(i, j);
        assert!(
            self.grid.in_grid(),
            "get_broadcast called from a process outside the grid"
        );

        // Resolve the lowest grid cell owning (i, j): any axis that pins a
        // grid coordinate does so; replicated directions fall back to 0.
        let (row_a, col_a) = self
            .pair
            .row
            .coord_cell(&self.grid, self.row_axis().owner(i));
        let (row_b, col_b) = self
            .pair
            .col
            .coord_cell(&self.grid, self.col_axis().owner(j));
        let root_cell = (
            row_a.or(row_b).unwrap_or(0),
            col_a.or(col_b).unwrap_or(0),
        );
        let root = self.grid.all_member(root_cell.0, root_cell.1);

        let mut buf = if self.grid.all_team().index() == Some(root) {
            vec![self.get(i, j)]
        } else {
            vec![0.0]
        };
        self.grid.all_team().broadcast(root, &mut buf);
        buf[0]
    }

    fn check_bounds(&self, i: usize, j: usize) {
        assert!(
            i < self.height && j < self.width,
            "entry ({i}, {j}) is out of bounds for a {}x{} matrix",
            self.height,
            self.width
        );
    }

    /// Set every locally owned entry from its global coordinates.
    pub fn fill_with<F>(&mut self, mut f: F)
    where
        F: FnMut(usize, usize) -> f64,
    {
        let row_shift = self.row_shift();
        let col_shift = self.col_shift();
        let row_stride = self.pair.row.stride(&self.grid);
        let col_stride = self.pair.col.stride(&self.grid);
        for lj in 0..self.local.ncols() {
            let j = dist::local_to_global(lj, col_shift, col_stride);
            for li in 0..self.local.nrows() {
                let i = dist::local_to_global(li, row_shift, row_stride);
                self.local[(li, lj)] = f(i, j);
            }
        }
    }

    /// A read-only panel over `rows` x `cols`.
    ///
    /// # Panics
    ///
    /// Panics if either range exceeds the current global shape.
    pub fn view(&self, rows: Range<usize>, cols: Range<usize>) -> DistView<'_> {
        let (row, col, local) = self.panel_parts(&rows, &cols);
        DistView {
            grid: &self.grid,
            pair: self.pair,
            row,
            col,
            local,
        }
    }

    /// The whole matrix as a read-only view.
    pub fn as_view(&self) -> DistView<'_> {
        self.view(0..self.height, 0..self.width)
    }

    /// A mutable panel over `rows` x `cols`.
    ///
    /// # Panics
    ///
    /// Panics if either range exceeds the current global shape.
    pub fn view_mut(&mut self, rows: Range<usize>, cols: Range<usize>) -> DistViewMut<'_> {
        let (row, col, _) = self.panel_parts(&rows, &cols);
        let (row_lo, row_hi, col_lo, col_hi) = self.local_ranges(&rows, &cols);
        let local = self
            .local
            .as_view_mut()
            .into_sub(row_lo..row_hi, col_lo..col_hi);
        DistViewMut {
            grid: &self.grid,
            pair: self.pair,
            row,
            col,
            local,
        }
    }

    /// The whole matrix as a mutable view.
    pub fn as_view_mut(&mut self) -> DistViewMut<'_> {
        self.view_mut(0..self.height, 0..self.width)
    }

    fn panel_parts(
        &self,
        rows: &Range<usize>,
        cols: &Range<usize>,
    ) -> (Axis, Axis, MatView<'_, f64>) {
        let (row_lo, row_hi, col_lo, col_hi) = self.local_ranges(rows, cols);
        let row = Axis::new(
            self.pair.row,
            &self.grid,
            self.row_align + rows.start,
            rows.end - rows.start,
        );
        let col = Axis::new(
            self.pair.col,
            &self.grid,
            self.col_align + cols.start,
            cols.end - cols.start,
        );
        let local = self
            .local
            .as_view()
            .sub(row_lo..row_hi, col_lo..col_hi);
        (row, col, local)
    }

    /// Gather a full dense copy of the matrix onto every in-grid process.
    ///
    /// A synchronization point. Non-participating processes receive an
    /// empty (0x0) result.
    pub fn to_replicated(&self) -> Result<Matrix<f64>> {
        let mut full = DistMatrix::with_shape(
            self.grid.clone(),
            DistPair::REPLICATED,
            self.height,
            self.width,
        )?;
        crate::redist::copy_into(&self.as_view(), &mut full.as_view_mut())?;
        Ok(full.local)
    }

    /// The contiguous local index ranges covering a global sub-range.
    fn local_ranges(
        &self,
        rows: &Range<usize>,
        cols: &Range<usize>,
    ) -> (usize, usize, usize, usize) {
        assert!(
            rows.end <= self.height && cols.end <= self.width,
            "panel {rows:?} x {cols:?} exceeds a {}x{} matrix",
            self.height,
            self.width
        );
        if !self.grid.in_grid() {
            return (0, 0, 0, 0);
        }
        let row_shift = self.row_shift();
        let row_stride = self.pair.row.stride(&self.grid);
        let col_shift = self.col_shift();
        let col_stride = self.pair.col.stride(&self.grid);
        (
            dist::local_len(rows.start, row_shift, row_stride),
            dist::local_len(rows.end, row_shift, row_stride),
            dist::local_len(cols.start, col_shift, col_stride),
            dist::local_len(cols.end, col_shift, col_stride),
        )
    }
}
