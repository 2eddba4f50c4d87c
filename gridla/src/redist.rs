/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The redistribution protocol: value-preserving conversion of a matrix
//! between distribution pairs.
//!
//! For every ordered pair of scheme tags there is exactly one fixed
//! route, selected from metadata alone:
//!
//! * **Local** — every destination-owned entry is already held locally
//!   (the source axis is replicated or identical); pure extraction.
//! * **Exchange(team)** — one deterministic packed exchange inside the
//!   row team, the column team, or the whole grid. Senders pack their
//!   owned entries per destination following a designated-sender rule;
//!   receivers re-derive each sender's packing order from metadata, so no
//!   index headers travel and concatenation reproduces global order.
//! * **TwoStage** — pairs whose row and column schemes swap grid
//!   orientation move through a fixed intermediate (the column axis
//!   gathered to replicated inside each row team) and then one grid-wide
//!   exchange — never a single collective.
//!
//! Shape mismatches are detected from metadata and raised identically on
//! every process before any communication is issued.

use gridla_comm::ProcessGroup;
use tracing::trace;

use crate::dist::{self, Dist, DistPair};
use crate::error::{Error, Result};
use crate::grid::ProcessGrid;
use crate::matrix::DistMatrix;
use crate::view::{Axis, DistView, DistViewMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Row,
    Col,
    Grid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Local,
    Exchange(Scope),
    TwoStage,
}

/// The function giving one grid coordinate of an entry's owner, as
/// determined by a distribution pair. Two pairs whose functions agree on
/// an axis never move data across that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordFn {
    /// No constraint: replicas exist at every coordinate.
    Any,
    /// `(residue + row index) % modulus`.
    FromRow(usize),
    /// `(residue + col index) % modulus`.
    FromCol(usize),
    /// A floor-division map from a linear scheme; never matched against.
    Unique,
}

fn grid_row_fn(pair: DistPair, row: Axis, col: Axis, grid: &ProcessGrid) -> CoordFn {
    let r = grid.height();
    match pair.row {
        Dist::MatRow => return CoordFn::FromRow(row.align % r),
        // A column-major linear walk lands index v on grid row v % height.
        Dist::VecCol => return CoordFn::FromRow(row.align % r),
        Dist::VecRow => return CoordFn::Unique,
        _ => {}
    }
    match pair.col {
        Dist::MatRow => CoordFn::FromCol(col.align % r),
        Dist::VecCol => CoordFn::FromCol(col.align % r),
        Dist::VecRow => CoordFn::Unique,
        _ => CoordFn::Any,
    }
}

fn grid_col_fn(pair: DistPair, row: Axis, col: Axis, grid: &ProcessGrid) -> CoordFn {
    let c = grid.width();
    match pair.row {
        Dist::MatCol => return CoordFn::FromRow(row.align % c),
        // A row-major linear walk lands index v on grid column v % width.
        Dist::VecRow => return CoordFn::FromRow(row.align % c),
        Dist::VecCol => return CoordFn::Unique,
        _ => {}
    }
    match pair.col {
        Dist::MatCol => CoordFn::FromCol(col.align % c),
        Dist::VecRow => CoordFn::FromCol(col.align % c),
        Dist::VecCol => CoordFn::Unique,
        _ => CoordFn::Any,
    }
}

/// Whether a source whose coordinate function is `src` can serve every
/// destination replica of a function `dst` without crossing the axis.
fn covers(src: CoordFn, dst: CoordFn) -> bool {
    match src {
        CoordFn::Any => true,
        CoordFn::Unique => false,
        _ => src == dst,
    }
}

/// Transpose-like pairs: the row or column scheme swaps which grid
/// orientation it cycles over.
fn crossing(a: DistPair, b: DistPair) -> bool {
    let mat = |d: Dist| matches!(d, Dist::MatRow | Dist::MatCol);
    (mat(a.row) && mat(b.row) && a.row != b.row) || (mat(a.col) && mat(b.col) && a.col != b.col)
}

fn route(src: &DistView<'_>, dst: &DistViewMut<'_>) -> Route {
    let grid = src.grid();
    let src_row = grid_row_fn(src.pair, src.row, src.col, grid);
    let dst_row = grid_row_fn(dst.pair, dst.row, dst.col, grid);
    let src_col = grid_col_fn(src.pair, src.row, src.col, grid);
    let dst_col = grid_col_fn(dst.pair, dst.row, dst.col, grid);

    let row_covered = covers(src_row, dst_row);
    let col_covered = covers(src_col, dst_col);
    if row_covered && col_covered {
        Route::Local
    } else if row_covered {
        Route::Exchange(Scope::Row)
    } else if col_covered {
        Route::Exchange(Scope::Col)
    } else if crossing(src.pair, dst.pair) {
        Route::TwoStage
    } else {
        Route::Exchange(Scope::Grid)
    }
}

fn check_same_grid(src: &DistView<'_>, dst: &DistViewMut<'_>) {
    assert!(
        std::sync::Arc::ptr_eq(src.grid(), dst.grid()),
        "redistribution between matrices on different grids"
    );
}

/// Copy `src` into `dst`, converting between distribution pairs.
///
/// Value-preserving and exact: a round trip through any chain of pairs
/// reproduces the original bits. A synchronization point for every
/// in-grid process whenever the route involves communication.
pub fn copy_into(src: &DistView<'_>, dst: &mut DistViewMut<'_>) -> Result<()> {
    check_same_grid(src, dst);
    if src.height() != dst.height() || src.width() != dst.width() {
        return Err(Error::DimensionMismatch {
            op: "redistribute",
            left_rows: src.height(),
            left_cols: src.width(),
            right_rows: dst.height(),
            right_cols: dst.width(),
        });
    }
    if src.height() == 0 || src.width() == 0 {
        return Ok(());
    }

    match route(src, dst) {
        Route::Local => {
            trace!(from = ?src.pair, to = ?dst.pair, "redistribute: local extraction");
            local_copy(src, dst, false);
        }
        Route::Exchange(scope) => {
            trace!(from = ?src.pair, to = ?dst.pair, ?scope, "redistribute: exchange");
            exchange(src, dst, scope, false);
        }
        Route::TwoStage => {
            trace!(from = ?src.pair, to = ?dst.pair, "redistribute: two-stage");
            let mid = gather_cols_to_replicated(src)?;
            exchange(&mid.as_view(), dst, Scope::Grid, false);
        }
    }
    Ok(())
}

/// Copy the transpose of `src` into `dst`.
///
/// Entry `(i, j)` of the source lands at `(j, i)` of the destination.
/// Runs as a fixed two-step: the source's column axis is first collected
/// to a replicated form inside each row team (skipped when it already
/// is), then one grid-wide exchange scatters the transposed entries.
pub fn transpose_into(src: &DistView<'_>, dst: &mut DistViewMut<'_>) -> Result<()> {
    check_same_grid(src, dst);
    if src.height() != dst.width() || src.width() != dst.height() {
        return Err(Error::DimensionMismatch {
            op: "transpose",
            left_rows: src.height(),
            left_cols: src.width(),
            right_rows: dst.height(),
            right_cols: dst.width(),
        });
    }
    if src.height() == 0 || src.width() == 0 {
        return Ok(());
    }

    if src.pair.col != Dist::Repl {
        let mid = gather_cols_to_replicated(src)?;
        exchange(&mid.as_view(), dst, Scope::Grid, true);
    } else {
        exchange(src, dst, Scope::Grid, true);
    }
    Ok(())
}

/// Stage one of the fixed two-stage routes: gather the column axis to
/// replicated, keeping the row axis in place. A single-team exchange —
/// the row teams when the row axis cycles over grid rows, the column
/// teams when it cycles over grid columns.
fn gather_cols_to_replicated(src: &DistView<'_>) -> Result<DistMatrix> {
    let mut mid = DistMatrix::new(
        src.grid().clone(),
        DistPair::new(src.pair.row, Dist::Repl),
    )?;
    mid.set_aligns(src.row.align, 0)?;
    mid.resize(src.height(), src.width())?;
    copy_into(src, &mut mid.as_view_mut())?;
    Ok(mid)
}

/// The grid cell constraints of the owner(s) of global entry `(i, j)`
/// under a view's pair: `None` on an axis means replicas at every
/// coordinate of that axis.
fn owner_cell(
    pair: DistPair,
    row: &Axis,
    col: &Axis,
    grid: &ProcessGrid,
    i: usize,
    j: usize,
) -> (Option<usize>, Option<usize>) {
    let (row_a, col_a) = pair.row.coord_cell(grid, row.owner(i));
    let (row_b, col_b) = pair.col.coord_cell(grid, col.owner(j));
    (row_a.or(row_b), col_a.or(col_b))
}

fn member_of(scope: Scope, grid: &ProcessGrid, cell: (usize, usize)) -> usize {
    match scope {
        Scope::Row => cell.1,
        Scope::Col => cell.0,
        Scope::Grid => grid.all_member(cell.0, cell.1),
    }
}

fn cell_of_member(scope: Scope, grid: &ProcessGrid, me: (usize, usize), member: usize) -> (usize, usize) {
    match scope {
        Scope::Row => (me.0, member),
        Scope::Col => (member, me.1),
        Scope::Grid => (member % grid.height(), member / grid.height()),
    }
}

fn scope_group<'a>(scope: Scope, grid: &'a ProcessGrid) -> &'a ProcessGroup {
    match scope {
        Scope::Row => grid.row_team().expect("in-grid process has a row team"),
        Scope::Col => grid.col_team().expect("in-grid process has a column team"),
        Scope::Grid => grid.all_team(),
    }
}

/// Pure local extraction: every destination-owned entry is already held
/// in the source's local block.
fn local_copy(src: &DistView<'_>, dst: &mut DistViewMut<'_>, transposed: bool) {
    let grid = src.grid().clone();
    let Some((p, q)) = grid.coord() else { return };

    let src_row_coord = src.pair.row.team_coord(&grid, p, q);
    let src_col_coord = src.pair.col.team_coord(&grid, p, q);
    let src_row_shift = src.row.shift_of(src_row_coord);
    let src_col_shift = src.col.shift_of(src_col_coord);

    let dst_row = dst.row;
    let dst_col = dst.col;
    let dst_row_shift = dst_row.shift_of(dst.pair.row.team_coord(&grid, p, q));
    let dst_col_shift = dst_col.shift_of(dst.pair.col.team_coord(&grid, p, q));
    let (dst_rows, dst_cols) = (dst.local().nrows(), dst.local().ncols());

    let src_local = src.local();
    let dst_local = dst.local_mut();
    for lj in 0..dst_cols {
        let tj = dist::local_to_global(lj, dst_col_shift, dst_col.stride);
        for li in 0..dst_rows {
            let ti = dist::local_to_global(li, dst_row_shift, dst_row.stride);
            let (i, j) = if transposed { (tj, ti) } else { (ti, tj) };
            let sli = dist::global_to_local(i, src_row_shift, src.row.stride);
            let slj = dist::global_to_local(j, src_col_shift, src.col.stride);
            dst_local[(li, lj)] = src_local[(sli, slj)];
        }
    }
}

/// One packed exchange within `scope`: the single fixed communication
/// pattern behind every non-local route.
///
/// Each sender walks its owned source entries in column-major local
/// order; for each destination replica reachable inside the scope, a
/// designated-sender rule (the holder matching the replica's coordinates
/// where the source is replicated) elects exactly one sender. Receivers
/// replay every sender's walk from metadata to learn the order of the
/// values they were sent.
fn exchange(src: &DistView<'_>, dst: &mut DistViewMut<'_>, scope: Scope, transposed: bool) {
    let grid = src.grid().clone();
    let Some(me) = grid.coord() else { return };
    let group = scope_group(scope, &grid);

    let reach_rows: Vec<usize> = match scope {
        Scope::Row => vec![me.0],
        _ => (0..grid.height()).collect(),
    };
    let reach_cols: Vec<usize> = match scope {
        Scope::Col => vec![me.1],
        _ => (0..grid.width()).collect(),
    };

    // Destination metadata, copied out so the mutable local view below
    // has the buffer to itself.
    let dst_pair = dst.pair;
    let dst_row = dst.row;
    let dst_col = dst.col;

    // Pack: my owned entries, per destination member.
    let mut bufs: Vec<Vec<f64>> = vec![Vec::new(); group.size()];
    {
        let src_row_coord = src.pair.row.team_coord(&grid, me.0, me.1);
        let src_col_coord = src.pair.col.team_coord(&grid, me.0, me.1);
        let row_shift = src.row.shift_of(src_row_coord);
        let col_shift = src.col.shift_of(src_col_coord);
        let local = src.local();
        for lj in 0..local.ncols() {
            let j = dist::local_to_global(lj, col_shift, src.col.stride);
            for li in 0..local.nrows() {
                let i = dist::local_to_global(li, row_shift, src.row.stride);
                let value = local[(li, lj)];
                let (ti, tj) = if transposed { (j, i) } else { (i, j) };
                let (src_r, src_c) = owner_cell(src.pair, &src.row, &src.col, &grid, i, j);
                let (dst_r, dst_c) = owner_cell(dst_pair, &dst_row, &dst_col, &grid, ti, tj);
                for_each_replica(&reach_rows, &reach_cols, dst_r, dst_c, |cell| {
                    let sender = (src_r.unwrap_or(cell.0), src_c.unwrap_or(cell.1));
                    if sender == me {
                        bufs[member_of(scope, &grid, cell)].push(value);
                    }
                });
            }
        }
    }

    let received = group.all_to_all(bufs);

    // Unpack: replay each sender's walk to recover what it sent me.
    let dst_row_shift = dst_row.shift_of(dst_pair.row.team_coord(&grid, me.0, me.1));
    let dst_col_shift = dst_col.shift_of(dst_pair.col.team_coord(&grid, me.0, me.1));
    let dst_local = dst.local_mut();

    for (member, payload) in received.iter().enumerate() {
        let sender_cell = cell_of_member(scope, &grid, me, member);
        let sender_reach_rows: Vec<usize> = match scope {
            Scope::Row => vec![sender_cell.0],
            _ => (0..grid.height()).collect(),
        };
        let sender_reach_cols: Vec<usize> = match scope {
            Scope::Col => vec![sender_cell.1],
            _ => (0..grid.width()).collect(),
        };

        let s_row_coord = src.pair.row.team_coord(&grid, sender_cell.0, sender_cell.1);
        let s_col_coord = src.pair.col.team_coord(&grid, sender_cell.0, sender_cell.1);
        let s_row_shift = src.row.shift_of(s_row_coord);
        let s_col_shift = src.col.shift_of(s_col_coord);
        let s_rows = dist::local_len(src.height(), s_row_shift, src.row.stride);
        let s_cols = dist::local_len(src.width(), s_col_shift, src.col.stride);

        let mut pos = 0;
        for lj in 0..s_cols {
            let j = dist::local_to_global(lj, s_col_shift, src.col.stride);
            for li in 0..s_rows {
                let i = dist::local_to_global(li, s_row_shift, src.row.stride);
                let (ti, tj) = if transposed { (j, i) } else { (i, j) };
                let (src_r, src_c) = owner_cell(src.pair, &src.row, &src.col, &grid, i, j);
                let (dst_r, dst_c) = owner_cell(dst_pair, &dst_row, &dst_col, &grid, ti, tj);
                for_each_replica(&sender_reach_rows, &sender_reach_cols, dst_r, dst_c, |cell| {
                    let sender = (src_r.unwrap_or(cell.0), src_c.unwrap_or(cell.1));
                    if sender == sender_cell && cell == me {
                        let value = payload[pos];
                        pos += 1;
                        let li = dist::global_to_local(ti, dst_row_shift, dst_row.stride);
                        let lj = dist::global_to_local(tj, dst_col_shift, dst_col.stride);
                        dst_local[(li, lj)] = value;
                    }
                });
            }
        }
        debug_assert_eq!(pos, payload.len(), "replay drift against sender {member}");
    }
}

/// Visit every destination replica cell within reach, rows outer and
/// columns inner — the one iteration order both sides of an exchange use.
fn for_each_replica<F>(
    reach_rows: &[usize],
    reach_cols: &[usize],
    row_constraint: Option<usize>,
    col_constraint: Option<usize>,
    mut f: F,
) where
    F: FnMut((usize, usize)),
{
    let rows: &[usize] = match &row_constraint {
        Some(r) => {
            if reach_rows.contains(r) {
                std::slice::from_ref(r)
            } else {
                &[]
            }
        }
        None => reach_rows,
    };
    let cols: &[usize] = match &col_constraint {
        Some(c) => {
            if reach_cols.contains(c) {
                std::slice::from_ref(c)
            } else {
                &[]
            }
        }
        None => reach_cols,
    };
    for &row in rows {
        for &col in cols {
            f((row, col));
        }
    }
}
