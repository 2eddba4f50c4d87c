/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Blocked distributed solve and multiply against a (quasi-)triangular
//! matrix.
//!
//! The diagonal is walked in panels; each step replicates the cheap
//! nb-by-nb diagonal block, applies the local kernel (which fuses 2x2
//! complex-pair blocks through a Givens rotation), and folds the
//! off-diagonal panel into the remaining right-hand side. Panel
//! boundaries are nudged so a fused pair is never split; the coupling
//! entries are gathered once at entry so the nudging is data-independent
//! on every process thereafter.

use gridla_linalg::{dgemm, quasi_singularity, quasi_trmm, quasi_trsm, Side, Transpose, UpLo};
use tracing::debug;

use crate::config::{SolveOptions, TuningConfig};
use crate::dist::{Dist, DistPair};
use crate::error::{Error, Result};
use crate::matrix::DistMatrix;
use crate::redist::{copy_into, transpose_into};

/// How each X panel travels, chosen from the panel width per in-grid
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelStrategy {
    /// X panels replicate along the column teams; the workhorse for wide
    /// right-hand sides.
    Large,
    /// X panels travel transposed (two transposes replace the gather) to
    /// cut message counts at moderate widths.
    Medium,
    /// T and X are gathered whole and every process solves redundantly;
    /// for right-hand sides too narrow to amortize panel traffic.
    Small,
}

fn select_strategy(cfg: &TuningConfig, width: usize, grid_size: usize) -> PanelStrategy {
    if width <= cfg.solve_small_width * grid_size {
        PanelStrategy::Small
    } else if width <= cfg.solve_medium_width * grid_size {
        PanelStrategy::Medium
    } else {
        PanelStrategy::Large
    }
}

/// `X := op(T)^-1 X` with the strategy chosen from X's width.
pub fn triangular_solve(
    cfg: &TuningConfig,
    uplo: UpLo,
    trans: Transpose,
    t: &DistMatrix,
    x: &mut DistMatrix,
    opts: SolveOptions,
) -> Result<()> {
    let strategy = select_strategy(cfg, x.width(), t.grid().size());
    triangular_solve_with_strategy(cfg, strategy, uplo, trans, t, x, opts)
}

/// `X := op(T) X` with the strategy chosen from X's width.
pub fn triangular_multiply(
    cfg: &TuningConfig,
    uplo: UpLo,
    trans: Transpose,
    t: &DistMatrix,
    x: &mut DistMatrix,
) -> Result<()> {
    let strategy = select_strategy(cfg, x.width(), t.grid().size());
    triangular_multiply_with_strategy(cfg, strategy, uplo, trans, t, x)
}

/// [`triangular_solve`] with the panel strategy forced.
pub fn triangular_solve_with_strategy(
    cfg: &TuningConfig,
    strategy: PanelStrategy,
    uplo: UpLo,
    trans: Transpose,
    t: &DistMatrix,
    x: &mut DistMatrix,
    opts: SolveOptions,
) -> Result<()> {
    validate(t, x)?;
    debug!(?strategy, ?uplo, ?trans, m = t.height(), n = x.width(), "triangular solve");
    match strategy {
        PanelStrategy::Small => solve_small(uplo, trans, t, x, opts),
        _ => solve_blocked(cfg, strategy, uplo, trans, t, x, opts),
    }
}

/// [`triangular_multiply`] with the panel strategy forced.
pub fn triangular_multiply_with_strategy(
    cfg: &TuningConfig,
    strategy: PanelStrategy,
    uplo: UpLo,
    trans: Transpose,
    t: &DistMatrix,
    x: &mut DistMatrix,
) -> Result<()> {
    validate(t, x)?;
    debug!(?strategy, ?uplo, ?trans, m = t.height(), n = x.width(), "triangular multiply");
    match strategy {
        PanelStrategy::Small => multiply_small(uplo, trans, t, x),
        _ => multiply_blocked(cfg, strategy, uplo, trans, t, x),
    }
}

fn validate(t: &DistMatrix, x: &DistMatrix) -> Result<()> {
    assert!(
        std::sync::Arc::ptr_eq(t.grid(), x.grid()),
        "triangular operands live on different grids"
    );
    for matrix in [t, x] {
        if matrix.pair() != DistPair::STANDARD {
            return Err(Error::Distribution {
                row: matrix.pair().row,
                col: matrix.pair().col,
            });
        }
    }
    if t.height() != t.width() || t.width() != x.height() {
        return Err(Error::DimensionMismatch {
            op: "triangular",
            left_rows: t.height(),
            left_cols: t.width(),
            right_rows: x.height(),
            right_cols: x.width(),
        });
    }
    Ok(())
}

/// The coupling entries tying adjacent diagonal indices into fused 2x2
/// blocks, gathered once and replicated so panel boundaries are decided
/// identically everywhere.
fn gather_couplings(uplo: UpLo, t: &DistMatrix) -> Vec<f64> {
    let m = t.height();
    let mut couple = vec![0.0; m.saturating_sub(1)];
    if !t.grid().in_grid() || m < 2 {
        return couple;
    }
    for (idx, value) in couple.iter_mut().enumerate() {
        let (i, j) = match uplo {
            UpLo::Upper => (idx + 1, idx),
            UpLo::Lower => (idx, idx + 1),
        };
        if t.owns(i, j) {
            *value = t.get(i, j);
        }
    }
    t.grid().all_team().all_reduce_sum(&mut couple);
    couple
}

/// Partition the diagonal into panels of about `nb`, never splitting a
/// coupled pair.
fn diagonal_panels(m: usize, nb: usize, couple: &[f64]) -> Vec<(usize, usize)> {
    let nb = nb.max(2);
    let mut panels = Vec::new();
    let mut start = 0;
    while start < m {
        let mut end = (start + nb).min(m);
        if end < m && couple[end - 1] != 0.0 {
            end += 1;
        }
        panels.push((start, end));
        start = end;
    }
    panels
}

/// Gather the replicated diagonal block and, when asked, run the
/// singularity test on it — from identical data on every process, so an
/// error never leaves a collective half-entered.
fn replicated_diag_block(
    uplo: UpLo,
    t: &DistMatrix,
    kb: usize,
    ke: usize,
    check: Option<f64>,
) -> Result<DistMatrix> {
    let lb = ke - kb;
    let mut t_kk =
        DistMatrix::with_shape(t.grid().clone(), DistPair::REPLICATED, lb, lb)?;
    copy_into(&t.view(kb..ke, kb..ke), &mut t_kk.as_view_mut())?;
    if let Some(tol) = check {
        if t.grid().in_grid() {
            quasi_singularity(uplo, lb, t_kk.local().as_slice(), lb.max(1), tol).map_err(
                |err| Error::SingularBlock {
                    index: kb + err.index,
                    magnitude: err.magnitude,
                },
            )?;
        }
    }
    Ok(t_kk)
}

/// Bring `X(kb..ke, :)` into column-replicated form by the chosen route.
fn fetch_panel(
    strategy: PanelStrategy,
    x: &DistMatrix,
    kb: usize,
    ke: usize,
) -> Result<DistMatrix> {
    let grid = x.grid().clone();
    let (lb, n) = (ke - kb, x.width());
    let mut x_k = DistMatrix::new(grid.clone(), DistPair::new(Dist::Repl, Dist::MatCol))?;
    x_k.set_aligns(0, x.col_align())?;
    x_k.resize(lb, n)?;
    match strategy {
        PanelStrategy::Medium => {
            // Transpose-then-replicate: the panel crosses the grid twice
            // in transposed form instead of gathering along the columns.
            let mut w = DistMatrix::with_shape(
                grid,
                DistPair::new(Dist::MatRow, Dist::Repl),
                n,
                lb,
            )?;
            transpose_into(&x.view(kb..ke, 0..n), &mut w.as_view_mut())?;
            transpose_into(&w.as_view(), &mut x_k.as_view_mut())?;
        }
        _ => copy_into(&x.view(kb..ke, 0..n), &mut x_k.as_view_mut())?,
    }
    Ok(x_k)
}

/// The off-diagonal panel `op(T)(rows, kb..ke)` in row-replicated form
/// aligned with X's rows at `rows.start`.
fn fetch_t_panel(
    trans: Transpose,
    t: &DistMatrix,
    x_row_align: usize,
    rows: std::ops::Range<usize>,
    kb: usize,
    ke: usize,
) -> Result<DistMatrix> {
    let grid = t.grid().clone();
    let mut panel = DistMatrix::new(grid.clone(), DistPair::new(Dist::MatRow, Dist::Repl))?;
    panel.set_aligns((x_row_align + rows.start) % grid.height(), 0)?;
    panel.resize(rows.end - rows.start, ke - kb)?;
    match trans {
        Transpose::None => copy_into(&t.view(rows, kb..ke), &mut panel.as_view_mut())?,
        Transpose::Ordinary => transpose_into(&t.view(kb..ke, rows), &mut panel.as_view_mut())?,
    }
    Ok(panel)
}

fn solve_blocked(
    cfg: &TuningConfig,
    strategy: PanelStrategy,
    uplo: UpLo,
    trans: Transpose,
    t: &DistMatrix,
    x: &mut DistMatrix,
    opts: SolveOptions,
) -> Result<()> {
    let grid = t.grid().clone();
    let (m, n) = (t.height(), x.width());
    if m == 0 || n == 0 {
        return Ok(());
    }

    let couple = gather_couplings(uplo, t);
    let mut panels = diagonal_panels(m, cfg.block_size, &couple);
    // Forward substitution when op(T) is effectively lower, backward
    // otherwise.
    let effective_lower = (uplo == UpLo::Lower) == (trans == Transpose::None);
    if !effective_lower {
        panels.reverse();
    }

    for &(kb, ke) in &panels {
        let lb = ke - kb;
        let t_kk = replicated_diag_block(uplo, t, kb, ke, opts.check_singular)?;
        let mut x_k = fetch_panel(strategy, x, kb, ke)?;

        if grid.in_grid() && x_k.local_width() > 0 {
            // The singularity verdict was already delivered above; the
            // kernel itself runs unchecked so every process issues the
            // same communication schedule regardless of data.
            quasi_trsm(
                Side::Left,
                uplo,
                trans,
                lb,
                x_k.local_width(),
                t_kk.local().as_slice(),
                lb.max(1),
                x_k.local_mut().as_mut_slice(),
                lb.max(1),
                None,
            )
            .expect("unchecked solve cannot fail");
        }
        copy_into(&x_k.as_view(), &mut x.view_mut(kb..ke, 0..n))?;

        let rows = if effective_lower { ke..m } else { 0..kb };
        if rows.is_empty() {
            continue;
        }
        let t_panel = fetch_t_panel(trans, t, x.row_align(), rows.clone(), kb, ke)?;
        if grid.in_grid() {
            let mut x_rem = x.view_mut(rows, 0..n);
            let (rem_rows, rem_cols) = (x_rem.local().nrows(), x_rem.local().ncols());
            if rem_rows > 0 && rem_cols > 0 {
                let ldx = x_rem.local().ld();
                dgemm(
                    Transpose::None,
                    Transpose::None,
                    rem_rows,
                    rem_cols,
                    lb,
                    -1.0,
                    t_panel.local().as_slice(),
                    rem_rows.max(1),
                    x_k.local().as_slice(),
                    lb.max(1),
                    Some(1.0),
                    x_rem.local_mut().as_mut_slice(),
                    ldx,
                );
            }
        }
    }
    Ok(())
}

fn multiply_blocked(
    cfg: &TuningConfig,
    strategy: PanelStrategy,
    uplo: UpLo,
    trans: Transpose,
    t: &DistMatrix,
    x: &mut DistMatrix,
) -> Result<()> {
    let grid = t.grid().clone();
    let (m, n) = (t.height(), x.width());
    if m == 0 || n == 0 {
        return Ok(());
    }

    let couple = gather_couplings(uplo, t);
    let mut panels = diagonal_panels(m, cfg.block_size, &couple);
    // The multiply consumes the not-yet-overwritten part of X, so the
    // sweep runs opposite to the solve's direction.
    let effective_lower = (uplo == UpLo::Lower) == (trans == Transpose::None);
    if effective_lower {
        panels.reverse();
    }

    for &(kb, ke) in &panels {
        let lb = ke - kb;
        let t_kk = replicated_diag_block(uplo, t, kb, ke, None)?;
        let mut x_k = fetch_panel(strategy, x, kb, ke)?;

        if grid.in_grid() && x_k.local_width() > 0 {
            quasi_trmm(
                Side::Left,
                uplo,
                trans,
                lb,
                x_k.local_width(),
                t_kk.local().as_slice(),
                lb.max(1),
                x_k.local_mut().as_mut_slice(),
                lb.max(1),
            );
        }

        let rows = if effective_lower { 0..kb } else { ke..m };
        if rows.is_empty() {
            copy_into(&x_k.as_view(), &mut x.view_mut(kb..ke, 0..n))?;
            continue;
        }

        // op(T)(I_k, rows) in replicated rows, contraction axis over the
        // grid rows aligned with X.
        let mut t_panel =
            DistMatrix::new(grid.clone(), DistPair::new(Dist::Repl, Dist::MatRow))?;
        t_panel.set_aligns(0, (x.row_align() + rows.start) % grid.height())?;
        t_panel.resize(lb, rows.end - rows.start)?;
        match trans {
            Transpose::None => {
                copy_into(&t.view(kb..ke, rows.clone()), &mut t_panel.as_view_mut())?
            }
            Transpose::Ordinary => {
                transpose_into(&t.view(rows.clone(), kb..ke), &mut t_panel.as_view_mut())?
            }
        }

        if let Some(col_team) = grid.col_team() {
            let x_part = x.view(rows.clone(), 0..n);
            let (part_rows, nloc) = (x_part.local().nrows(), x_part.local().ncols());
            let mut partial = vec![0.0; lb * nloc];
            dgemm(
                Transpose::None,
                Transpose::None,
                lb,
                nloc,
                part_rows,
                1.0,
                t_panel.local().as_slice(),
                lb.max(1),
                x_part.local().as_slice(),
                x_part.local().ld().max(1),
                None,
                &mut partial,
                lb.max(1),
            );

            // Scatter-reduce the off-diagonal contribution to the owners
            // of the panel's rows, then add the replicated diagonal term.
            let height = grid.height();
            let mut parts: Vec<Vec<f64>> = vec![Vec::new(); col_team.size()];
            for ii in 0..lb {
                let owner = (x.row_align() + kb + ii) % height;
                for jj in 0..nloc {
                    parts[owner].push(partial[ii + jj * lb]);
                }
            }
            let summed = col_team.reduce_scatter(parts);

            let mine: Vec<(usize, usize)> = (0..lb)
                .filter_map(|ii| x.local_row(kb + ii).map(|li| (ii, li)))
                .collect();
            let x_k_local = x_k.local();
            let mut local = x.local_mut();
            let mut offset = 0;
            for (ii, li) in mine {
                for jj in 0..nloc {
                    local[(li, jj)] = x_k_local[(ii, jj)] + summed[offset];
                    offset += 1;
                }
            }
        }
    }
    Ok(())
}

/// Gather T and X whole and solve redundantly on every process.
fn solve_small(
    uplo: UpLo,
    trans: Transpose,
    t: &DistMatrix,
    x: &mut DistMatrix,
    opts: SolveOptions,
) -> Result<()> {
    let grid = t.grid().clone();
    let (m, n) = (t.height(), x.width());
    if m == 0 || n == 0 {
        return Ok(());
    }

    let t_full = replicated_diag_block(uplo, t, 0, m, opts.check_singular)?;
    let mut x_full = DistMatrix::with_shape(grid.clone(), DistPair::REPLICATED, m, n)?;
    copy_into(&x.as_view(), &mut x_full.as_view_mut())?;

    if grid.in_grid() {
        quasi_trsm(
            Side::Left,
            uplo,
            trans,
            m,
            n,
            t_full.local().as_slice(),
            m.max(1),
            x_full.local_mut().as_mut_slice(),
            m.max(1),
            None,
        )
        .expect("unchecked solve cannot fail");
    }
    copy_into(&x_full.as_view(), &mut x.as_view_mut())
}

/// Gather T and X whole and multiply redundantly on every process.
fn multiply_small(
    uplo: UpLo,
    trans: Transpose,
    t: &DistMatrix,
    x: &mut DistMatrix,
) -> Result<()> {
    let grid = t.grid().clone();
    let (m, n) = (t.height(), x.width());
    if m == 0 || n == 0 {
        return Ok(());
    }

    let t_full = replicated_diag_block(uplo, t, 0, m, None)?;
    let mut x_full = DistMatrix::with_shape(grid.clone(), DistPair::REPLICATED, m, n)?;
    copy_into(&x.as_view(), &mut x_full.as_view_mut())?;

    if grid.in_grid() {
        quasi_trmm(
            Side::Left,
            uplo,
            trans,
            m,
            n,
            t_full.local().as_slice(),
            m.max(1),
            x_full.local_mut().as_mut_slice(),
            m.max(1),
        );
    }
    copy_into(&x_full.as_view(), &mut x.as_view_mut())
}
