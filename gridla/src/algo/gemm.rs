/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Distributed matrix multiply, SUMMA style: panels stream through cheap
//! replicated forms while one operand stays put.

use gridla_linalg::{dgemm, Transpose};
use tracing::debug;

use crate::config::TuningConfig;
use crate::dist::{Dist, DistPair};
use crate::error::{Error, Result};
use crate::matrix::DistMatrix;
use crate::redist::{copy_into, transpose_into};

/// Which operand of `C := alpha * op(A) * op(B) + beta * C` stays in
/// place while the other two stream through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmVariant {
    /// A never moves; B column-panels stream; partial products
    /// scatter-reduce into C along the row teams. Cheapest when `n` is
    /// the smallest dimension.
    StationaryA,
    /// B never moves; A row-panels stream; partial products
    /// scatter-reduce into C along the column teams. Cheapest when `m`
    /// is the smallest dimension.
    StationaryB,
    /// C never moves; A and B panels are gathered to where C lives and
    /// accumulate locally with no reduction. Cheapest when the
    /// contraction dimension is the smallest.
    StationaryC,
}

/// Pick a variant from the output and contraction dimensions.
///
/// The contraction dimension is scaled by `cfg.gemm_dim_weight`; ties
/// break toward the C-stationary variant, which has the lowest fixed
/// overhead when there are few summation terms.
pub fn select_variant(cfg: &TuningConfig, m: usize, n: usize, k: usize) -> GemmVariant {
    let weighted_k = k as f64 * cfg.gemm_dim_weight;
    if weighted_k <= m.min(n) as f64 {
        GemmVariant::StationaryC
    } else if n <= m {
        GemmVariant::StationaryA
    } else {
        GemmVariant::StationaryB
    }
}

/// `C := alpha * op(A) * op(B) + beta * C`, variant chosen by
/// [`select_variant`].
///
/// All three matrices must live on the same grid in the standard
/// (row-over-grid-rows, column-over-grid-columns) distribution.
/// `alpha == 0` degenerates to a pure local scaling of C with no
/// communication; `beta == 0` overwrites C without reading it.
#[allow(clippy::too_many_arguments)]
pub fn gemm(
    cfg: &TuningConfig,
    transa: Transpose,
    transb: Transpose,
    alpha: f64,
    a: &DistMatrix,
    b: &DistMatrix,
    beta: f64,
    c: &mut DistMatrix,
) -> Result<()> {
    let (m, n) = (c.height(), c.width());
    let k = transa.forward(a.width(), a.height());
    let variant = select_variant(cfg, m, n, k);
    gemm_variant(cfg, variant, transa, transb, alpha, a, b, beta, c)
}

/// [`gemm`] with the variant forced; the numeric result is identical for
/// all three.
#[allow(clippy::too_many_arguments)]
pub fn gemm_variant(
    cfg: &TuningConfig,
    variant: GemmVariant,
    transa: Transpose,
    transb: Transpose,
    alpha: f64,
    a: &DistMatrix,
    b: &DistMatrix,
    beta: f64,
    c: &mut DistMatrix,
) -> Result<()> {
    for matrix in [&*c, a, b] {
        if matrix.pair() != DistPair::STANDARD {
            return Err(Error::Distribution {
                row: matrix.pair().row,
                col: matrix.pair().col,
            });
        }
        assert!(
            std::sync::Arc::ptr_eq(matrix.grid(), c.grid()),
            "gemm operands live on different grids"
        );
    }

    let (m, n) = (c.height(), c.width());
    let (opa_rows, opa_cols) = transa.forward((a.height(), a.width()), (a.width(), a.height()));
    let (opb_rows, opb_cols) = transb.forward((b.height(), b.width()), (b.width(), b.height()));
    if opa_rows != m || opb_cols != n || opa_cols != opb_rows {
        return Err(Error::DimensionMismatch {
            op: "gemm",
            left_rows: opa_rows,
            left_cols: opa_cols,
            right_rows: opb_rows,
            right_cols: opb_cols,
        });
    }
    let k = opa_cols;

    // beta first: a clean overwrite for zero, a pure local scale
    // otherwise. Both are communication-free.
    scale_local(c, beta);
    if alpha == 0.0 || m == 0 || n == 0 {
        return Ok(());
    }

    debug!(?variant, m, n, k, "distributed gemm");

    // Transposed operands are normalized once, before the panel loop, so
    // each variant runs a single straight loop.
    let a_owned;
    let a = if transa.is_transpose() {
        let mut at = DistMatrix::with_shape(c.grid().clone(), DistPair::STANDARD, m, k)?;
        transpose_into(&a.as_view(), &mut at.as_view_mut())?;
        a_owned = at;
        &a_owned
    } else {
        a
    };
    let b_owned;
    let b = if transb.is_transpose() {
        let mut bt = DistMatrix::with_shape(c.grid().clone(), DistPair::STANDARD, k, n)?;
        transpose_into(&b.as_view(), &mut bt.as_view_mut())?;
        b_owned = bt;
        &b_owned
    } else {
        b
    };

    match variant {
        GemmVariant::StationaryA => stationary_a(cfg, alpha, a, b, c),
        GemmVariant::StationaryB => stationary_b(cfg, alpha, a, b, c),
        GemmVariant::StationaryC => stationary_c(cfg, alpha, a, b, c),
    }
}

fn scale_local(c: &mut DistMatrix, beta: f64) {
    if beta == 0.0 {
        c.local_mut().as_mut_slice().fill(0.0);
    } else if beta != 1.0 {
        for value in c.local_mut().as_mut_slice() {
            *value *= beta;
        }
    }
}

/// Per k-panel: gather the A panel row-replicated and the B panel
/// column-replicated, both aligned to C, and accumulate locally.
fn stationary_c(
    cfg: &TuningConfig,
    alpha: f64,
    a: &DistMatrix,
    b: &DistMatrix,
    c: &mut DistMatrix,
) -> Result<()> {
    let grid = c.grid().clone();
    let nb = cfg.block_size.max(1);
    let (m, n, k) = (c.height(), c.width(), a.width());
    let (mloc, nloc) = (c.local_height(), c.local_width());

    let mut l = 0;
    while l < k {
        let lb = nb.min(k - l);

        let mut a_panel = DistMatrix::new(grid.clone(), DistPair::new(Dist::MatRow, Dist::Repl))?;
        a_panel.set_aligns(c.row_align(), 0)?;
        a_panel.resize(m, lb)?;
        copy_into(&a.view(0..m, l..l + lb), &mut a_panel.as_view_mut())?;

        let mut b_panel = DistMatrix::new(grid.clone(), DistPair::new(Dist::Repl, Dist::MatCol))?;
        b_panel.set_aligns(0, c.col_align())?;
        b_panel.resize(lb, n)?;
        copy_into(&b.view(l..l + lb, 0..n), &mut b_panel.as_view_mut())?;

        if grid.in_grid() && mloc > 0 && nloc > 0 {
            dgemm(
                Transpose::None,
                Transpose::None,
                mloc,
                nloc,
                lb,
                alpha,
                a_panel.local().as_slice(),
                mloc.max(1),
                b_panel.local().as_slice(),
                lb.max(1),
                Some(1.0),
                c.local_mut().as_mut_slice(),
                mloc.max(1),
            );
        }
        l += lb;
    }
    Ok(())
}

/// A stays put (realigned to C's rows at most once); B column-panels
/// stream through a grid-column distribution of the contraction axis and
/// partial products scatter-reduce into C along the row teams.
fn stationary_a(
    cfg: &TuningConfig,
    alpha: f64,
    a: &DistMatrix,
    b: &DistMatrix,
    c: &mut DistMatrix,
) -> Result<()> {
    let grid = c.grid().clone();
    let nb = cfg.block_size.max(1);
    let (n, k) = (c.width(), a.width());

    // "Redistributed once": only an alignment fix, and only if needed.
    let a_owned;
    let a = if a.row_align() == c.row_align() {
        a
    } else {
        let mut fixed = DistMatrix::new(grid.clone(), DistPair::STANDARD)?;
        fixed.set_aligns(c.row_align(), a.col_align())?;
        fixed.resize(a.height(), a.width())?;
        copy_into(&a.as_view(), &mut fixed.as_view_mut())?;
        a_owned = fixed;
        &a_owned
    };

    let mloc = c.local_height();
    let kloc = a.local_width();

    let mut j0 = 0;
    while j0 < n {
        let jb = nb.min(n - j0);

        let mut b_panel = DistMatrix::new(grid.clone(), DistPair::new(Dist::MatCol, Dist::Repl))?;
        b_panel.set_aligns(a.col_align(), 0)?;
        b_panel.resize(k, jb)?;
        copy_into(&b.view(0..k, j0..j0 + jb), &mut b_panel.as_view_mut())?;

        if let Some(row_team) = grid.row_team() {
            // Local partial product over this process's share of the
            // contraction axis.
            let mut partial = vec![0.0; mloc * jb];
            dgemm(
                Transpose::None,
                Transpose::None,
                mloc,
                jb,
                kloc,
                alpha,
                a.local().as_slice(),
                mloc.max(1),
                b_panel.local().as_slice(),
                kloc.max(1),
                None,
                &mut partial,
                mloc.max(1),
            );

            // Scatter-reduce: panel column j belongs to the row-team
            // member owning column j of C.
            let width = grid.width();
            let mut parts: Vec<Vec<f64>> = vec![Vec::new(); row_team.size()];
            for jj in 0..jb {
                let owner = (c.col_align() + j0 + jj) % width;
                parts[owner].extend_from_slice(&partial[jj * mloc..(jj + 1) * mloc]);
            }
            let summed = row_team.reduce_scatter(parts);

            let mine: Vec<usize> = (0..jb)
                .filter_map(|jj| c.local_col(j0 + jj))
                .collect();
            let mut local = c.local_mut();
            for (chunk, lj) in summed.chunks_exact(mloc.max(1)).zip(mine) {
                let col = local.col_mut(lj);
                for (dst, src) in col.iter_mut().zip(chunk) {
                    *dst += src;
                }
            }
        }
        j0 += jb;
    }
    Ok(())
}

/// The mirror of [`stationary_a`]: B stays put, A row-panels stream, and
/// partial products scatter-reduce into C along the column teams.
fn stationary_b(
    cfg: &TuningConfig,
    alpha: f64,
    a: &DistMatrix,
    b: &DistMatrix,
    c: &mut DistMatrix,
) -> Result<()> {
    let grid = c.grid().clone();
    let nb = cfg.block_size.max(1);
    let (m, k) = (c.height(), a.width());

    let b_owned;
    let b = if b.col_align() == c.col_align() {
        b
    } else {
        let mut fixed = DistMatrix::new(grid.clone(), DistPair::STANDARD)?;
        fixed.set_aligns(b.row_align(), c.col_align())?;
        fixed.resize(b.height(), b.width())?;
        copy_into(&b.as_view(), &mut fixed.as_view_mut())?;
        b_owned = fixed;
        &b_owned
    };

    let nloc = c.local_width();
    let kloc = b.local_height();

    let mut i0 = 0;
    while i0 < m {
        let ib = nb.min(m - i0);

        let mut a_panel = DistMatrix::new(grid.clone(), DistPair::new(Dist::Repl, Dist::MatRow))?;
        a_panel.set_aligns(0, b.row_align())?;
        a_panel.resize(ib, k)?;
        copy_into(&a.view(i0..i0 + ib, 0..k), &mut a_panel.as_view_mut())?;

        if let Some(col_team) = grid.col_team() {
            let mut partial = vec![0.0; ib * nloc];
            dgemm(
                Transpose::None,
                Transpose::None,
                ib,
                nloc,
                kloc,
                alpha,
                a_panel.local().as_slice(),
                ib.max(1),
                b.local().as_slice(),
                kloc.max(1),
                None,
                &mut partial,
                ib.max(1),
            );

            // Scatter-reduce: panel row i belongs to the column-team
            // member owning row i of C.
            let height = grid.height();
            let mut parts: Vec<Vec<f64>> = vec![Vec::new(); col_team.size()];
            for ii in 0..ib {
                let owner = (c.row_align() + i0 + ii) % height;
                for jj in 0..nloc {
                    parts[owner].push(partial[ii + jj * ib]);
                }
            }
            let summed = col_team.reduce_scatter(parts);

            let mine: Vec<usize> = (0..ib)
                .filter_map(|ii| c.local_row(i0 + ii))
                .collect();
            let mut local = c.local_mut();
            let mut offset = 0;
            for li in mine {
                for jj in 0..nloc {
                    local[(li, jj)] += summed[offset];
                    offset += 1;
                }
            }
        }
        i0 += ib;
    }
    Ok(())
}
