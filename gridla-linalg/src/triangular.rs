/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use thiserror::Error;

use super::common::{Side, Transpose, UpLo};

/// A (quasi-)triangular solve hit a diagonal block it judged singular.
///
/// Raised only when the caller opted into the check; with the check
/// disabled the solve runs straight through and produces infinities or
/// NaNs instead, trading safety for speed.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
#[error("triangular block is numerically singular at diagonal {index} (|pivot| = {magnitude:.3e})")]
pub struct SingularBlockError {
    pub index: usize,
    pub magnitude: f64,
}

/// Entry `(r, c)` of `op(T)` in a column-major buffer.
#[inline]
fn at(t: &[f64], ldt: usize, trans: Transpose, r: usize, c: usize) -> f64 {
    match trans {
        Transpose::None => t[r + c * ldt],
        Transpose::Ordinary => t[c + r * ldt],
    }
}

/// The coupling entry tying diagonal indices `i` and `i + 1` into a fused
/// 2x2 block: the subdiagonal for an upper quasi-triangular matrix, the
/// superdiagonal for a lower one. Zero means the indices are independent.
#[inline]
fn coupling(t: &[f64], ldt: usize, uplo: UpLo, i: usize) -> f64 {
    match uplo {
        UpLo::Upper => t[(i + 1) + i * ldt],
        UpLo::Lower => t[i + (i + 1) * ldt],
    }
}

/// Partition `0..n` into 1x1 and fused 2x2 diagonal blocks.
///
/// Coupled pairs are a structural property of `T` itself; transposition
/// moves the coupling entry across the diagonal but ties the same pair.
pub(super) fn diagonal_blocks(t: &[f64], ldt: usize, n: usize, uplo: UpLo) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < n {
        if i + 1 < n && coupling(t, ldt, uplo, i) != 0.0 {
            blocks.push((i, 2));
            i += 2;
        } else {
            blocks.push((i, 1));
            i += 1;
        }
    }
    blocks
}

/// Solve the fused 2x2 system `[[m11, m12], [m21, m22]] z = r` by a Givens
/// rotation zeroing the `(2, 1)` entry followed by back-substitution.
///
/// This is the required path for complex-conjugate pairs in real
/// arithmetic: two sequential 1x1 solves would divide by the (possibly
/// tiny or zero) diagonal entries instead of the block's actual spectrum.
#[allow(clippy::too_many_arguments)]
fn solve2(
    m11: f64,
    m12: f64,
    m21: f64,
    m22: f64,
    r1: f64,
    r2: f64,
    check: Option<f64>,
    index: usize,
) -> Result<(f64, f64), SingularBlockError> {
    let rr = f64::hypot(m11, m21);
    let (cs, sn) = if rr == 0.0 { (1.0, 0.0) } else { (m11 / rr, m21 / rr) };

    let u11 = rr;
    let u12 = cs * m12 + sn * m22;
    let u22 = -sn * m12 + cs * m22;
    let b1 = cs * r1 + sn * r2;
    let b2 = -sn * r1 + cs * r2;

    if let Some(tol) = check {
        let magnitude = u11.abs().min(u22.abs());
        if magnitude <= tol {
            return Err(SingularBlockError { index, magnitude });
        }
    }

    let z2 = b2 / u22;
    let z1 = (b1 - u12 * z2) / u11;
    Ok((z1, z2))
}

/// Apply the solver's pivot test to every diagonal block of `t` without
/// touching a right-hand side.
///
/// The distributed solver runs this on the replicated diagonal block
/// before any panel communication, so every process reaches the same
/// verdict from the same data and no collective is left half-entered.
/// The test inspects the untransposed block; transposition permutes the
/// Givens factors but not the block's singularity.
pub(super) fn quasi_singularity_impl(
    uplo: UpLo,
    n: usize,
    t: &[f64],
    ldt: usize,
    tol: f64,
) -> Result<(), SingularBlockError> {
    for (bs, bl) in diagonal_blocks(t, ldt, n, uplo) {
        if bl == 2 {
            let trans = Transpose::None;
            let m11 = at(t, ldt, trans, bs, bs);
            let m12 = at(t, ldt, trans, bs, bs + 1);
            let m21 = at(t, ldt, trans, bs + 1, bs);
            let m22 = at(t, ldt, trans, bs + 1, bs + 1);
            let rr = f64::hypot(m11, m21);
            let (cs, sn) = if rr == 0.0 { (1.0, 0.0) } else { (m11 / rr, m21 / rr) };
            let u22 = -sn * m12 + cs * m22;
            let magnitude = rr.abs().min(u22.abs());
            if magnitude <= tol {
                return Err(SingularBlockError {
                    index: bs,
                    magnitude,
                });
            }
        } else {
            check_pivot(at(t, ldt, Transpose::None, bs, bs), Some(tol), bs)?;
        }
    }
    Ok(())
}

fn check_pivot(
    pivot: f64,
    check: Option<f64>,
    index: usize,
) -> Result<(), SingularBlockError> {
    if let Some(tol) = check {
        if pivot.abs() <= tol {
            return Err(SingularBlockError {
                index,
                magnitude: pivot.abs(),
            });
        }
    }
    Ok(())
}

/// See the documentation for `quasi_trsm`.
#[allow(clippy::too_many_arguments)]
pub(super) fn quasi_trsm_impl(
    side: Side,
    uplo: UpLo,
    trans: Transpose,
    n: usize,
    nrhs: usize,
    t: &[f64],
    ldt: usize,
    x: &mut [f64],
    ldx: usize,
    check: Option<f64>,
) -> Result<(), SingularBlockError> {
    if n == 0 || nrhs == 0 {
        return Ok(());
    }

    let blocks = diagonal_blocks(t, ldt, n, uplo);
    let effective = trans.forward(uplo, uplo.flip());

    match side {
        Side::Left => solve_left(effective, trans, &blocks, nrhs, t, ldt, x, ldx, check),
        Side::Right => solve_right(effective, trans, &blocks, nrhs, t, ldt, x, ldx, check),
    }
}

/// Left solve `op(T) Z = X` in place, right-looking over diagonal blocks.
#[allow(clippy::too_many_arguments)]
fn solve_left(
    effective: UpLo,
    trans: Transpose,
    blocks: &[(usize, usize)],
    nrhs: usize,
    t: &[f64],
    ldt: usize,
    x: &mut [f64],
    ldx: usize,
    check: Option<f64>,
) -> Result<(), SingularBlockError> {
    let forward = effective == UpLo::Lower;
    let order: Vec<usize> = if forward {
        (0..blocks.len()).collect()
    } else {
        (0..blocks.len()).rev().collect()
    };

    for &bi in &order {
        let (bs, bl) = blocks[bi];

        // Solve the diagonal block for every right-hand side.
        for j in 0..nrhs {
            if bl == 2 {
                let (z1, z2) = solve2(
                    at(t, ldt, trans, bs, bs),
                    at(t, ldt, trans, bs, bs + 1),
                    at(t, ldt, trans, bs + 1, bs),
                    at(t, ldt, trans, bs + 1, bs + 1),
                    x[bs + j * ldx],
                    x[bs + 1 + j * ldx],
                    check,
                    bs,
                )?;
                x[bs + j * ldx] = z1;
                x[bs + 1 + j * ldx] = z2;
            } else {
                let pivot = at(t, ldt, trans, bs, bs);
                check_pivot(pivot, check, bs)?;
                x[bs + j * ldx] /= pivot;
            }
        }

        // Push the solved rows into the not-yet-solved ones.
        let remaining = if forward { &blocks[bi + 1..] } else { &blocks[..bi] };
        for &(rs, rl) in remaining {
            for r in rs..rs + rl {
                for c in bs..bs + bl {
                    let coef = at(t, ldt, trans, r, c);
                    if coef != 0.0 {
                        for j in 0..nrhs {
                            x[r + j * ldx] -= coef * x[c + j * ldx];
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Right solve `Z op(T) = X` in place, right-looking over diagonal blocks.
#[allow(clippy::too_many_arguments)]
fn solve_right(
    effective: UpLo,
    trans: Transpose,
    blocks: &[(usize, usize)],
    nrhs: usize,
    t: &[f64],
    ldt: usize,
    x: &mut [f64],
    ldx: usize,
    check: Option<f64>,
) -> Result<(), SingularBlockError> {
    // Column c of the product depends on earlier columns when op(T) is
    // upper, so the sweep direction flips relative to the left solve.
    let forward = effective == UpLo::Upper;
    let order: Vec<usize> = if forward {
        (0..blocks.len()).collect()
    } else {
        (0..blocks.len()).rev().collect()
    };

    for &bi in &order {
        let (bs, bl) = blocks[bi];

        for row in 0..nrhs {
            if bl == 2 {
                // z M = r is M^t z^t = r^t for the 2x2 block.
                let (z1, z2) = solve2(
                    at(t, ldt, trans, bs, bs),
                    at(t, ldt, trans, bs + 1, bs),
                    at(t, ldt, trans, bs, bs + 1),
                    at(t, ldt, trans, bs + 1, bs + 1),
                    x[row + bs * ldx],
                    x[row + (bs + 1) * ldx],
                    check,
                    bs,
                )?;
                x[row + bs * ldx] = z1;
                x[row + (bs + 1) * ldx] = z2;
            } else {
                let pivot = at(t, ldt, trans, bs, bs);
                check_pivot(pivot, check, bs)?;
                x[row + bs * ldx] /= pivot;
            }
        }

        let remaining = if forward { &blocks[bi + 1..] } else { &blocks[..bi] };
        for &(rs, rl) in remaining {
            for c in rs..rs + rl {
                for p in bs..bs + bl {
                    let coef = at(t, ldt, trans, p, c);
                    if coef != 0.0 {
                        for row in 0..nrhs {
                            x[row + c * ldx] -= x[row + p * ldx] * coef;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// See the documentation for `quasi_trmm`.
#[allow(clippy::too_many_arguments)]
pub(super) fn quasi_trmm_impl(
    side: Side,
    uplo: UpLo,
    trans: Transpose,
    n: usize,
    nrhs: usize,
    t: &[f64],
    ldt: usize,
    x: &mut [f64],
    ldx: usize,
) {
    if n == 0 || nrhs == 0 {
        return;
    }

    let effective = trans.forward(uplo, uplo.flip());
    let coupled = |i: usize| -> bool { i + 1 < n && coupling(t, ldt, uplo, i) != 0.0 };

    // The readable entries of op(T) in row i are the triangle plus the
    // coupling entry reaching one index across the diagonal.
    let row_span = |i: usize| -> (usize, usize) {
        match effective {
            UpLo::Lower => (0, if coupled(i) { i + 2 } else { i + 1 }),
            UpLo::Upper => (if i > 0 && coupled(i - 1) { i - 1 } else { i }, n),
        }
    };
    let readable = |r: usize, c: usize| -> bool {
        let in_triangle = match effective {
            UpLo::Lower => c <= r,
            UpLo::Upper => c >= r,
        };
        in_triangle || (c == r + 1 && coupled(r)) || (r > 0 && c == r - 1 && coupled(r - 1))
    };

    match side {
        Side::Left => {
            // X := op(T) X, one right-hand-side column at a time.
            let mut tmp = vec![0.0; n];
            for j in 0..nrhs {
                for (i, dst) in tmp.iter_mut().enumerate() {
                    *dst = x[i + j * ldx];
                }
                for i in 0..n {
                    let (lo, hi) = row_span(i);
                    let mut acc = 0.0;
                    for c in lo..hi {
                        if readable(i, c) {
                            acc += at(t, ldt, trans, i, c) * tmp[c];
                        }
                    }
                    x[i + j * ldx] = acc;
                }
            }
        }
        Side::Right => {
            // X := X op(T); every output column reads all input columns,
            // so snapshot the whole panel first.
            let mut tmp = vec![0.0; nrhs * n];
            for c in 0..n {
                for row in 0..nrhs {
                    tmp[row + c * nrhs] = x[row + c * ldx];
                }
            }
            for c in 0..n {
                for row in 0..nrhs {
                    let mut acc = 0.0;
                    for p in 0..n {
                        if readable(p, c) {
                            acc += tmp[row + p * nrhs] * at(t, ldt, trans, p, c);
                        }
                    }
                    x[row + c * ldx] = acc;
                }
            }
        }
    }
}
