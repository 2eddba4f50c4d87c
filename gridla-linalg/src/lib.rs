/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The local kernel layer: single-process dense and (quasi-)triangular
//! routines over column-major f64 buffers with explicit leading
//! dimensions.
//!
//! Nothing in this crate knows about process grids or distributions; the
//! distributed layer hands it locally owned buffers and leading
//! dimensions and nothing more.

pub mod common;
pub use common::{Side, Transpose, UpLo};

mod faer;
use faer::dgemm_impl;

mod triangular;
pub use triangular::SingularBlockError;
use triangular::{quasi_singularity_impl, quasi_trmm_impl, quasi_trsm_impl};

pub mod householder;
pub use householder::{ger, reflector, reflector_from_norm};

// Make the reference implementation available for internal testing.
#[cfg(test)]
pub mod reference;

/// Return the linear footprint of an `nrows x ncols` column-major matrix
/// with leading dimension `ld`.
pub(crate) fn footprint(nrows: usize, ncols: usize, ld: usize) -> usize {
    (ncols.max(1) - 1) * ld + ncols.min(1) * nrows
}

/// Matrix-matrix multiplication over column-major buffers:
///
/// ```ignore
/// c = [beta * c] + alpha * op(a) * op(b)
/// ```
///
/// where `op(x)` is `x` or its transpose per the corresponding flag.
///
/// If `beta` is `None`, the destination `c` is completely over-written,
/// never read — callers need not pre-zero output storage.
///
/// * `m`: rows of `c` (and of `op(a)`).
/// * `n`: columns of `c` (and of `op(b)`).
/// * `k`: the contraction dimension.
/// * `lda`, `ldb`, `ldc`: leading dimensions of the respective buffers,
///   covering the *stored* (un-transposed) row counts.
///
/// # Panics
///
/// Panics if a buffer is too short for its stated shape and leading
/// dimension, or if a leading dimension is smaller than its stored row
/// count.
#[allow(clippy::too_many_arguments)]
pub fn dgemm(
    atranspose: Transpose,
    btranspose: Transpose,
    m: usize,
    n: usize,
    k: usize,
    alpha: f64,
    a: &[f64],
    lda: usize,
    b: &[f64],
    ldb: usize,
    beta: Option<f64>,
    c: &mut [f64],
    ldc: usize,
) {
    let (arows, acols) = atranspose.forward((m, k), (k, m));
    let (brows, bcols) = btranspose.forward((k, n), (n, k));

    if m != 0 && n != 0 {
        assert!(
            ldc >= m && c.len() >= footprint(m, n, ldc),
            "matrix `c` ({m}x{n}, ld {ldc}) does not fit a buffer of length {}",
            c.len()
        );
    }
    if k != 0 && m != 0 && n != 0 {
        assert!(
            lda >= arows && a.len() >= footprint(arows, acols, lda),
            "matrix `a` ({arows}x{acols}, ld {lda}) does not fit a buffer of length {}",
            a.len()
        );
        assert!(
            ldb >= brows && b.len() >= footprint(brows, bcols, ldb),
            "matrix `b` ({brows}x{bcols}, ld {ldb}) does not fit a buffer of length {}",
            b.len()
        );
    }

    dgemm_impl(
        atranspose, btranspose, m, n, k, alpha, a, lda, b, ldb, beta, c, ldc,
    )
}

/// Solve a (quasi-)triangular system in place:
///
/// ```ignore
/// op(t) * x = x    (side = Left,  x is n x nrhs)
/// x * op(t) = x    (side = Right, x is nrhs x n)
/// ```
///
/// `t` is `n x n` with its data in the `uplo` triangle. A non-zero entry
/// immediately across the diagonal (the subdiagonal for `Upper`, the
/// superdiagonal for `Lower`) marks a fused 2x2 diagonal block — the real
/// representation of a complex-conjugate eigenvalue pair — and the pair is
/// solved as one system through a Givens rotation, never as two sequential
/// 1x1 divisions.
///
/// `check` is the singularity tolerance: `Some(tol)` fails with
/// [`SingularBlockError`] when a pivot magnitude falls to `tol` or below;
/// `None` skips the test entirely.
///
/// # Panics
///
/// Panics if the buffers are too short for their stated shapes.
#[allow(clippy::too_many_arguments)]
pub fn quasi_trsm(
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
    check_triangular_args(side, n, nrhs, t, ldt, x, ldx);
    quasi_trsm_impl(side, uplo, trans, n, nrhs, t, ldt, x, ldx, check)
}

/// Multiply by a (quasi-)triangular matrix in place:
///
/// ```ignore
/// x = op(t) * x    (side = Left,  x is n x nrhs)
/// x = x * op(t)    (side = Right, x is nrhs x n)
/// ```
///
/// The fused 2x2 coupling entries participate in the product exactly as
/// they do in the solve, so `quasi_trsm` of a `quasi_trmm` is the
/// identity (up to rounding).
///
/// # Panics
///
/// Panics if the buffers are too short for their stated shapes.
#[allow(clippy::too_many_arguments)]
pub fn quasi_trmm(
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
    check_triangular_args(side, n, nrhs, t, ldt, x, ldx);
    quasi_trmm_impl(side, uplo, trans, n, nrhs, t, ldt, x, ldx)
}

/// Run the solver's singularity test over every diagonal block of `t`
/// without solving anything: a 1x1 pivot of magnitude at most `tol`, or a
/// fused 2x2 block whose Givens-reduced diagonal falls to `tol`, fails
/// with [`SingularBlockError`].
///
/// # Panics
///
/// Panics if the buffer is too short for the stated shape.
pub fn quasi_singularity(
    uplo: UpLo,
    n: usize,
    t: &[f64],
    ldt: usize,
    tol: f64,
) -> Result<(), SingularBlockError> {
    if n == 0 {
        return Ok(());
    }
    assert!(
        ldt >= n && t.len() >= footprint(n, n, ldt),
        "matrix `t` ({n}x{n}, ld {ldt}) does not fit a buffer of length {}",
        t.len()
    );
    quasi_singularity_impl(uplo, n, t, ldt, tol)
}

fn check_triangular_args(
    side: Side,
    n: usize,
    nrhs: usize,
    t: &[f64],
    ldt: usize,
    x: &[f64],
    ldx: usize,
) {
    if n == 0 || nrhs == 0 {
        return;
    }
    assert!(
        ldt >= n && t.len() >= footprint(n, n, ldt),
        "matrix `t` ({n}x{n}, ld {ldt}) does not fit a buffer of length {}",
        t.len()
    );
    let (xrows, xcols) = match side {
        Side::Left => (n, nrhs),
        Side::Right => (nrhs, n),
    };
    assert!(
        ldx >= xrows && x.len() >= footprint(xrows, xcols, ldx),
        "matrix `x` ({xrows}x{xcols}, ld {ldx}) does not fit a buffer of length {}",
        x.len()
    );
}
