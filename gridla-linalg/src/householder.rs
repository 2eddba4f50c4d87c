/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

/// Build the Householder reflector annihilating a column whose head is
/// `alpha` and whose tail has 2-norm `tail_norm`.
///
/// Returns `(tau, beta, scale)` such that `H = I - tau v v^t` with
/// `v = [1; scale * x]` maps `[alpha; x]` to `[beta; 0]`. `beta` takes the
/// sign opposite `alpha`, which keeps the subtraction `alpha - beta` free
/// of cancellation.
///
/// The tail norm is an input rather than computed here because the tail of
/// a distributed column is spread across a process team; the caller
/// reduces the norm first and every holder then rescales its own segment
/// by `scale`.
pub fn reflector_from_norm(alpha: f64, tail_norm: f64) -> (f64, f64, f64) {
    if tail_norm == 0.0 {
        // Nothing to annihilate; the identity reflector leaves alpha as is.
        return (0.0, alpha, 0.0);
    }
    let beta = -alpha.signum() * f64::hypot(alpha, tail_norm);
    let tau = (beta - alpha) / beta;
    let scale = 1.0 / (alpha - beta);
    (tau, beta, scale)
}

/// In-place reflector generation over a local column (LAPACK `dlarfg`
/// semantics): `x` is replaced by the reflector tail and `(tau, beta)` is
/// returned.
pub fn reflector(alpha: f64, x: &mut [f64]) -> (f64, f64) {
    let tail_norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
    let (tau, beta, scale) = reflector_from_norm(alpha, tail_norm);
    for v in x.iter_mut() {
        *v *= scale;
    }
    (tau, beta)
}

/// Rank-1 update `A := A + alpha * x * y^t` on a column-major buffer.
///
/// # Panics
///
/// Panics in debug builds if the buffer cannot hold `m x n` entries at
/// leading dimension `lda`.
pub fn ger(m: usize, n: usize, alpha: f64, x: &[f64], y: &[f64], a: &mut [f64], lda: usize) {
    debug_assert!(x.len() >= m && y.len() >= n);
    debug_assert!(n == 0 || a.len() >= (n - 1) * lda + m);
    for (j, &yj) in y.iter().enumerate().take(n) {
        let coef = alpha * yj;
        if coef != 0.0 {
            let col = &mut a[j * lda..j * lda + m];
            for (aij, &xi) in col.iter_mut().zip(x) {
                *aij += coef * xi;
            }
        }
    }
}
