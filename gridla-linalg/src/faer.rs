/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use faer::{self, Par};

use super::common::Transpose;
use super::footprint;

/// See the documentation for `dgemm`.
///
/// The implementation may assume that the specified invariants hold for the
/// sizes of the buffers.
#[allow(clippy::too_many_arguments)]
pub(super) fn dgemm_impl(
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
    if m == 0 || n == 0 {
        return;
    }

    let c_len = footprint(m, n, ldc);
    let mut c = faer::mat::MatMut::from_column_major_slice_with_stride_mut(
        &mut c[..c_len],
        m,
        n,
        ldc.max(1),
    );

    // Faer 0.22+ removed the option to scale by an arbitrary `beta`.
    // Instead, we need to manage it ourselves.
    let beta = match beta {
        Some(scale) => {
            if scale != 1.0 {
                c *= faer::Scale(scale);
            }
            faer::Accum::Add
        }
        None => {
            if k == 0 {
                c.fill(0.0);
            }
            faer::Accum::Replace
        }
    };

    // A degenerate contraction contributes nothing; the beta handling above
    // already produced the final C.
    if k == 0 {
        return;
    }

    let a = atranspose.call(
        || {
            faer::mat::MatRef::from_column_major_slice_with_stride(
                &a[..footprint(m, k, lda)],
                m,
                k,
                lda.max(1),
            )
        },
        || {
            faer::mat::MatRef::from_column_major_slice_with_stride(
                &a[..footprint(k, m, lda)],
                k,
                m,
                lda.max(1),
            )
            .transpose()
        },
    );

    let b = btranspose.call(
        || {
            faer::mat::MatRef::from_column_major_slice_with_stride(
                &b[..footprint(k, n, ldb)],
                k,
                n,
                ldb.max(1),
            )
        },
        || {
            faer::mat::MatRef::from_column_major_slice_with_stride(
                &b[..footprint(n, k, ldb)],
                n,
                k,
                ldb.max(1),
            )
            .transpose()
        },
    );

    faer::linalg::matmul::matmul(c, beta, a, b, alpha, Par::Seq)
}
