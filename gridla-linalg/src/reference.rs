/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! A straightforward reference multiply used to validate the production
//! implementation in tests.

use super::common::Transpose;

/// Naive `c = [beta * c] + alpha * op(a) * op(b)` over column-major
/// buffers, accumulating in the textbook triple-loop order.
#[allow(clippy::too_many_arguments)]
pub fn gemm(
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
    let a_at = |i: usize, l: usize| -> f64 {
        match atranspose {
            Transpose::None => a[i + l * lda],
            Transpose::Ordinary => a[l + i * lda],
        }
    };
    let b_at = |l: usize, j: usize| -> f64 {
        match btranspose {
            Transpose::None => b[l + j * ldb],
            Transpose::Ordinary => b[j + l * ldb],
        }
    };

    for j in 0..n {
        for i in 0..m {
            let mut acc = 0.0;
            for l in 0..k {
                acc += a_at(i, l) * b_at(l, j);
            }
            let dst = &mut c[i + j * ldc];
            *dst = match beta {
                Some(scale) => scale * *dst + alpha * acc,
                None => alpha * acc,
            };
        }
    }
}
