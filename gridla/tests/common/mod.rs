/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Shared helpers for the multi-rank integration suites: a thread-per-rank
//! grid harness and deterministic fill patterns every rank can evaluate
//! locally without coordination.

// Each integration binary compiles its own copy and uses its own subset.
#![allow(dead_code)]

use std::sync::Arc;

use gridla::{DistMatrix, DistPair, GridOrder, ProcessGrid};
use gridla_comm::run_on_ranks;
use gridla_utils::Matrix;

/// Run `f` on every rank of a `height x width` grid and collect the
/// results in rank order.
pub fn on_grid<T, F>(height: usize, width: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(Arc<ProcessGrid>) -> T + Sync,
{
    run_on_ranks(height * width, |transport| {
        let grid = ProcessGrid::with_shape(transport, height, width, GridOrder::ColumnMajor)
            .expect("test grid shape is always valid");
        f(grid)
    })
}

/// The grid shapes the properties are swept over: degenerate rows,
/// degenerate columns, and a proper rectangle.
pub const GRID_SHAPES: [(usize, usize); 4] = [(1, 1), (1, 4), (4, 1), (2, 3)];

/// A deterministic pseudo-random value keyed by seed and position, so
/// every rank fills its owned entries without communicating.
pub fn pseudo(seed: u64, i: usize, j: usize) -> f64 {
    let mut x = seed
        ^ (i as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ (j as u64 + 1).wrapping_mul(0xc2b2_ae3d_27d4_eb4f);
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    (x as f64 / u64::MAX as f64) * 2.0 - 1.0
}

/// A standard-distribution matrix filled from `pseudo(seed, ..)`.
pub fn seeded(grid: &Arc<ProcessGrid>, seed: u64, m: usize, n: usize) -> DistMatrix {
    let mut a = DistMatrix::with_shape(grid.clone(), DistPair::STANDARD, m, n)
        .expect("standard pair is legal");
    a.fill_with(|i, j| pseudo(seed, i, j));
    a
}

/// Naive dense reference multiply on gathered copies:
/// `c = alpha * a * b + beta * c`.
pub fn reference_gemm(alpha: f64, a: &Matrix<f64>, b: &Matrix<f64>, beta: f64, c: &mut Matrix<f64>) {
    let (m, n, k) = (c.nrows(), c.ncols(), a.ncols());
    assert_eq!(a.nrows(), m);
    assert_eq!(b.nrows(), k);
    assert_eq!(b.ncols(), n);
    for j in 0..n {
        for i in 0..m {
            let mut acc = 0.0;
            for l in 0..k {
                acc += a[(i, l)] * b[(l, j)];
            }
            c[(i, j)] = beta * c[(i, j)] + alpha * acc;
        }
    }
}

/// Largest absolute entry difference between two gathered copies.
pub fn max_abs_diff(a: &Matrix<f64>, b: &Matrix<f64>) -> f64 {
    assert_eq!(a.nrows(), b.nrows());
    assert_eq!(a.ncols(), b.ncols());
    a.as_slice()
        .iter()
        .zip(b.as_slice())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Largest absolute entry of a gathered copy.
pub fn max_abs(a: &Matrix<f64>) -> f64 {
    a.as_slice().iter().map(|v| v.abs()).fold(0.0, f64::max)
}
