/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

/// Tuning knobs for the blocked algorithms, threaded explicitly through
/// every call.
///
/// There is deliberately no process-wide default in scope: two concurrent
/// calls with different configurations cannot interfere, and tests vary
/// the parameters per call.
#[derive(Debug, Clone, Copy)]
pub struct TuningConfig {
    /// Panel width for every blocked algorithm.
    pub block_size: usize,

    /// Weight applied to the contraction dimension when choosing a
    /// multiply variant: the C-stationary variant wins when
    /// `k * gemm_dim_weight` does not exceed both output dimensions. A
    /// tuned default, not a proven threshold.
    pub gemm_dim_weight: f64,

    /// Right-hand-side columns per in-grid process at or below which the
    /// triangular solver gathers everything and solves redundantly.
    pub solve_small_width: usize,

    /// Right-hand-side columns per in-grid process at or below which the
    /// triangular solver moves panels in transposed form.
    pub solve_medium_width: usize,

    /// Relative tolerance of the ratio-of-norms test deciding when a
    /// maintained column norm has drifted and must be recomputed.
    pub qr_drift_tol: f64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            block_size: 32,
            gemm_dim_weight: 1.0,
            solve_small_width: 4,
            solve_medium_width: 16,
            qr_drift_tol: f64::EPSILON.sqrt(),
        }
    }
}

impl TuningConfig {
    /// A copy with a different panel width.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }
}

/// Per-call options for the triangular solver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolveOptions {
    /// `Some(tol)` fails the solve when a diagonal pivot magnitude falls
    /// to `tol` or below; `None` skips the check entirely, trading safety
    /// for speed.
    pub check_singular: Option<f64>,
}
