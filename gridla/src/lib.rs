/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Dense linear algebra on matrices partitioned across a 2-D process
//! grid.
//!
//! A [`DistMatrix`] stores, on each process, exactly the entries its grid
//! coordinate owns under a pair of per-axis distribution schemes. All
//! arithmetic is local kernel calls plus explicit, value-preserving
//! [`redist`] steps; the blocked algorithms in [`algo`] (SUMMA multiply,
//! quasi-triangular solve/multiply, column-pivoted QR) are sequences of
//! exactly those two ingredients.
//!
//! Every operation that communicates is a synchronization point: all
//! processes of the relevant team must reach the matching call in the
//! same order, which the library guarantees by deciding every schedule
//! from metadata or replicated values, never from process-local data.

pub mod algo;
pub mod config;
pub mod dist;
pub mod error;
pub mod grid;
pub mod matrix;
pub mod redist;
pub mod view;

pub use algo::{
    gemm, gemm_variant, pivoted_qr, select_variant, triangular_multiply,
    triangular_multiply_with_strategy, triangular_solve, triangular_solve_with_strategy,
    GemmVariant, PanelStrategy, PivotedQr,
};
pub use config::{SolveOptions, TuningConfig};
pub use dist::{Dist, DistPair};
pub use error::{Error, Result};
pub use grid::{GridOrder, ProcessGrid};
pub use matrix::DistMatrix;
pub use redist::{copy_into, transpose_into};
pub use view::{DistView, DistViewMut};
