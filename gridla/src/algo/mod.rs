/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! The blocked, communication-avoiding algorithms built on the
//! redistribution engine.

pub mod gemm;
pub mod qr;
pub mod triangular;

pub use gemm::{gemm, gemm_variant, select_variant, GemmVariant};
pub use qr::{pivoted_qr, PivotedQr};
pub use triangular::{
    triangular_multiply, triangular_multiply_with_strategy, triangular_solve,
    triangular_solve_with_strategy, PanelStrategy,
};
