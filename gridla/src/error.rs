/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use thiserror::Error;

use crate::dist::Dist;

/// Convenience alias for a `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by grid construction, matrix construction, and the
/// distributed algorithms.
///
/// Every variant is decided from metadata or from values replicated on
/// every participating process, so for a given input each process either
/// raises the same error before communicating or none does — an error can
/// never leave a collective half-entered.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// The process group cannot be arranged into the requested grid rows.
    #[error("cannot split a group of {group_size} processes into rows of {height}")]
    GridShape { group_size: usize, height: usize },

    /// An explicit grid shape needs more processes than the group has.
    #[error(
        "a {height}x{width} grid needs {} processes but the group has {group_size}",
        height * width
    )]
    GridTooLarge {
        height: usize,
        width: usize,
        group_size: usize,
    },

    /// The per-axis schemes do not form a legal distribution pair.
    #[error("({row:?}, {col:?}) is not a legal distribution pair")]
    Distribution { row: Dist, col: Dist },

    /// An axis alignment does not name a coordinate of its team.
    #[error("alignment {align} is out of range for a distribution stride of {stride}")]
    Alignment { align: usize, stride: usize },

    /// Incompatible global shapes, checked before any communication.
    #[error(
        "{op}: global dimensions do not match ({left_rows}x{left_cols} vs {right_rows}x{right_cols})"
    )]
    DimensionMismatch {
        op: &'static str,
        left_rows: usize,
        left_cols: usize,
        right_rows: usize,
        right_cols: usize,
    },

    /// A triangular solve hit a diagonal block it judged singular.
    #[error("triangular block is numerically singular at diagonal {index} (|pivot| = {magnitude:.3e})")]
    SingularBlock { index: usize, magnitude: f64 },

    /// Alignment is metadata and may only change before a matrix holds data.
    #[error("alignment can only change while a matrix is 0x0")]
    AlignAfterAllocation,
}

impl From<gridla_linalg::SingularBlockError> for Error {
    fn from(err: gridla_linalg::SingularBlockError) -> Self {
        Error::SingularBlock {
            index: err.index,
            magnitude: err.magnitude,
        }
    }
}
