/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! Column-major dense matrix storage and leading-dimension aware views.
//!
//! Every local buffer in the distributed matrix stack is a column-major
//! rectangle whose columns may be separated by a leading dimension larger
//! than the row count. These types are the only way the rest of the
//! workspace touches raw storage.

pub mod colmajor;
pub use colmajor::{linear_length, MatView, MatViewMut, Matrix, ShapeError};
