/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::ops::{Index, IndexMut, Range};

use thiserror::Error;

/// Return the linear length of a slice underlying a column-major view with
/// the given parameters.
///
/// The last column only needs `nrows` entries, so a view over a larger
/// allocation can stop short of a full final stride.
pub fn linear_length(nrows: usize, ncols: usize, ld: usize) -> usize {
    (ncols.max(1) - 1) * ld + ncols.min(1) * nrows
}

#[derive(Debug, Error)]
#[error(
    "tried to view a {nrows}x{ncols} column-major matrix with leading \
     dimension {ld} over a slice of length {len} (need {})",
    linear_length(self.nrows, self.ncols, self.ld)
)]
pub struct ShapeError {
    len: usize,
    nrows: usize,
    ncols: usize,
    ld: usize,
}

/// An owned dense column-major matrix.
///
/// Storage is always packed: the leading dimension equals the row count.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    data: Vec<T>,
    nrows: usize,
    ncols: usize,
}

impl<T: Copy> Matrix<T> {
    /// Construct a matrix with every entry set to `fill`.
    pub fn new(fill: T, nrows: usize, ncols: usize) -> Self {
        Self {
            data: vec![fill; nrows * ncols],
            nrows,
            ncols,
        }
    }

    /// Construct a matrix whose entry `(i, j)` is `f(i, j)`.
    pub fn from_fn<F>(nrows: usize, ncols: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> T,
    {
        let mut data = Vec::with_capacity(nrows * ncols);
        for j in 0..ncols {
            for i in 0..nrows {
                data.push(f(i, j));
            }
        }
        Self { data, nrows, ncols }
    }

    /// Reallocate to `nrows x ncols`, filling every entry with `fill`.
    ///
    /// The previous contents are discarded.
    pub fn reshape(&mut self, fill: T, nrows: usize, ncols: usize) {
        self.data.clear();
        self.data.resize(nrows * ncols, fill);
        self.nrows = nrows;
        self.ncols = ncols;
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// The underlying storage in column-major order.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Column `j` as a contiguous slice.
    ///
    /// # Panics
    ///
    /// Panics if `j >= self.ncols()`.
    pub fn col(&self, j: usize) -> &[T] {
        assert!(
            j < self.ncols,
            "tried to access column {j} of a matrix with {} columns",
            self.ncols
        );
        &self.data[j * self.nrows..(j + 1) * self.nrows]
    }

    /// Column `j` as a contiguous mutable slice.
    ///
    /// # Panics
    ///
    /// Panics if `j >= self.ncols()`.
    pub fn col_mut(&mut self, j: usize) -> &mut [T] {
        assert!(
            j < self.ncols,
            "tried to access column {j} of a matrix with {} columns",
            self.ncols
        );
        &mut self.data[j * self.nrows..(j + 1) * self.nrows]
    }

    pub fn as_view(&self) -> MatView<'_, T> {
        MatView {
            data: &self.data,
            nrows: self.nrows,
            ncols: self.ncols,
            ld: self.nrows,
        }
    }

    pub fn as_view_mut(&mut self) -> MatViewMut<'_, T> {
        MatViewMut {
            data: &mut self.data,
            nrows: self.nrows,
            ncols: self.ncols,
            ld: self.nrows,
        }
    }
}

/// A read-only column-major view with an explicit leading dimension.
///
/// ```text
///          |<- nrows ->|
///          +-----------+        ^
/// col 0 -> | a0 a1 a2  | a3 a4  |
/// col 1 -> | b0 b1 b2  | b3 b4  ld separates column starts
/// col 2 -> | c0 c1 c2  |        v
///          +-----------+
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MatView<'a, T> {
    data: &'a [T],
    nrows: usize,
    ncols: usize,
    ld: usize,
}

/// A mutable column-major view with an explicit leading dimension.
#[derive(Debug)]
pub struct MatViewMut<'a, T> {
    data: &'a mut [T],
    nrows: usize,
    ncols: usize,
    ld: usize,
}

impl<'a, T: Copy> MatView<'a, T> {
    /// View `data` as `nrows x ncols` with leading dimension `ld`,
    /// shrinking the slice to the exact footprint.
    ///
    /// # Panics
    ///
    /// Panics if `ld < nrows`.
    pub fn try_from(
        data: &'a [T],
        nrows: usize,
        ncols: usize,
        ld: usize,
    ) -> Result<Self, ShapeError> {
        assert!(ld >= nrows, "leading dimension must cover the row count");
        let needed = linear_length(nrows, ncols, ld);
        match data.get(..needed) {
            Some(data) => Ok(Self {
                data,
                nrows,
                ncols,
                ld,
            }),
            None => Err(ShapeError {
                len: data.len(),
                nrows,
                ncols,
                ld,
            }),
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn ld(&self) -> usize {
        self.ld
    }

    pub fn as_slice(&self) -> &[T] {
        self.data
    }

    /// Column `j` as a contiguous slice of `nrows` entries.
    ///
    /// # Panics
    ///
    /// Panics if `j >= self.ncols()`.
    pub fn col(&self, j: usize) -> &[T] {
        assert!(
            j < self.ncols,
            "tried to access column {j} of a view with {} columns",
            self.ncols
        );
        &self.data[j * self.ld..j * self.ld + self.nrows]
    }

    /// A sub-view over `rows` x `cols` of this view, sharing storage.
    ///
    /// # Panics
    ///
    /// Panics if either range exceeds the view's shape.
    pub fn sub(&self, rows: Range<usize>, cols: Range<usize>) -> MatView<'a, T> {
        assert!(
            rows.end <= self.nrows && cols.end <= self.ncols,
            "sub-view {rows:?} x {cols:?} exceeds a {}x{} view",
            self.nrows,
            self.ncols
        );
        let nrows = rows.end - rows.start;
        let ncols = cols.end - cols.start;
        if nrows == 0 || ncols == 0 {
            return MatView {
                data: &[],
                nrows,
                ncols,
                ld: self.ld,
            };
        }
        let offset = rows.start + cols.start * self.ld;
        let end = offset + linear_length(nrows, ncols, self.ld);
        MatView {
            data: &self.data[offset..end],
            nrows,
            ncols,
            ld: self.ld,
        }
    }
}

impl<'a, T: Copy> MatViewMut<'a, T> {
    /// View `data` mutably as `nrows x ncols` with leading dimension `ld`,
    /// shrinking the slice to the exact footprint.
    ///
    /// # Panics
    ///
    /// Panics if `ld < nrows`.
    pub fn try_from(
        data: &'a mut [T],
        nrows: usize,
        ncols: usize,
        ld: usize,
    ) -> Result<Self, ShapeError> {
        assert!(ld >= nrows, "leading dimension must cover the row count");
        let needed = linear_length(nrows, ncols, ld);
        let len = data.len();
        if len >= needed {
            Ok(Self {
                data: &mut data[..needed],
                nrows,
                ncols,
                ld,
            })
        } else {
            Err(ShapeError {
                len,
                nrows,
                ncols,
                ld,
            })
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn ld(&self) -> usize {
        self.ld
    }

    pub fn as_slice(&self) -> &[T] {
        self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.data
    }

    /// Column `j` as a contiguous mutable slice of `nrows` entries.
    ///
    /// # Panics
    ///
    /// Panics if `j >= self.ncols()`.
    pub fn col_mut(&mut self, j: usize) -> &mut [T] {
        assert!(
            j < self.ncols,
            "tried to access column {j} of a view with {} columns",
            self.ncols
        );
        &mut self.data[j * self.ld..j * self.ld + self.nrows]
    }

    pub fn as_view(&self) -> MatView<'_, T> {
        MatView {
            data: self.data,
            nrows: self.nrows,
            ncols: self.ncols,
            ld: self.ld,
        }
    }

    /// Consume this view into a mutable sub-view over `rows` x `cols`,
    /// sharing storage.
    ///
    /// # Panics
    ///
    /// Panics if either range exceeds the view's shape.
    pub fn into_sub(self, rows: Range<usize>, cols: Range<usize>) -> MatViewMut<'a, T> {
        assert!(
            rows.end <= self.nrows && cols.end <= self.ncols,
            "sub-view {rows:?} x {cols:?} exceeds a {}x{} view",
            self.nrows,
            self.ncols
        );
        let nrows = rows.end - rows.start;
        let ncols = cols.end - cols.start;
        if nrows == 0 || ncols == 0 {
            return MatViewMut {
                data: &mut [],
                nrows,
                ncols,
                ld: self.ld,
            };
        }
        let offset = rows.start + cols.start * self.ld;
        let end = offset + linear_length(nrows, ncols, self.ld);
        MatViewMut {
            data: &mut self.data[offset..end],
            nrows,
            ncols,
            ld: self.ld,
        }
    }

    /// Copy the contents of `src` into this view column by column.
    ///
    /// # Panics
    ///
    /// Panics if the shapes differ.
    pub fn copy_from(&mut self, src: &MatView<'_, T>) {
        assert!(
            self.nrows == src.nrows() && self.ncols == src.ncols(),
            "cannot copy a {}x{} view into a {}x{} view",
            src.nrows(),
            src.ncols(),
            self.nrows,
            self.ncols
        );
        for j in 0..self.ncols {
            self.col_mut(j).copy_from_slice(src.col(j));
        }
    }
}

impl<T: Copy> Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    fn index(&self, (i, j): (usize, usize)) -> &T {
        assert!(i < self.nrows, "row {i} is out of bounds (max: {})", self.nrows);
        assert!(j < self.ncols, "col {j} is out of bounds (max: {})", self.ncols);
        &self.data[i + j * self.nrows]
    }
}

impl<T: Copy> IndexMut<(usize, usize)> for Matrix<T> {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut T {
        assert!(i < self.nrows, "row {i} is out of bounds (max: {})", self.nrows);
        assert!(j < self.ncols, "col {j} is out of bounds (max: {})", self.ncols);
        &mut self.data[i + j * self.nrows]
    }
}

impl<T: Copy> Index<(usize, usize)> for MatView<'_, T> {
    type Output = T;

    fn index(&self, (i, j): (usize, usize)) -> &T {
        assert!(i < self.nrows, "row {i} is out of bounds (max: {})", self.nrows);
        assert!(j < self.ncols, "col {j} is out of bounds (max: {})", self.ncols);
        &self.data[i + j * self.ld]
    }
}

impl<T: Copy> Index<(usize, usize)> for MatViewMut<'_, T> {
    type Output = T;

    fn index(&self, (i, j): (usize, usize)) -> &T {
        assert!(i < self.nrows, "row {i} is out of bounds (max: {})", self.nrows);
        assert!(j < self.ncols, "col {j} is out of bounds (max: {})", self.ncols);
        &self.data[i + j * self.ld]
    }
}

impl<T: Copy> IndexMut<(usize, usize)> for MatViewMut<'_, T> {
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut T {
        assert!(i < self.nrows, "row {i} is out of bounds (max: {})", self.nrows);
        assert!(j < self.ncols, "col {j} is out of bounds (max: {})", self.ncols);
        &mut self.data[i + j * self.ld]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_length() {
        assert_eq!(linear_length(0, 1, 1), 0);
        assert_eq!(linear_length(3, 0, 3), 0);

        // Packed storage.
        for rows in 1..8 {
            for cols in 1..8 {
                assert_eq!(linear_length(rows, cols, rows), rows * cols);
            }
        }

        // A single column ignores the leading dimension.
        assert_eq!(linear_length(5, 1, 10), 5);

        // The general case: full strides for all but the last column.
        assert_eq!(linear_length(3, 4, 7), 3 * 7 + 3);
    }

    fn counting(nrows: usize, ncols: usize) -> Matrix<usize> {
        let mut i = 0;
        Matrix::from_fn(nrows, ncols, |_, _| {
            let v = i;
            i += 1;
            v
        })
    }

    #[test]
    fn test_from_fn_is_column_major() {
        let m = counting(3, 2);
        assert_eq!(m.as_slice(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(m[(0, 0)], 0);
        assert_eq!(m[(2, 0)], 2);
        assert_eq!(m[(0, 1)], 3);
        assert_eq!(m.col(1), &[3, 4, 5]);
    }

    #[test]
    fn test_view_with_leading_dimension() {
        let m = counting(5, 3);
        let v = MatView::try_from(m.as_slice(), 3, 3, 5).unwrap();
        for j in 0..3 {
            for i in 0..3 {
                assert_eq!(v[(i, j)], m[(i, j)]);
            }
        }

        // Too short a slice is an error with a descriptive message.
        let err = MatView::try_from(&m.as_slice()[..7], 3, 3, 5).unwrap_err();
        assert!(err.to_string().contains("leading"));
    }

    #[test]
    fn test_sub_view() {
        let m = counting(5, 4);
        let v = m.as_view();
        let s = v.sub(1..4, 2..4);
        assert_eq!(s.nrows(), 3);
        assert_eq!(s.ncols(), 2);
        for j in 0..2 {
            for i in 0..3 {
                assert_eq!(s[(i, j)], m[(i + 1, j + 2)]);
            }
        }
    }

    #[test]
    fn test_copy_from() {
        let src = counting(4, 3);
        let mut dst = Matrix::new(0usize, 4, 3);
        dst.as_view_mut().copy_from(&src.as_view());
        assert_eq!(dst, src);
    }

    #[test]
    fn test_reshape_discards() {
        let mut m = counting(2, 2);
        m.reshape(9, 3, 1);
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 1);
        assert_eq!(m.as_slice(), &[9, 9, 9]);
    }

    #[test]
    fn test_zero_sized() {
        let m = Matrix::new(0.0f64, 0, 4);
        assert_eq!(m.as_slice().len(), 0);
        let v = MatView::try_from(m.as_slice(), 0, 4, 0).unwrap();
        assert_eq!(v.ncols(), 4);

        let m = Matrix::new(0.0f64, 4, 0);
        let v = m.as_view();
        assert_eq!(v.as_slice().len(), 0);
    }

    #[test]
    #[should_panic(expected = "row 3 is out of bounds (max: 3)")]
    fn test_index_panics_row() {
        let m = counting(3, 2);
        let _ = m[(3, 0)];
    }

    #[test]
    #[should_panic(expected = "col 2 is out of bounds (max: 2)")]
    fn test_index_panics_col() {
        let m = counting(3, 2);
        let _ = m[(0, 2)];
    }

    #[test]
    #[should_panic(expected = "tried to access column 4")]
    fn test_col_panics() {
        let m = counting(3, 4);
        let _ = m.col(4);
    }

    #[test]
    #[should_panic(expected = "leading dimension must cover the row count")]
    fn test_short_ld_panics() {
        let m = counting(4, 4);
        let _ = MatView::try_from(m.as_slice(), 4, 2, 3);
    }
}
