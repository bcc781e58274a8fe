//! Dense vector and matrix values.
//!
//! These are the *results* of evaluating expressions and layers. They are plain row-major
//! `f64` buffers. Arithmetic on them is the low-level hot path: shape misuse is a programmer
//! error and panics via `assert!`. Shape checking with `Result` happens one level up, when
//! expressions and layers are constructed.
//!
//! Matrix products go through a single GEMM wrapper:
//! - default: a simple, safe triple-loop implementation
//! - optional: a faster backend via the `matrixmultiply` feature

use std::ops::{Index, IndexMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vector(Vec<f64>);

impl Vector {
    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    pub fn filled(len: usize, value: f64) -> Self {
        Self(vec![value; len])
    }

    /// The standard basis vector `e_index` of length `len`.
    pub fn basis(len: usize, index: usize) -> Self {
        assert!(index < len, "basis index {index} out of range for len {len}");
        let mut v = Self::zeros(len);
        v.0[index] = 1.0;
        v
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.0
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.0.iter()
    }

    pub fn add(&self, other: &Vector) -> Vector {
        assert_eq!(
            self.len(),
            other.len(),
            "vector add: len {} does not match len {}",
            self.len(),
            other.len()
        );
        Vector(self.0.iter().zip(&other.0).map(|(a, b)| a + b).collect())
    }

    pub fn sub(&self, other: &Vector) -> Vector {
        assert_eq!(
            self.len(),
            other.len(),
            "vector sub: len {} does not match len {}",
            self.len(),
            other.len()
        );
        Vector(self.0.iter().zip(&other.0).map(|(a, b)| a - b).collect())
    }

    pub fn scale(&self, factor: f64) -> Vector {
        Vector(self.0.iter().map(|v| v * factor).collect())
    }

    pub fn dot(&self, other: &Vector) -> f64 {
        assert_eq!(
            self.len(),
            other.len(),
            "dot: len {} does not match len {}",
            self.len(),
            other.len()
        );
        self.0
            .iter()
            .zip(&other.0)
            .fold(0.0, |acc, (a, b)| a.mul_add(*b, acc))
    }

    /// Elementwise product, i.e. `D(self) · other`.
    pub fn hadamard(&self, other: &Vector) -> Vector {
        assert_eq!(
            self.len(),
            other.len(),
            "hadamard: len {} does not match len {}",
            self.len(),
            other.len()
        );
        Vector(self.0.iter().zip(&other.0).map(|(a, b)| a * b).collect())
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Vector {
        Vector(self.0.iter().map(|&v| f(v)).collect())
    }

    /// Diagonalize: `D(self)`.
    pub fn diagonal(&self) -> Matrix {
        let n = self.len();
        let mut m = Matrix::zeros(n, n);
        for (i, &v) in self.0.iter().enumerate() {
            m[(i, i)] = v;
        }
        m
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f64>> for Vector {
    fn from(value: Vec<f64>) -> Self {
        Self(value)
    }
}

impl From<&[f64]> for Vector {
    fn from(value: &[f64]) -> Self {
        Self(value.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for Vector {
    fn from(value: [f64; N]) -> Self {
        Self(value.to_vec())
    }
}

impl FromIterator<f64> for Vector {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Index<usize> for Vector {
    type Output = f64;

    #[inline]
    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl IndexMut<usize> for Vector {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.0[index]
    }
}

/// Row-major dense matrix.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    /// The matrix with a single `1.0` at `(row, col)`.
    pub fn basis(rows: usize, cols: usize, row: usize, col: usize) -> Self {
        let mut m = Self::zeros(rows, cols);
        m[(row, col)] = 1.0;
        m
    }

    /// Build from a flat row-major buffer.
    ///
    /// Panics if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "matrix data len {} does not match {rows} x {cols}",
            data.len()
        );
        Self { rows, cols, data }
    }

    /// Build from rows. Panics if rows are ragged.
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(
                row.len(),
                cols,
                "row {i} has len {} but row 0 has len {cols}",
                row.len()
            );
            data.extend_from_slice(row);
        }
        Self {
            rows: rows.len(),
            cols,
            data,
        }
    }

    /// Stack vectors as the columns of a `len x columns.len()` matrix.
    pub fn from_columns(len: usize, columns: &[Vector]) -> Self {
        let mut m = Self::zeros(len, columns.len());
        for (j, column) in columns.iter().enumerate() {
            m.set_column(j, column);
        }
        m
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn column(&self, col: usize) -> Vector {
        (0..self.rows).map(|i| self[(i, col)]).collect()
    }

    pub fn set_column(&mut self, col: usize, values: &Vector) {
        assert_eq!(
            values.len(),
            self.rows,
            "column len {} does not match matrix rows {}",
            values.len(),
            self.rows
        );
        for (i, &v) in values.iter().enumerate() {
            self[(i, col)] = v;
        }
    }

    /// Flatten row-major into a vector of length `rows * cols`.
    pub fn to_vector(&self) -> Vector {
        Vector::from(self.data.clone())
    }

    pub fn transpose(&self) -> Matrix {
        let mut t = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                t[(j, i)] = self[(i, j)];
            }
        }
        t
    }

    pub fn add(&self, other: &Matrix) -> Matrix {
        assert_eq!(
            self.shape(),
            other.shape(),
            "matrix add: shape {:?} does not match {:?}",
            self.shape(),
            other.shape()
        );
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&other.data).map(|(a, b)| a + b).collect(),
        }
    }

    pub fn scale(&self, factor: f64) -> Matrix {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|v| v * factor).collect(),
        }
    }

    /// Matrix product `self · other`.
    pub fn matmul(&self, other: &Matrix) -> Matrix {
        assert_eq!(
            self.cols, other.rows,
            "matmul: left cols {} do not match right rows {}",
            self.cols, other.rows
        );
        let mut out = Matrix::zeros(self.rows, other.cols);
        if self.rows == 0 || other.cols == 0 || self.cols == 0 {
            return out;
        }
        gemm_f64(
            self.rows,
            other.cols,
            self.cols,
            1.0,
            &self.data,
            self.cols,
            1,
            &other.data,
            other.cols,
            1,
            0.0,
            &mut out.data,
            other.cols,
            1,
        );
        out
    }

    /// Matrix-vector product `self · v`.
    pub fn mat_vec(&self, v: &Vector) -> Vector {
        assert_eq!(
            self.cols,
            v.len(),
            "mat_vec: matrix cols {} do not match vector len {}",
            self.cols,
            v.len()
        );
        let mut out = vec![0.0; self.rows];
        if self.rows == 0 || self.cols == 0 {
            return Vector::from(out);
        }
        gemm_f64(
            self.rows,
            1,
            self.cols,
            1.0,
            &self.data,
            self.cols,
            1,
            v.as_slice(),
            1,
            1,
            0.0,
            &mut out,
            1,
            1,
        );
        Vector::from(out)
    }

    /// `D(diag) · self`: scales row `i` by `diag[i]`.
    pub fn scale_rows(&self, diag: &Vector) -> Matrix {
        assert_eq!(
            diag.len(),
            self.rows,
            "scale_rows: diagonal len {} does not match rows {}",
            diag.len(),
            self.rows
        );
        let mut out = self.clone();
        for i in 0..self.rows {
            let s = diag[i];
            for v in &mut out.data[i * self.cols..(i + 1) * self.cols] {
                *v *= s;
            }
        }
        out
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    #[inline]
    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        debug_assert!(row < self.rows && col < self.cols);
        &self.data[row * self.cols + col]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    #[inline]
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        debug_assert!(row < self.rows && col < self.cols);
        &mut self.data[row * self.cols + col]
    }
}

#[allow(clippy::too_many_arguments)]
#[inline]
fn gemm_f64(
    m: usize,
    n: usize,
    k: usize,
    alpha: f64,
    a: &[f64],
    rsa: usize,
    csa: usize,
    b: &[f64],
    rsb: usize,
    csb: usize,
    beta: f64,
    c: &mut [f64],
    rsc: usize,
    csc: usize,
) {
    debug_assert!(m > 0 && n > 0 && k > 0);
    debug_assert!(a.len() >= (m - 1) * rsa + (k - 1) * csa + 1);
    debug_assert!(b.len() >= (k - 1) * rsb + (n - 1) * csb + 1);
    debug_assert!(c.len() >= (m - 1) * rsc + (n - 1) * csc + 1);

    #[cfg(feature = "matrixmultiply")]
    {
        // SAFETY: the debug assertions above describe the extents callers guarantee.
        unsafe {
            matrixmultiply::dgemm(
                m,
                k,
                n,
                alpha,
                a.as_ptr(),
                rsa as isize,
                csa as isize,
                b.as_ptr(),
                rsb as isize,
                csb as isize,
                beta,
                c.as_mut_ptr(),
                rsc as isize,
                csc as isize,
            );
        }
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0_f64;
            let a0 = i * rsa;
            let b0 = j * csb;

            for p in 0..k {
                let av = a[a0 + p * csa];
                let bv = b[p * rsb + b0];
                acc = av.mul_add(bv, acc);
            }

            let idx = i * rsc + j * csc;
            c[idx] = alpha * acc + beta * c[idx];
        }
    }
}
