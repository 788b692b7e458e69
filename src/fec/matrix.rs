// Dense matrices over GF(2^8)

use super::galois;
use crate::common::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<u8>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0; rows * cols],
        }
    }

    pub fn identity(size: usize) -> Self {
        let mut m = Self::zeros(size, size);
        for i in 0..size {
            m.set(i, i, 1);
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, r: usize, c: usize) -> u8 {
        self.data[r * self.cols + c]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, value: u8) {
        self.data[r * self.cols + c] = value;
    }

    pub fn row(&self, r: usize) -> &[u8] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// New matrix made of the given rows, in order
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let mut out = Self::zeros(rows.len(), self.cols);
        for (i, &r) in rows.iter().enumerate() {
            out.data[i * self.cols..(i + 1) * self.cols].copy_from_slice(self.row(r));
        }
        out
    }

    pub fn multiply(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.cols != rhs.rows {
            return Err(Error::Fec(format!(
                "cannot multiply {}x{} by {}x{}",
                self.rows, self.cols, rhs.rows, rhs.cols
            )));
        }
        let mut out = Matrix::zeros(self.rows, rhs.cols);
        for r in 0..self.rows {
            for k in 0..self.cols {
                let coeff = self.get(r, k);
                let start = r * rhs.cols;
                galois::mul_add_slice(coeff, rhs.row(k), &mut out.data[start..start + rhs.cols]);
            }
        }
        Ok(out)
    }

    fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        for c in 0..self.cols {
            self.data.swap(a * self.cols + c, b * self.cols + c);
        }
    }

    /// Gauss-Jordan inversion. A singular matrix means the shard layout is
    /// inconsistent and is reported as an error.
    pub fn invert(&self) -> Result<Matrix> {
        if self.rows != self.cols {
            return Err(Error::Fec(format!(
                "cannot invert non-square {}x{} matrix",
                self.rows, self.cols
            )));
        }
        let n = self.rows;
        let mut work = self.clone();
        let mut inverse = Matrix::identity(n);

        for col in 0..n {
            let pivot = (col..n)
                .find(|&r| work.get(r, col) != 0)
                .ok_or_else(|| Error::Fec(format!("singular matrix at column {}", col)))?;
            work.swap_rows(col, pivot);
            inverse.swap_rows(col, pivot);

            let scale = galois::inv(work.get(col, col))?;
            for c in 0..n {
                work.set(col, c, galois::mul(work.get(col, c), scale));
                inverse.set(col, c, galois::mul(inverse.get(col, c), scale));
            }

            for r in 0..n {
                if r == col {
                    continue;
                }
                let factor = work.get(r, col);
                if factor == 0 {
                    continue;
                }
                for c in 0..n {
                    let w = galois::mul(factor, work.get(col, c));
                    work.set(r, c, galois::sub(work.get(r, c), w));
                    let i = galois::mul(factor, inverse.get(col, c));
                    inverse.set(r, c, galois::sub(inverse.get(r, c), i));
                }
            }
        }
        Ok(inverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Matrix {
        let mut m = Matrix::zeros(3, 3);
        let values = [[1, 2, 3], [4, 5, 6], [7, 8, 10]];
        for (r, row) in values.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                m.set(r, c, v);
            }
        }
        m
    }

    #[test]
    fn test_inverse_times_matrix_is_identity() {
        let m = sample();
        let inv = m.invert().unwrap();
        assert_eq!(m.multiply(&inv).unwrap(), Matrix::identity(3));
        assert_eq!(inv.multiply(&m).unwrap(), Matrix::identity(3));
    }

    #[test]
    fn test_singular_matrix_is_an_error() {
        let mut m = Matrix::zeros(2, 2);
        m.set(0, 0, 3);
        m.set(0, 1, 5);
        m.set(1, 0, 3);
        m.set(1, 1, 5);
        assert!(matches!(m.invert(), Err(Error::Fec(_))));
    }

    #[test]
    fn test_select_rows() {
        let m = sample();
        let picked = m.select_rows(&[2, 0]);
        assert_eq!(picked.rows(), 2);
        assert_eq!(picked.row(0), &[7, 8, 10]);
        assert_eq!(picked.row(1), &[1, 2, 3]);
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(Matrix::zeros(2, 3).multiply(&Matrix::zeros(2, 3)).is_err());
        assert!(Matrix::zeros(2, 3).invert().is_err());
    }
}
