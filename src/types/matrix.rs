//! Row-major dense matrices for embeddings and their quantized forms.

use crate::types::error::{NewsIndexError, Result};

/// Row-major matrix with a fixed column count.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    cols: usize,
    data: Vec<T>,
}

/// float32 embeddings, one row per article.
pub type EmbeddingMatrix = Matrix<f32>;

/// int8 codes produced by range calibration.
pub type Int8Matrix = Matrix<i8>;

/// Sign bits packed MSB-first, `ceil(dim / 8)` bytes per row.
pub type BinaryMatrix = Matrix<u8>;

impl<T: Copy> Matrix<T> {
    /// Wrap a flat buffer.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::InvalidInput` if `cols` is zero or the buffer
    /// length is not a multiple of `cols`
    pub fn new(cols: usize, data: Vec<T>) -> Result<Self> {
        if cols == 0 {
            return Err(NewsIndexError::invalid("matrix must have at least one column"));
        }
        if data.len() % cols != 0 {
            return Err(NewsIndexError::invalid(format!(
                "buffer of {} values is not a multiple of {} columns",
                data.len(),
                cols
            )));
        }
        Ok(Self { cols, data })
    }

    /// Empty matrix with `cols` columns.
    pub fn with_cols(cols: usize) -> Self {
        Self {
            cols,
            data: Vec::new(),
        }
    }

    /// Build from row vectors, which must all have the same length.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self> {
        let cols = rows
            .first()
            .map(|row| row.len())
            .ok_or_else(|| NewsIndexError::invalid("cannot build a matrix from zero rows"))?;
        let mut matrix = Self::new(cols, Vec::with_capacity(cols * rows.len()))?;
        for row in rows {
            matrix.push_row(&row)?;
        }
        Ok(matrix)
    }

    /// Append one row.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::InvalidInput` on a length mismatch
    pub fn push_row(&mut self, row: &[T]) -> Result<()> {
        if row.len() != self.cols {
            return Err(NewsIndexError::invalid(format!(
                "row has {} values, matrix has {} columns",
                row.len(),
                self.cols
            )));
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    /// Append every row of `other`.
    pub fn extend(&mut self, other: &Matrix<T>) -> Result<()> {
        if other.cols != self.cols {
            return Err(NewsIndexError::invalid(format!(
                "cannot append {}-column rows to a {}-column matrix",
                other.cols, self.cols
            )));
        }
        self.data.extend_from_slice(&other.data);
        Ok(())
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.data.len() / self.cols
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// True if the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row `i` as a slice.
    ///
    /// # Panics
    ///
    /// Panics if `i >= rows()`
    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Iterate over rows.
    pub fn iter_rows(&self) -> std::slice::ChunksExact<'_, T> {
        self.data.chunks_exact(self.cols)
    }

    /// Flat row-major buffer.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Consume into the flat buffer.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl Matrix<f32> {
    /// Scale every row to unit L2 norm. All-zero rows are left unchanged.
    pub fn normalize_rows(&mut self) {
        for row in self.data.chunks_exact_mut(self.cols) {
            let norm = row.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                row.iter_mut().for_each(|x| *x /= norm);
            }
        }
    }
}
