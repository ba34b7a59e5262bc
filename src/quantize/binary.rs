//! Sign-bit binary quantization.
//!
//! Every dimension becomes one bit (`x >= 0` → 1) and bits are packed
//! MSB-first, eight per byte, matching `numpy.packbits`. A 1024-dim embedding
//! becomes 128 bytes. Trailing pad bits are zero.

use crate::types::{BinaryMatrix, EmbeddingMatrix, Matrix};
use rayon::prelude::*;

/// Packed width in bytes for `dim` input dimensions.
pub fn packed_len(dim: usize) -> usize {
    dim.div_ceil(8)
}

/// Quantize every row of `embeddings` to packed sign bits.
pub fn quantize_binary(embeddings: &EmbeddingMatrix) -> BinaryMatrix {
    let width = packed_len(embeddings.cols());
    let mut packed = vec![0u8; embeddings.rows() * width];
    packed
        .par_chunks_exact_mut(width)
        .zip(embeddings.as_slice().par_chunks_exact(embeddings.cols()))
        .for_each(|(out, row)| pack_row(row, out));

    // width >= 1 because embeddings.cols() >= 1
    Matrix::new(width, packed).unwrap_or_else(|_| Matrix::with_cols(width))
}

/// Quantize a single vector (query path).
pub fn quantize_binary_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; packed_len(vector.len())];
    pack_row(vector, &mut out);
    out
}

fn pack_row(row: &[f32], out: &mut [u8]) {
    for (i, &x) in row.iter().enumerate() {
        if x >= 0.0 {
            out[i / 8] |= 0x80 >> (i % 8);
        }
    }
}
