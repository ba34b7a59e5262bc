//! Element types stored in a vector index and their distance kernels.
//!
//! The metric is fixed by the element type, so an index can never pair int8
//! codes with cosine or binary codes with inner product by accident.

use crate::types::{Metric, Precision};
use std::fmt::Debug;

/// Scalar stored in a [`VectorIndex`](crate::index::VectorIndex).
pub trait Element: Copy + Debug + PartialEq + Send + Sync + 'static {
    /// Precision tag written to index files.
    const PRECISION: Precision;

    /// Bytes per element on disk.
    const SIZE: usize;

    /// Distance used for ranking search results.
    fn distance(a: &[Self], b: &[Self]) -> f32;

    /// Non-negative distance used while wiring the proximity graph.
    ///
    /// Defaults to [`Element::distance`]; metrics that can go negative override it.
    fn graph_distance(a: &[Self], b: &[Self]) -> f32 {
        Self::distance(a, b)
    }

    /// Append the little-endian encoding of `self`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode from exactly [`Element::SIZE`] bytes.
    fn read_le(bytes: &[u8]) -> Self;

    /// Metric implied by the precision.
    fn metric() -> Metric {
        Self::PRECISION.metric()
    }
}

impl Element for f32 {
    const PRECISION: Precision = Precision::Float32;
    const SIZE: usize = 4;

    fn distance(a: &[f32], b: &[f32]) -> f32 {
        cosine_distance(a, b)
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl Element for i8 {
    const PRECISION: Precision = Precision::Int8;
    const SIZE: usize = 1;

    fn distance(a: &[i8], b: &[i8]) -> f32 {
        -(inner_product_i8(a, b) as f32)
    }

    fn graph_distance(a: &[i8], b: &[i8]) -> f32 {
        let dot = inner_product_i8(a, b) as f64;
        let na = inner_product_i8(a, a) as f64;
        let nb = inner_product_i8(b, b) as f64;
        if na == 0.0 || nb == 0.0 {
            return 1.0;
        }
        (1.0 - dot / (na.sqrt() * nb.sqrt())).max(0.0) as f32
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] as i8
    }
}

impl Element for u8 {
    const PRECISION: Precision = Precision::Binary;
    const SIZE: usize = 1;

    fn distance(a: &[u8], b: &[u8]) -> f32 {
        hamming_distance(a, b) as f32
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

/// `1 - cos(a, b)`; 1.0 if either vector has zero norm.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (&x, &y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (na.sqrt() * nb.sqrt())).max(0.0)
}

/// Integer dot product of two int8 vectors.
pub fn inner_product_i8(a: &[i8], b: &[i8]) -> i64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(&x, &y)| x as i32 * y as i32)
        .sum::<i32>() as i64
}

/// Number of differing bits.
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| (x ^ y).count_ones()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_inner_product_orders_by_similarity() {
        let q = [100i8, -50, 20];
        let close = [90i8, -40, 25];
        let far = [-90i8, 40, -25];
        assert!(i8::distance(&q, &close) < i8::distance(&q, &far));
        assert_eq!(inner_product_i8(&[127, 127], &[127, 127]), 2 * 127 * 127);
        assert!(i8::graph_distance(&q, &far) >= 0.0);
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(&[0b1111_0000], &[0b0000_1111]), 8);
        assert_eq!(hamming_distance(&[0xAA, 0x01], &[0xAA, 0x00]), 1);
        assert_eq!(u8::distance(&[7, 7], &[7, 7]), 0.0);
    }

    #[test]
    fn test_le_roundtrip() {
        let mut buf = Vec::new();
        (-1.5f32).write_le(&mut buf);
        (-7i8).write_le(&mut buf);
        0xABu8.write_le(&mut buf);
        assert_eq!(f32::read_le(&buf[0..4]), -1.5);
        assert_eq!(i8::read_le(&buf[4..5]), -7);
        assert_eq!(u8::read_le(&buf[5..6]), 0xAB);
    }
}
