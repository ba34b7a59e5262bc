//! Range-calibrated int8 quantization.
//!
//! Each dimension's `[min, max]` is split into 255 equal steps and mapped onto
//! `[-128, 127]`:
//!
//! ```text
//! steps = (max - min) / 255
//! code  = clamp(round((x - min) / steps) - 128, -128, 127)
//! ```
//!
//! Values outside the calibration range saturate. Zero-width dimensions carry
//! no information and map to `0`, which leaves inner products unaffected.

use crate::quantize::calibration::CalibrationRange;
use crate::types::error::{NewsIndexError, Result};
use crate::types::{EmbeddingMatrix, Int8Matrix, Matrix};
use rayon::prelude::*;

/// Quantize every row of `embeddings` with `ranges`.
///
/// # Errors
///
/// Returns `NewsIndexError::Quantization` if the column count differs from
/// the calibration dimensionality
pub fn quantize_int8(embeddings: &EmbeddingMatrix, ranges: &CalibrationRange) -> Result<Int8Matrix> {
    if embeddings.cols() != ranges.dim() {
        return Err(NewsIndexError::Quantization(format!(
            "embeddings have {} dimensions, calibration covers {}",
            embeddings.cols(),
            ranges.dim()
        )));
    }

    let steps: Vec<f32> = ranges
        .min()
        .iter()
        .zip(ranges.max())
        .map(|(lo, hi)| (hi - lo) / 255.0)
        .collect();

    let mut codes = vec![0i8; embeddings.as_slice().len()];
    codes
        .par_chunks_exact_mut(embeddings.cols())
        .zip(embeddings.as_slice().par_chunks_exact(embeddings.cols()))
        .for_each(|(out, row)| quantize_row(row, ranges.min(), &steps, out));

    Matrix::new(embeddings.cols(), codes)
}

/// Quantize a single vector (query path).
pub fn quantize_int8_vector(vector: &[f32], ranges: &CalibrationRange) -> Result<Vec<i8>> {
    let matrix = Matrix::new(vector.len().max(1), vector.to_vec())?;
    Ok(quantize_int8(&matrix, ranges)?.into_vec())
}

fn quantize_row(row: &[f32], min: &[f32], steps: &[f32], out: &mut [i8]) {
    for (((code, &x), &lo), &step) in out.iter_mut().zip(row).zip(min).zip(steps) {
        *code = if step > 0.0 {
            let scaled = ((x - lo) / step).round() - 128.0;
            // NaN inputs fall through clamp unchanged; `as` maps NaN to 0
            scaled.clamp(i8::MIN as f32, i8::MAX as f32) as i8
        } else {
            0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ranges(min: Vec<f32>, max: Vec<f32>) -> CalibrationRange {
        CalibrationRange::new(min, max).unwrap()
    }

    #[test]
    fn test_endpoints_map_to_extreme_codes() {
        let r = ranges(vec![-0.3, 0.0, -1.0], vec![0.7, 0.05, 1.0]);
        let lo = Matrix::from_rows(vec![r.min().to_vec()]).unwrap();
        let hi = Matrix::from_rows(vec![r.max().to_vec()]).unwrap();

        assert_eq!(quantize_int8(&lo, &r).unwrap().row(0), &[-128, -128, -128]);
        assert_eq!(quantize_int8(&hi, &r).unwrap().row(0), &[127, 127, 127]);
    }

    #[test]
    fn test_out_of_range_saturates() {
        let r = ranges(vec![-1.0], vec![1.0]);
        let m = Matrix::from_rows(vec![vec![-5.0], vec![5.0], vec![0.0]]).unwrap();
        let q = quantize_int8(&m, &r).unwrap();
        assert_eq!(q.as_slice(), &[-128, 127, 0]);
    }

    #[test]
    fn test_zero_width_dimension_is_constant() {
        let r = ranges(vec![0.5, -1.0], vec![0.5, 1.0]);
        let m = Matrix::from_rows(vec![vec![0.5, 1.0], vec![-3.0, -1.0]]).unwrap();
        let q = quantize_int8(&m, &r).unwrap();
        assert_eq!(q.row(0)[0], 0);
        assert_eq!(q.row(1)[0], 0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let r = ranges(vec![0.0; 3], vec![1.0; 3]);
        let m = Matrix::from_rows(vec![vec![0.5, 0.5]]).unwrap();
        assert!(matches!(
            quantize_int8(&m, &r),
            Err(NewsIndexError::Quantization(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_self_calibrated_codes_hit_both_ends(
            rows in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), 2..16)
        ) {
            let m = Matrix::from_rows(rows).unwrap();
            let r = CalibrationRange::fit(&m).unwrap();
            let q = quantize_int8(&m, &r).unwrap();

            for dim in 0..m.cols() {
                let column: Vec<i8> = q.iter_rows().map(|row| row[dim]).collect();
                if r.max()[dim] > r.min()[dim] {
                    prop_assert_eq!(*column.iter().min().unwrap(), -128);
                    prop_assert_eq!(*column.iter().max().unwrap(), 127);
                }
            }
        }
    }
}
