//! Per-dimension calibration ranges for int8 quantization.
//!
//! Ranges are fitted once over a representative embedding sample and then
//! frozen: every int8 vector in an index and every int8 query must be
//! quantized with byte-identical ranges or their inner products are
//! meaningless. The vectors themselves cannot reveal a mismatch, so the
//! build manifest records the BLAKE3 of the file the int8 index was built
//! with and [`CalibrationRange::load_checked`] refuses any other file.
//!
//! # File Format
//!
//! NumPy `.npy` v1.0 holding a little-endian float32 array of shape
//! `(2, dim)`: row 0 is the per-dimension minimum, row 1 the maximum.
//!
//! ```text
//! \x93NUMPY  0x01 0x00  u16 header_len  "{'descr': '<f4', ...}\n"  [f32; 2 * dim]
//! ```

use crate::index::format::tmp_sibling;
use crate::types::error::{NewsIndexError, Result};
use crate::types::EmbeddingMatrix;
use rayon::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Preamble length: magic + version + header length field.
const NPY_PREAMBLE: usize = 10;

/// Per-dimension `[min, max]` bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRange {
    min: Vec<f32>,
    max: Vec<f32>,
}

impl CalibrationRange {
    /// Create ranges from explicit bounds.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::Quantization` if the bounds differ in length,
    /// are empty, contain NaN or infinity, or have `min > max` in any dimension
    pub fn new(min: Vec<f32>, max: Vec<f32>) -> Result<Self> {
        if min.len() != max.len() {
            return Err(NewsIndexError::Quantization(format!(
                "calibration bounds differ in length: {} mins, {} maxes",
                min.len(),
                max.len()
            )));
        }
        if min.is_empty() {
            return Err(NewsIndexError::Quantization(
                "calibration range has zero dimensions".to_string(),
            ));
        }
        for (dim, (&lo, &hi)) in min.iter().zip(max.iter()).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(NewsIndexError::Quantization(format!(
                    "non-finite calibration bound in dimension {}: [{}, {}]",
                    dim, lo, hi
                )));
            }
            if lo > hi {
                return Err(NewsIndexError::Quantization(format!(
                    "inverted calibration bound in dimension {}: [{}, {}]",
                    dim, lo, hi
                )));
            }
        }
        Ok(Self { min, max })
    }

    /// Fit ranges as the per-dimension min and max of `sample`.
    ///
    /// Columns are scanned in parallel.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::Quantization` if the sample is empty or holds
    /// non-finite values
    pub fn fit(sample: &EmbeddingMatrix) -> Result<Self> {
        if sample.is_empty() {
            return Err(NewsIndexError::Quantization(
                "cannot calibrate on an empty embedding sample".to_string(),
            ));
        }

        let bounds = (0..sample.cols())
            .into_par_iter()
            .map(|dim| {
                let mut lo = f32::INFINITY;
                let mut hi = f32::NEG_INFINITY;
                for (row, values) in sample.iter_rows().enumerate() {
                    let x = values[dim];
                    if !x.is_finite() {
                        return Err(NewsIndexError::Quantization(format!(
                            "non-finite value {} at row {}, dimension {}",
                            x, row, dim
                        )));
                    }
                    lo = lo.min(x);
                    hi = hi.max(x);
                }
                Ok((lo, hi))
            })
            .collect::<Result<Vec<(f32, f32)>>>()?;

        let (min, max): (Vec<f32>, Vec<f32>) = bounds.into_iter().unzip();
        Self::new(min, max)
    }

    /// Dimensionality covered by these ranges.
    pub fn dim(&self) -> usize {
        self.min.len()
    }

    /// Per-dimension minimum.
    pub fn min(&self) -> &[f32] {
        &self.min
    }

    /// Per-dimension maximum.
    pub fn max(&self) -> &[f32] {
        &self.max
    }

    /// The `(2, dim)` float32 `.npy` encoding written by [`CalibrationRange::save`].
    pub fn to_npy_bytes(&self) -> Vec<u8> {
        let mut header = format!(
            "{{'descr': '<f4', 'fortran_order': False, 'shape': (2, {}), }}",
            self.dim()
        );
        // Pad so the data section starts on a 64-byte boundary
        let unpadded = NPY_PREAMBLE + header.len() + 1;
        header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
        header.push('\n');

        let mut bytes = Vec::with_capacity(NPY_PREAMBLE + header.len() + 8 * self.dim());
        bytes.extend_from_slice(NPY_MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        for &value in self.min.iter().chain(self.max.iter()) {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    /// BLAKE3 (hex) of the encoding [`CalibrationRange::save`] writes.
    pub fn digest(&self) -> String {
        blake3::hash(&self.to_npy_bytes()).to_hex().to_string()
    }

    /// Write ranges as a `(2, dim)` float32 `.npy` file.
    ///
    /// The file is written to a `.tmp` sibling and renamed into place.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = tmp_sibling(path);
        let mut file = File::create(&tmp_path)?;
        file.write_all(&self.to_npy_bytes())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Read ranges written by [`CalibrationRange::save`] or by `numpy.save`.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::DataCorruption` if the file is not a `(2, dim)`
    /// little-endian float32 array, and `NewsIndexError::Io` if it cannot be read
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::parse(path, &std::fs::read(path)?)
    }

    /// Load ranges together with the BLAKE3 (hex) of the file bytes.
    pub fn load_with_digest(path: impl AsRef<Path>) -> Result<(Self, String)> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let digest = blake3::hash(&bytes).to_hex().to_string();
        Ok((Self::parse(path, &bytes)?, digest))
    }

    /// Load ranges only if the file hashes to `expected_blake3`.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::DataCorruption` if the digest differs, which
    /// means the file is not the one the int8 index was built with
    pub fn load_checked(path: impl AsRef<Path>, expected_blake3: &str) -> Result<Self> {
        let path = path.as_ref();
        let (ranges, digest) = Self::load_with_digest(path)?;
        if digest != expected_blake3 {
            return Err(NewsIndexError::corruption(
                path,
                format!(
                    "calibration digest {} does not match the build manifest ({})",
                    &digest[..16],
                    expected_blake3.get(..16).unwrap_or(expected_blake3)
                ),
            ));
        }
        Ok(ranges)
    }

    fn parse(path: &Path, bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| NewsIndexError::corruption(path, reason);

        if bytes.len() < NPY_PREAMBLE || &bytes[0..6] != NPY_MAGIC {
            return Err(corrupt("not a .npy file".to_string()));
        }
        let (header_len, header_start) = match bytes[6] {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, NPY_PREAMBLE),
            2 | 3 if bytes.len() >= 12 => (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12,
            ),
            v => return Err(corrupt(format!("unsupported .npy version {}", v))),
        };
        let data_start = header_start + header_len;
        if bytes.len() < data_start {
            return Err(corrupt("truncated .npy header".to_string()));
        }
        let header = std::str::from_utf8(&bytes[header_start..data_start])
            .map_err(|_| corrupt("header is not valid text".to_string()))?;

        if !header.contains("'descr': '<f4'") {
            return Err(corrupt(format!("expected little-endian float32, header {}", header.trim())));
        }
        if header.contains("'fortran_order': True") {
            return Err(corrupt("fortran-ordered arrays are not supported".to_string()));
        }
        let dim = parse_shape(header)
            .ok_or_else(|| corrupt(format!("expected shape (2, dim), header {}", header.trim())))?;

        let data = &bytes[data_start..];
        if data.len() != 2 * dim * 4 {
            return Err(corrupt(format!(
                "expected {} bytes of range data, found {}",
                2 * dim * 4,
                data.len()
            )));
        }
        let values: Vec<f32> = data
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let (min, max) = values.split_at(dim);

        Self::new(min.to_vec(), max.to_vec()).map_err(|e| corrupt(e.to_string()))
    }
}

/// Extract `dim` from a header containing `'shape': (2, dim)`.
fn parse_shape(header: &str) -> Option<usize> {
    let start = header.find("'shape':")? + "'shape':".len();
    let rest = &header[start..];
    let open = rest.find('(')?;
    let close = rest.find(')')?;
    let dims: Vec<usize> = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect::<Option<_>>()?;
    match dims.as_slice() {
        [2, dim] if *dim > 0 => Some(*dim),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Matrix;
    use tempfile::tempdir;

    #[test]
    fn test_fit_min_max() {
        let sample = Matrix::from_rows(vec![
            vec![0.1, -0.5, 0.0],
            vec![0.3, 0.2, 0.0],
            vec![-0.2, 0.1, 0.0],
        ])
        .unwrap();
        let ranges = CalibrationRange::fit(&sample).unwrap();
        assert_eq!(ranges.min(), &[-0.2, -0.5, 0.0]);
        assert_eq!(ranges.max(), &[0.3, 0.2, 0.0]);
    }

    #[test]
    fn test_rejects_malformed_bounds() {
        assert!(matches!(
            CalibrationRange::new(vec![f32::NAN], vec![1.0]),
            Err(NewsIndexError::Quantization(_))
        ));
        assert!(CalibrationRange::new(vec![1.0], vec![0.0]).is_err());
        assert!(CalibrationRange::new(vec![0.0, 0.0], vec![1.0]).is_err());
        assert!(CalibrationRange::fit(&Matrix::with_cols(4)).is_err());
    }

    #[test]
    fn test_fit_rejects_nan_mixed_with_finite_values() {
        let sample = Matrix::from_rows(vec![vec![f32::NAN, 0.0], vec![0.5, 1.0]]).unwrap();
        let err = CalibrationRange::fit(&sample).unwrap_err();
        assert!(
            matches!(err, NewsIndexError::Quantization(ref msg) if msg.contains("row 0, dimension 0")),
            "{}",
            err
        );

        let sample = Matrix::from_rows(vec![vec![0.0, 1.0], vec![0.5, f32::INFINITY]]).unwrap();
        assert!(matches!(
            CalibrationRange::fit(&sample),
            Err(NewsIndexError::Quantization(_))
        ));
    }

    #[test]
    fn test_npy_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calibration_ranges.npy");
        let ranges = CalibrationRange::new(vec![-1.0, -0.25, 0.5], vec![1.0, 0.75, 0.5]).unwrap();

        ranges.save(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((NPY_PREAMBLE + header_len) % 64, 0);

        let loaded = CalibrationRange::load(&path).unwrap();
        assert_eq!(loaded, ranges);
        assert!(!tmp_sibling(&path).exists());
    }

    #[test]
    fn test_digest_matches_saved_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calibration_ranges.npy");
        let ranges = CalibrationRange::new(vec![-1.0, 0.0], vec![1.0, 2.0]).unwrap();
        ranges.save(&path).unwrap();

        let (loaded, digest) = CalibrationRange::load_with_digest(&path).unwrap();
        assert_eq!(loaded, ranges);
        assert_eq!(digest, ranges.digest());
        assert_eq!(CalibrationRange::load_checked(&path, &digest).unwrap(), ranges);

        let other = CalibrationRange::new(vec![-2.0, 0.0], vec![1.0, 2.0]).unwrap();
        assert!(matches!(
            CalibrationRange::load_checked(&path, &other.digest()),
            Err(NewsIndexError::DataCorruption { .. })
        ));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.npy");
        std::fs::write(&path, b"definitely not numpy").unwrap();
        assert!(matches!(
            CalibrationRange::load(&path),
            Err(NewsIndexError::DataCorruption { .. })
        ));
    }

    #[test]
    fn test_load_rejects_truncated_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.npy");
        CalibrationRange::new(vec![0.0; 8], vec![1.0; 8])
            .unwrap()
            .save(&path)
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        assert!(matches!(
            CalibrationRange::load(&path),
            Err(NewsIndexError::DataCorruption { .. })
        ));
    }

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("{'shape': (2, 1024), }"), Some(1024));
        assert_eq!(parse_shape("{'shape': (1024,), }"), None);
        assert_eq!(parse_shape("{'shape': (3, 4), }"), None);
    }
}
