//! Core types shared by the quantizer, the indexes, and the search path.

pub mod article;
pub mod error;
pub mod matrix;

pub use article::{ArticleHit, ArticleRecord, Location};
pub use error::{NewsIndexError, Result};
pub use matrix::{BinaryMatrix, EmbeddingMatrix, Int8Matrix, Matrix};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Integer key shared by all three vector indexes and the `Article_Vectors` table.
///
/// Always in `[0, 2^63 - 2]`, so it converts losslessly to SQLite's `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashedKey(u64);

impl HashedKey {
    /// Largest value a key can take (`2^63 - 2`).
    pub const MAX: u64 = (1u64 << 63) - 2;

    /// Wrap a raw key.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::InvalidInput` if `raw` exceeds [`HashedKey::MAX`]
    pub fn new(raw: u64) -> Result<Self> {
        if raw > Self::MAX {
            return Err(NewsIndexError::invalid(format!(
                "hashed key {} exceeds 63-bit key space",
                raw
            )));
        }
        Ok(Self(raw))
    }

    /// Key from an in-range value produced by the hasher.
    pub(crate) const fn from_reduced(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw key value.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Key as stored in SQLite.
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Key from a SQLite column value.
    pub fn from_i64(raw: i64) -> Result<Self> {
        u64::try_from(raw)
            .map_err(|_| NewsIndexError::invalid(format!("negative hashed key {}", raw)))
            .and_then(Self::new)
    }
}

impl fmt::Display for HashedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Element precision of an embedding, which also fixes its index metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// float32 vectors, cosine distance
    Float32,
    /// range-calibrated int8 vectors, inner-product distance
    Int8,
    /// sign-bit packed vectors, Hamming distance
    Binary,
}

impl Precision {
    /// All precisions, in build order.
    pub const ALL: [Precision; 3] = [Precision::Float32, Precision::Int8, Precision::Binary];

    /// Short name used in file names, logs, and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float32 => "f32",
            Self::Int8 => "int8",
            Self::Binary => "binary",
        }
    }

    /// Distance metric the index for this precision uses.
    pub fn metric(&self) -> Metric {
        match self {
            Self::Float32 => Metric::Cosine,
            Self::Int8 => Metric::InnerProduct,
            Self::Binary => Metric::Hamming,
        }
    }

    /// On-disk tag.
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            Self::Float32 => 1,
            Self::Int8 => 2,
            Self::Binary => 3,
        }
    }

    /// Inverse of [`Precision::to_tag`].
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Float32),
            2 => Some(Self::Int8),
            3 => Some(Self::Binary),
            _ => None,
        }
    }
}

/// Distance metric of a vector index. Smaller distance is always closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// `1 - cos(a, b)`
    Cosine,
    /// `-(a · b)`
    InnerProduct,
    /// number of differing bits
    Hamming,
}

impl Metric {
    /// On-disk tag.
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            Self::Cosine => 1,
            Self::InnerProduct => 2,
            Self::Hamming => 3,
        }
    }

    /// Inverse of [`Metric::to_tag`].
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Cosine),
            2 => Some(Self::InnerProduct),
            3 => Some(Self::Hamming),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cosine => "cos",
            Self::InnerProduct => "ip",
            Self::Hamming => "hamming",
        })
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = NewsIndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float32" => Ok(Self::Float32),
            "int8" | "i8" => Ok(Self::Int8),
            "binary" | "bin" => Ok(Self::Binary),
            other => Err(NewsIndexError::invalid(format!(
                "unknown precision '{}' (expected f32, int8, or binary)",
                other
            ))),
        }
    }
}
