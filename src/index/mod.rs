//! Multi-precision vector indexes.
//!
//! Three indexes share one key space ([`HashedKey`]) and differ in element
//! type and metric:
//!
//! ```text
//! news_f32.idx     f32  x 1024   cosine         (1 - cos)
//! news_int8.idx    i8   x 1024   inner product  -(a . b)
//! news_binary.idx  u8   x 128    hamming        popcount(a ^ b)
//! ```
//!
//! # Approximate search
//!
//! Indexes larger than the search list size carry a Vamana proximity graph:
//!
//! - [`graph`] - adjacency lists and CSR storage
//! - [`builder`] - graph construction (random init, refine, prune)
//! - [`search`] - greedy beam search from the medoid
//! - [`prune`] - diversity-aware neighbor selection
//!
//! Smaller indexes are scanned exhaustively, which is exact.

pub mod builder;
pub mod element;
pub mod format;
pub mod graph;
pub mod prune;
pub mod search;
pub mod vector;

pub use builder::BuildParams;
pub use element::Element;
pub use vector::{IndexGraph, VectorIndex};

use crate::quantize::packed_len;
use crate::types::error::{NewsIndexError, Result};
use crate::types::{HashedKey, Metric, Precision};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Embedding width produced by the default model.
pub const DEFAULT_EMBEDDING_DIM: usize = 1024;

/// Precision and dimensionality of one index.
///
/// For binary indexes `dim` counts packed bytes, not bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub precision: Precision,
    pub dim: usize,
}

impl IndexSpec {
    /// Spec for an index over `embedding_dim`-wide embeddings.
    pub fn for_embedding(precision: Precision, embedding_dim: usize) -> Self {
        let dim = match precision {
            Precision::Binary => packed_len(embedding_dim),
            Precision::Float32 | Precision::Int8 => embedding_dim,
        };
        Self { precision, dim }
    }

    /// Metric implied by the precision.
    pub fn metric(&self) -> Metric {
        self.precision.metric()
    }

    /// File name of this index inside the index directory.
    pub fn file_name(&self) -> String {
        format!("news_{}.idx", self.precision.as_str())
    }
}

/// One ranked index hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchResult {
    pub key: HashedKey,
    pub distance: f32,
    pub precision: Precision,
}

/// Query already converted to an index's element type.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVector {
    Float32(Vec<f32>),
    Int8(Vec<i8>),
    Binary(Vec<u8>),
}

impl QueryVector {
    /// Precision of the encoded query.
    pub fn precision(&self) -> Precision {
        match self {
            Self::Float32(_) => Precision::Float32,
            Self::Int8(_) => Precision::Int8,
            Self::Binary(_) => Precision::Binary,
        }
    }
}

/// Vector index of any precision.
#[derive(Debug, Clone)]
pub enum AnyIndex {
    Float32(VectorIndex<f32>),
    Int8(VectorIndex<i8>),
    Binary(VectorIndex<u8>),
}

impl AnyIndex {
    /// Empty index matching `spec`.
    pub fn new(spec: IndexSpec) -> Result<Self> {
        Ok(match spec.precision {
            Precision::Float32 => Self::Float32(VectorIndex::new(spec.dim)?),
            Precision::Int8 => Self::Int8(VectorIndex::new(spec.dim)?),
            Precision::Binary => Self::Binary(VectorIndex::new(spec.dim)?),
        })
    }

    /// Load the index described by `spec` from `path`.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::DataCorruption` if the file does not hold an
    /// index matching `spec`
    pub fn load(path: impl AsRef<Path>, spec: IndexSpec) -> Result<Self> {
        let path = path.as_ref();
        Ok(match spec.precision {
            Precision::Float32 => Self::Float32(VectorIndex::load(path, spec.dim)?),
            Precision::Int8 => Self::Int8(VectorIndex::load(path, spec.dim)?),
            Precision::Binary => Self::Binary(VectorIndex::load(path, spec.dim)?),
        })
    }

    /// Search with a query of the same precision.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::InvalidInput` if the query precision or width
    /// does not match the index
    pub fn search(&self, query: &QueryVector, k: usize) -> Result<Vec<SearchResult>> {
        let precision = self.precision();
        let hits = match (self, query) {
            (Self::Float32(index), QueryVector::Float32(q)) => index.search(q, k)?,
            (Self::Int8(index), QueryVector::Int8(q)) => index.search(q, k)?,
            (Self::Binary(index), QueryVector::Binary(q)) => index.search(q, k)?,
            _ => {
                return Err(NewsIndexError::invalid(format!(
                    "{} query against {} index",
                    query.precision(),
                    precision
                )))
            }
        };
        Ok(hits
            .into_iter()
            .map(|(key, distance)| SearchResult {
                key,
                distance,
                precision,
            })
            .collect())
    }

    /// Build the proximity graph (no-op for small indexes).
    pub fn build_graph(&mut self, params: &BuildParams) -> Result<()> {
        match self {
            Self::Float32(index) => index.build_graph(params),
            Self::Int8(index) => index.build_graph(params),
            Self::Binary(index) => index.build_graph(params),
        }
    }

    /// Save to `path`, building the graph first if needed.
    pub fn save(&mut self, path: impl AsRef<Path>, params: &BuildParams) -> Result<()> {
        match self {
            Self::Float32(index) => index.save(path, params),
            Self::Int8(index) => index.save(path, params),
            Self::Binary(index) => index.save(path, params),
        }
    }

    /// Precision of the stored vectors.
    pub fn precision(&self) -> Precision {
        match self {
            Self::Float32(_) => Precision::Float32,
            Self::Int8(_) => Precision::Int8,
            Self::Binary(_) => Precision::Binary,
        }
    }

    /// Precision and dimensionality.
    pub fn spec(&self) -> IndexSpec {
        let dim = match self {
            Self::Float32(index) => index.dim(),
            Self::Int8(index) => index.dim(),
            Self::Binary(index) => index.dim(),
        };
        IndexSpec {
            precision: self.precision(),
            dim,
        }
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        match self {
            Self::Float32(index) => index.len(),
            Self::Int8(index) => index.len(),
            Self::Binary(index) => index.len(),
        }
    }

    /// True if the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if a proximity graph is present.
    pub fn has_graph(&self) -> bool {
        match self {
            Self::Float32(index) => index.graph().is_some(),
            Self::Int8(index) => index.graph().is_some(),
            Self::Binary(index) => index.graph().is_some(),
        }
    }
}
