//! Keyed vector index over one element precision.

use crate::index::builder::{build_graph, BuildParams};
use crate::index::element::Element;
use crate::index::graph::CsrGraph;
use crate::index::search::{compare_candidates, greedy_search, SearchParams};
use crate::types::error::{NewsIndexError, Result};
use crate::types::{HashedKey, Metric, Precision};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Proximity graph plus its search entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexGraph {
    /// Adjacency in CSR form
    pub csr: CsrGraph,

    /// Entry point for greedy search
    pub medoid: u32,

    /// Beam width used at query time
    pub search_list_size: usize,
}

/// Vectors of one precision addressed by [`HashedKey`].
///
/// Re-adding a key overwrites its vector. Any `add` drops a previously built
/// graph; call [`VectorIndex::build_graph`] (or save, which builds it) again
/// afterwards. Searching takes `&self` and is safe to call concurrently.
#[derive(Debug, Clone)]
pub struct VectorIndex<E: Element> {
    dim: usize,
    keys: Vec<HashedKey>,
    vectors: Vec<E>,
    positions: HashMap<HashedKey, u32>,
    graph: Option<IndexGraph>,
}

impl<E: Element> VectorIndex<E> {
    /// Empty index of dimensionality `dim`.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::InvalidInput` if `dim` is zero
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(NewsIndexError::invalid("index dimensionality must be > 0"));
        }
        Ok(Self {
            dim,
            keys: Vec::new(),
            vectors: Vec::new(),
            positions: HashMap::new(),
            graph: None,
        })
    }

    /// Rebuild from persisted parts.
    pub(crate) fn from_parts(
        dim: usize,
        keys: Vec<HashedKey>,
        vectors: Vec<E>,
        graph: Option<IndexGraph>,
    ) -> std::result::Result<Self, String> {
        if dim == 0 {
            return Err("dimensionality is zero".to_string());
        }
        if vectors.len() != keys.len() * dim {
            return Err(format!(
                "{} vector elements for {} keys of dimension {}",
                vectors.len(),
                keys.len(),
                dim
            ));
        }
        let mut positions = HashMap::with_capacity(keys.len());
        for (position, &key) in keys.iter().enumerate() {
            if positions.insert(key, position as u32).is_some() {
                return Err(format!("duplicate key {}", key));
            }
        }
        if let Some(graph) = &graph {
            graph.csr.validate(keys.len())?;
            if graph.medoid as usize >= keys.len() {
                return Err(format!("medoid {} out of range", graph.medoid));
            }
        }
        Ok(Self {
            dim,
            keys,
            vectors,
            positions,
            graph,
        })
    }

    /// Add vectors under `keys`, matched by position.
    ///
    /// Existing keys are overwritten in place.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::InvalidInput` if the lengths differ or the
    /// vector width is not the index dimensionality; nothing is added then
    pub fn add(&mut self, keys: &[HashedKey], vectors: &[E]) -> Result<()> {
        if vectors.len() != keys.len() * self.dim {
            return Err(NewsIndexError::invalid(format!(
                "{} keys need {} values of dimension {}, got {}",
                keys.len(),
                keys.len() * self.dim,
                self.dim,
                vectors.len()
            )));
        }
        if keys.is_empty() {
            return Ok(());
        }
        if self.keys.len() + keys.len() > u32::MAX as usize {
            return Err(NewsIndexError::invalid("index is full (32-bit positions)"));
        }

        let mut overwritten = 0usize;
        for (&key, vector) in keys.iter().zip(vectors.chunks_exact(self.dim)) {
            match self.positions.get(&key) {
                Some(&pos) => {
                    let start = pos as usize * self.dim;
                    self.vectors[start..start + self.dim].copy_from_slice(vector);
                    overwritten += 1;
                }
                None => {
                    self.positions.insert(key, self.keys.len() as u32);
                    self.keys.push(key);
                    self.vectors.extend_from_slice(vector);
                }
            }
        }

        if self.graph.take().is_some() {
            debug!(precision = %E::PRECISION, "graph invalidated by add");
        }
        if overwritten > 0 {
            debug!(precision = %E::PRECISION, overwritten, "overwrote existing keys");
        }
        Ok(())
    }

    /// Build the proximity graph for approximate search.
    ///
    /// Indexes with at most `params.search_list_size` vectors are searched
    /// exhaustively and get no graph.
    pub fn build_graph(&mut self, params: &BuildParams) -> Result<()> {
        if self.len() <= params.search_list_size.max(1) {
            self.graph = None;
            return Ok(());
        }

        let pairwise = |a: u32, b: u32| E::graph_distance(self.vector_at(a), self.vector_at(b));
        let (graph, medoid) = build_graph(self.len(), pairwise, params)?;
        let csr = graph.to_csr();
        info!(
            precision = %E::PRECISION,
            vectors = self.len(),
            edges = csr.edges.len(),
            medoid,
            "built proximity graph"
        );
        self.graph = Some(IndexGraph {
            csr,
            medoid,
            search_list_size: params.search_list_size,
        });
        Ok(())
    }

    /// Up to `k` nearest keys, ascending by distance (ties by key).
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::InvalidInput` if the query width differs from
    /// the index dimensionality
    pub fn search(&self, query: &[E], k: usize) -> Result<Vec<(HashedKey, f32)>> {
        if query.len() != self.dim {
            return Err(NewsIndexError::invalid(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dim,
                query.len()
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<(HashedKey, f32)> = match &self.graph {
            Some(graph) if k < self.len() => {
                let params = SearchParams {
                    top_k: k,
                    search_list_size: graph.search_list_size,
                };
                greedy_search(&graph.csr, graph.medoid, |n| E::distance(query, self.vector_at(n)), params)
                    .into_iter()
                    .map(|(node, dist)| (self.keys[node as usize], dist))
                    .collect()
            }
            _ => self.exhaustive(query, k),
        };

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(hits)
    }

    fn exhaustive(&self, query: &[E], k: usize) -> Vec<(HashedKey, f32)> {
        let mut scored: Vec<(u32, f32)> = self
            .vectors
            .par_chunks_exact(self.dim)
            .enumerate()
            .map(|(pos, vector)| (pos as u32, E::distance(query, vector)))
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, compare_candidates);
            scored.truncate(k);
        }
        scored
            .into_iter()
            .map(|(pos, dist)| (self.keys[pos as usize], dist))
            .collect()
    }

    /// Stored vector for `key`.
    pub fn get(&self, key: HashedKey) -> Option<&[E]> {
        self.positions.get(&key).map(|&pos| self.vector_at(pos))
    }

    fn vector_at(&self, pos: u32) -> &[E] {
        let start = pos as usize * self.dim;
        &self.vectors[start..start + self.dim]
    }

    /// Save to `path` (see [`crate::index::format`]), building the graph first
    /// if an `add` invalidated it.
    pub fn save(&mut self, path: impl AsRef<Path>, params: &BuildParams) -> Result<()> {
        if self.graph.is_none() {
            self.build_graph(params)?;
        }
        crate::index::format::write_index(path.as_ref(), self)
    }

    /// Load an index previously written by [`VectorIndex::save`].
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::DataCorruption` if the file is damaged, from an
    /// unknown format version, or holds a different precision or dimensionality
    pub fn load(path: impl AsRef<Path>, dim: usize) -> Result<Self> {
        let path = path.as_ref();
        let index: Self = crate::index::format::read_index(path)?;
        if index.dim != dim {
            return Err(NewsIndexError::corruption(
                path,
                format!("index has dimension {}, expected {}", index.dim, dim),
            ));
        }
        Ok(index)
    }

    /// Vector dimensionality.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Element precision.
    pub fn precision(&self) -> Precision {
        E::PRECISION
    }

    /// Distance metric.
    pub fn metric(&self) -> Metric {
        E::metric()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> &[HashedKey] {
        &self.keys
    }

    /// Flat row-major vector buffer, aligned with [`VectorIndex::keys`].
    pub fn raw_vectors(&self) -> &[E] {
        &self.vectors
    }

    /// Proximity graph, if built.
    pub fn graph(&self) -> Option<&IndexGraph> {
        self.graph.as_ref()
    }
}
