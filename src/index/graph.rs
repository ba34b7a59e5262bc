//! Proximity graph storage.
//!
//! Build time uses [`VamanaGraph`] (one `Vec` per node, cheap to rewire);
//! saved and loaded indexes use [`CsrGraph`]:
//!
//! ```text
//! adjacency          csr
//! 0 -> [2, 3]        offsets: [0, 2, 3, 3, 5]
//! 1 -> [0]           edges:   [2, 3, 0, 1, 2]
//! 2 -> []
//! 3 -> [1, 2]        node i owns edges[offsets[i]..offsets[i + 1]]
//! ```

use crate::types::error::{NewsIndexError, Result};
use rand::Rng;

/// Graph structures that support neighbor queries during search.
pub trait GraphNeighbors {
    /// Out-neighbors of `node_id`.
    fn neighbors(&self, node_id: u32) -> &[u32];

    /// Number of nodes.
    fn num_nodes(&self) -> usize;
}

/// Degree-bounded adjacency lists used while building.
#[derive(Debug, Clone)]
pub struct VamanaGraph {
    adjacency: Vec<Vec<u32>>,
}

impl GraphNeighbors for VamanaGraph {
    fn neighbors(&self, node_id: u32) -> &[u32] {
        &self.adjacency[node_id as usize]
    }

    fn num_nodes(&self) -> usize {
        self.adjacency.len()
    }
}

impl VamanaGraph {
    /// Graph with `num_nodes` nodes and no edges.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); num_nodes],
        }
    }

    /// Graph where every node links to `degree` distinct random other nodes.
    ///
    /// # Errors
    ///
    /// Returns `NewsIndexError::InvalidInput` if `degree >= num_nodes`
    pub fn random<R: Rng>(num_nodes: usize, degree: usize, rng: &mut R) -> Result<Self> {
        if degree >= num_nodes {
            return Err(NewsIndexError::invalid(format!(
                "degree {} must be < num_nodes {}",
                degree, num_nodes
            )));
        }

        let mut graph = Self::new(num_nodes);
        for node in 0..num_nodes {
            // Sample one extra so dropping `node` still leaves `degree` picks
            let picks = rand::seq::index::sample(rng, num_nodes, degree + 1);
            graph.adjacency[node] = picks
                .into_iter()
                .filter(|&n| n != node)
                .take(degree)
                .map(|n| n as u32)
                .collect();
        }
        Ok(graph)
    }

    /// Replace the out-edges of `node_id`.
    pub fn set_neighbors(&mut self, node_id: u32, neighbors: Vec<u32>) {
        debug_assert!((node_id as usize) < self.adjacency.len());
        self.adjacency[node_id as usize] = neighbors;
    }

    /// Total number of edges.
    pub fn num_edges(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum()
    }

    /// Largest out-degree.
    pub fn max_degree(&self) -> usize {
        self.adjacency.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Compress to CSR.
    pub fn to_csr(&self) -> CsrGraph {
        let mut offsets = Vec::with_capacity(self.adjacency.len() + 1);
        let mut edges = Vec::with_capacity(self.num_edges());

        offsets.push(0u32);
        for neighbors in &self.adjacency {
            edges.extend_from_slice(neighbors);
            offsets.push(edges.len() as u32);
        }

        CsrGraph { offsets, edges }
    }
}

/// Compressed Sparse Row graph, the persisted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrGraph {
    /// `offsets[i]..offsets[i + 1]` indexes node i's slice of `edges`.
    /// Length is `num_nodes + 1`.
    pub offsets: Vec<u32>,

    /// Concatenated neighbor lists.
    pub edges: Vec<u32>,
}

impl GraphNeighbors for CsrGraph {
    fn neighbors(&self, node_id: u32) -> &[u32] {
        let start = self.offsets[node_id as usize] as usize;
        let end = self.offsets[node_id as usize + 1] as usize;
        &self.edges[start..end]
    }

    fn num_nodes(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
}

impl CsrGraph {
    /// Check that offsets are monotone and every edge names a real node.
    pub fn validate(&self, num_nodes: usize) -> std::result::Result<(), String> {
        if self.offsets.len() != num_nodes + 1 {
            return Err(format!(
                "graph has {} offsets for {} nodes",
                self.offsets.len(),
                num_nodes
            ));
        }
        if self.offsets.first() != Some(&0) {
            return Err("graph offsets must start at 0".to_string());
        }
        if self.offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err("graph offsets are not monotone".to_string());
        }
        if self.offsets.last().copied() != Some(self.edges.len() as u32) {
            return Err("graph offsets do not cover the edge list".to_string());
        }
        if let Some(bad) = self.edges.iter().find(|&&e| e as usize >= num_nodes) {
            return Err(format!("edge targets missing node {}", bad));
        }
        Ok(())
    }
}
