//! Vamana graph construction.
//!
//! Starts from a random out-degree `R` graph and runs `num_iterations`
//! passes over the nodes in shuffled order. Each node gets the visited set
//! of a greedy search from the medoid, merged with its current neighbors,
//! and pruned back to `R` with the `alpha` rule. Every kept neighbor then
//! gains a back edge, which triggers a prune of its own list once full.
//!
//! Construction is single-threaded and deterministic for a given seed.

use crate::index::graph::{GraphNeighbors, VamanaGraph};
use crate::index::prune::robust_prune;
use crate::index::search::{greedy_search, SearchParams};
use crate::types::error::{NewsIndexError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Parameters for graph construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildParams {
    /// Maximum out-degree per vertex (R). Typical values: 32-128.
    pub max_degree: usize,

    /// Diversity factor for robust pruning. 1.0 keeps pure nearest
    /// neighbors; 1.2 keeps more long-range edges.
    pub alpha: f32,

    /// Beam width during construction and search (L). Typical values: 75-200.
    /// Indexes holding at most this many vectors are searched exhaustively.
    pub search_list_size: usize,

    /// Number of refinement passes. Gains flatten after 2.
    pub num_iterations: usize,

    /// Seed for random initialization and vertex order.
    pub seed: u64,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            max_degree: 64,
            alpha: 1.2,
            search_list_size: 100,
            num_iterations: 2,
            seed: 0x6e65_7773,
        }
    }
}

/// Build a graph over `num_nodes` vectors.
///
/// `pairwise(a, b)` must return a non-negative distance between stored vectors.
///
/// # Returns
///
/// Tuple of (graph, medoid) where medoid is the search entry point
///
/// # Errors
///
/// Returns `NewsIndexError::InvalidInput` if there are fewer than two nodes
/// or `max_degree` is zero
pub fn build_graph<F>(num_nodes: usize, pairwise: F, params: &BuildParams) -> Result<(VamanaGraph, u32)>
where
    F: Fn(u32, u32) -> f32,
{
    validate_inputs(num_nodes, params)?;

    let degree = params.max_degree.min(num_nodes - 1);
    let mut rng = StdRng::seed_from_u64(params.seed);

    let mut graph = VamanaGraph::random(num_nodes, degree, &mut rng)?;
    let medoid = compute_medoid(num_nodes, &pairwise, &mut rng);

    for iteration in 0..params.num_iterations {
        refine_graph_iteration(&mut graph, &pairwise, medoid, degree, params, &mut rng);
        debug!(
            iteration,
            edges = graph.num_edges(),
            max_degree = graph.max_degree(),
            "graph refinement pass complete"
        );
    }

    Ok((graph, medoid))
}

fn validate_inputs(num_nodes: usize, params: &BuildParams) -> Result<()> {
    if num_nodes < 2 {
        return Err(NewsIndexError::invalid(format!(
            "cannot build a graph over {} vectors",
            num_nodes
        )));
    }
    if params.max_degree == 0 {
        return Err(NewsIndexError::invalid("max_degree must be > 0"));
    }
    if num_nodes > u32::MAX as usize {
        return Err(NewsIndexError::invalid("too many vectors for 32-bit node ids"));
    }
    Ok(())
}

/// Node minimizing the summed distance to the others.
///
/// Exact for up to 1000 nodes; larger sets use 1000 sampled candidates, each
/// scored against 100 sampled probes.
fn compute_medoid<F>(num_nodes: usize, pairwise: &F, rng: &mut StdRng) -> u32
where
    F: Fn(u32, u32) -> f32,
{
    let (candidates, probes): (Vec<u32>, Vec<u32>) = if num_nodes <= 1000 {
        let all: Vec<u32> = (0..num_nodes as u32).collect();
        (all.clone(), all)
    } else {
        let sample = |rng: &mut StdRng, amount: usize| {
            rand::seq::index::sample(rng, num_nodes, amount)
                .into_iter()
                .map(|i| i as u32)
                .collect::<Vec<_>>()
        };
        (sample(rng, 1000), sample(rng, 100))
    };

    let mut best = candidates[0];
    let mut best_sum = f32::MAX;
    for &candidate in &candidates {
        let sum: f32 = probes.iter().map(|&probe| pairwise(candidate, probe)).sum();
        if sum < best_sum {
            best_sum = sum;
            best = candidate;
        }
    }
    best
}

fn refine_graph_iteration<F>(
    graph: &mut VamanaGraph,
    pairwise: &F,
    medoid: u32,
    degree: usize,
    params: &BuildParams,
    rng: &mut StdRng,
) where
    F: Fn(u32, u32) -> f32,
{
    let mut vertices: Vec<u32> = (0..graph.num_nodes() as u32).collect();
    vertices.shuffle(rng);

    let search_params = SearchParams {
        top_k: params.search_list_size,
        search_list_size: params.search_list_size,
    };

    for &vertex in &vertices {
        let mut candidates = greedy_search(&*graph, medoid, |n| pairwise(vertex, n), search_params);
        candidates.extend(
            graph
                .neighbors(vertex)
                .iter()
                .map(|&n| (n, pairwise(vertex, n))),
        );

        let pruned = robust_prune(vertex, &candidates, pairwise, degree, params.alpha);
        graph.set_neighbors(vertex, pruned.clone());

        for &neighbor in &pruned {
            add_reverse_edge(graph, vertex, neighbor, pairwise, degree, params.alpha);
        }
    }
}

/// After adding `source -> target`, try to add `target -> source`.
fn add_reverse_edge<F>(
    graph: &mut VamanaGraph,
    source: u32,
    target: u32,
    pairwise: &F,
    degree: usize,
    alpha: f32,
) where
    F: Fn(u32, u32) -> f32,
{
    let mut target_neighbors = graph.neighbors(target).to_vec();
    if target_neighbors.contains(&source) {
        return;
    }

    if target_neighbors.len() < degree {
        target_neighbors.push(source);
        graph.set_neighbors(target, target_neighbors);
        return;
    }

    let candidates: Vec<(u32, f32)> = target_neighbors
        .iter()
        .chain(std::iter::once(&source))
        .map(|&n| (n, pairwise(target, n)))
        .collect();
    let pruned = robust_prune(target, &candidates, pairwise, degree, alpha);
    graph.set_neighbors(target, pruned);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_points(side: usize) -> Vec<(f32, f32)> {
        (0..side * side)
            .map(|i| ((i % side) as f32, (i / side) as f32))
            .collect()
    }

    fn l2(points: &[(f32, f32)]) -> impl Fn(u32, u32) -> f32 + '_ {
        move |a, b| {
            let (ax, ay) = points[a as usize];
            let (bx, by) = points[b as usize];
            ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
        }
    }

    #[test]
    fn test_validate_inputs() {
        let params = BuildParams::default();
        assert!(build_graph(1, |_, _| 0.0, &params).is_err());

        let zero_degree = BuildParams {
            max_degree: 0,
            ..BuildParams::default()
        };
        assert!(build_graph(10, |_, _| 0.0, &zero_degree).is_err());
    }

    #[test]
    fn test_degree_bound_holds() {
        let points = grid_points(10);
        let params = BuildParams {
            max_degree: 6,
            search_list_size: 16,
            ..BuildParams::default()
        };
        let (graph, medoid) = build_graph(points.len(), l2(&points), &params).unwrap();

        assert!(graph.max_degree() <= 6);
        assert!((medoid as usize) < points.len());
        for node in 0..points.len() as u32 {
            assert!(!graph.neighbors(node).contains(&node));
        }
    }

    #[test]
    fn test_medoid_is_central() {
        let points = grid_points(5);
        let mut rng = StdRng::seed_from_u64(1);
        let medoid = compute_medoid(points.len(), &l2(&points), &mut rng);
        assert_eq!(points[medoid as usize], (2.0, 2.0));
    }

    #[test]
    fn test_built_graph_finds_nearest_neighbor() {
        let points = grid_points(12);
        let params = BuildParams {
            max_degree: 8,
            search_list_size: 24,
            ..BuildParams::default()
        };
        let dist = l2(&points);
        let (graph, medoid) = build_graph(points.len(), &dist, &params).unwrap();

        let target = 12 * 9 + 3;
        let results = greedy_search(
            &graph,
            medoid,
            |n| dist(target, n),
            SearchParams {
                top_k: 1,
                search_list_size: 24,
            },
        );
        assert_eq!(results[0].0, target);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let points = grid_points(8);
        let params = BuildParams {
            max_degree: 5,
            search_list_size: 10,
            ..BuildParams::default()
        };
        let (a, ma) = build_graph(points.len(), l2(&points), &params).unwrap();
        let (b, mb) = build_graph(points.len(), l2(&points), &params).unwrap();
        assert_eq!(ma, mb);
        assert_eq!(a.to_csr(), b.to_csr());
    }
}
