//! Greedy beam search over a proximity graph.
//!
//! ```text
//! 1. Seed the beam with the entry point (medoid)
//! 2. Repeatedly expand the closest unexpanded node in the beam
//! 3. Keep the beam at `search_list_size` best candidates
//! 4. Stop when every node in the beam has been expanded
//! ```

use crate::index::graph::GraphNeighbors;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Parameters for one greedy search.
#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    /// Number of results to return
    pub top_k: usize,

    /// Beam width (L). Clamped to at least `top_k`.
    pub search_list_size: usize,
}

/// Search `graph` from `entry` using `distance_to` for node distances.
///
/// Returns up to `top_k` `(node_id, distance)` pairs, ascending by distance
/// with ties broken by node id.
pub fn greedy_search<G, F>(graph: &G, entry: u32, distance_to: F, params: SearchParams) -> Vec<(u32, f32)>
where
    G: GraphNeighbors + ?Sized,
    F: Fn(u32) -> f32,
{
    if graph.num_nodes() == 0 || params.top_k == 0 {
        return Vec::new();
    }

    let beam_width = params.search_list_size.max(params.top_k);
    let mut visited: HashSet<u32> = HashSet::with_capacity(beam_width * 4);
    let mut expanded: HashSet<u32> = HashSet::with_capacity(beam_width * 2);
    let mut beam: Vec<(u32, f32)> = vec![(entry, distance_to(entry))];
    visited.insert(entry);

    while let Some(&(node, _)) = beam.iter().find(|(id, _)| !expanded.contains(id)) {
        expanded.insert(node);

        for &neighbor in graph.neighbors(node) {
            if visited.insert(neighbor) {
                beam.push((neighbor, distance_to(neighbor)));
            }
        }

        beam.sort_by(compare_candidates);
        beam.truncate(beam_width);
    }

    beam.truncate(params.top_k);
    beam
}

/// Order by distance, then node id.
pub(crate) fn compare_candidates(a: &(u32, f32), b: &(u32, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::graph::VamanaGraph;

    /// Path graph 0 - 1 - 2 - 3 - 4 over points on a line.
    fn line_graph() -> (VamanaGraph, Vec<f32>) {
        let mut graph = VamanaGraph::new(5);
        graph.set_neighbors(0, vec![1]);
        graph.set_neighbors(1, vec![0, 2]);
        graph.set_neighbors(2, vec![1, 3]);
        graph.set_neighbors(3, vec![2, 4]);
        graph.set_neighbors(4, vec![3]);
        (graph, vec![0.0, 1.0, 2.0, 3.0, 4.0])
    }

    #[test]
    fn test_walks_to_target() {
        let (graph, points) = line_graph();
        let query = 3.9f32;
        let params = SearchParams {
            top_k: 2,
            search_list_size: 2,
        };
        let results = greedy_search(&graph, 0, |n| (points[n as usize] - query).abs(), params);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 4);
        assert_eq!(results[1].0, 3);
    }

    #[test]
    fn test_returns_at_most_reachable_nodes() {
        let (graph, points) = line_graph();
        let params = SearchParams {
            top_k: 50,
            search_list_size: 10,
        };
        let results = greedy_search(&graph, 2, |n| points[n as usize], params);
        assert_eq!(results.len(), 5);
        assert!(results.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}
