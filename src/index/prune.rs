//! Diversity-aware neighbor selection (Vamana robust prune).
//!
//! ```text
//! RobustPrune(p, candidates, alpha, R):
//!   while candidates not empty and |N(p)| < R:
//!     p* = closest candidate to p
//!     N(p) += p*
//!     drop every p' with alpha * d(p*, p') <= d(p, p')
//! ```
//!
//! `alpha > 1` keeps some longer edges, which is what lets greedy search
//! cross the graph in few hops.

use crate::index::search::compare_candidates;

/// Select at most `max_degree` diverse neighbors for `node`.
///
/// `candidates` holds `(node_id, distance_to_node)`; `node` itself is ignored
/// if present. `pairwise` returns the distance between two stored vectors.
pub fn robust_prune<F>(
    node: u32,
    candidates: &[(u32, f32)],
    pairwise: F,
    max_degree: usize,
    alpha: f32,
) -> Vec<u32>
where
    F: Fn(u32, u32) -> f32,
{
    let mut pool: Vec<(u32, f32)> = candidates
        .iter()
        .copied()
        .filter(|&(id, _)| id != node)
        .collect();
    pool.sort_by(compare_candidates);
    pool.dedup_by_key(|(id, _)| *id);

    let mut selected = Vec::with_capacity(max_degree);
    while !pool.is_empty() && selected.len() < max_degree {
        let (best, _) = pool.remove(0);
        selected.push(best);
        pool.retain(|&(other, dist_to_node)| alpha * pairwise(best, other) > dist_to_node);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_diverse_directions() {
        // node 0 at origin; 1 and 2 close together to the right, 3 to the left
        let points = [0.0f32, 1.0, 1.1, -1.2];
        let d = |a: u32, b: u32| (points[a as usize] - points[b as usize]).abs();
        let candidates: Vec<(u32, f32)> = (1..4).map(|n| (n, d(0, n))).collect();

        let neighbors = robust_prune(0, &candidates, d, 2, 1.0);
        assert_eq!(neighbors, vec![1, 3]);
    }

    #[test]
    fn test_prune_respects_degree_and_skips_self() {
        let candidates = vec![(0u32, 0.0f32), (1, 1.0), (2, 2.0), (3, 3.0), (2, 2.0)];
        let neighbors = robust_prune(0, &candidates, |_, _| 100.0, 2, 1.2);
        assert_eq!(neighbors, vec![1, 2]);
    }
}
