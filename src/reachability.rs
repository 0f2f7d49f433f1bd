//! Density-adjusted distance space the hierarchy is built in.
//!
//! `reachability(a, b) = max(core(a), core(b), distance(a, b))`. The graph is
//! complete but never materialized: weights are computed on demand and edges
//! are streamed.

use serde::{Deserialize, Serialize};

use crate::distance::{CoreDistances, DistanceEngine};
use crate::error::{ClusterError, Result};

/// Undirected weighted edge with `a < b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MutualReachabilityEdge {
    pub a: usize,
    pub b: usize,
    pub weight: f64,
}

impl MutualReachabilityEdge {
    /// Edge between two points, normalized so that `a < b`.
    pub fn new(a: usize, b: usize, weight: f64) -> Self {
        if a <= b {
            Self { a, b, weight }
        } else {
            Self { a: b, b: a, weight }
        }
    }
}

/// Complete graph over the points of a [`DistanceEngine`], weighted by mutual
/// reachability. Holds only borrows, so it is `Copy`.
#[derive(Clone, Copy)]
pub struct MutualReachabilityGraph<'g, 'a> {
    engine: &'g DistanceEngine<'a>,
    core: &'g CoreDistances,
}

impl<'g, 'a> MutualReachabilityGraph<'g, 'a> {
    pub fn new(engine: &'g DistanceEngine<'a>, core: &'g CoreDistances) -> Result<Self> {
        if core.len() != engine.n_points() {
            return Err(ClusterError::dimension_mismatch(engine.n_points(), core.len()));
        }
        Ok(Self { engine, core })
    }

    pub fn n_points(&self) -> usize {
        self.engine.n_points()
    }

    pub fn core_distance(&self, point: usize) -> f64 {
        self.core.get(point)
    }

    /// Mutual reachability distance between `a` and `b`; 0 on the diagonal.
    #[inline]
    pub fn reachability(&self, a: usize, b: usize) -> f64 {
        if a == b {
            return 0.0;
        }
        self.engine
            .distance(a, b)
            .max(self.core.get(a))
            .max(self.core.get(b))
    }

    /// Every edge of the complete graph, `(0,1), (0,2), .., (n-2,n-1)`, computed lazily.
    ///
    /// The iterator owns a copy of the graph, so it may outlive `&self`.
    pub fn edges(&self) -> ReachabilityEdges<'g, 'a> {
        ReachabilityEdges {
            graph: *self,
            a: 0,
            b: 1,
        }
    }
}

/// Lazy edge stream returned by [`MutualReachabilityGraph::edges`].
pub struct ReachabilityEdges<'g, 'a> {
    graph: MutualReachabilityGraph<'g, 'a>,
    a: usize,
    b: usize,
}

impl Iterator for ReachabilityEdges<'_, '_> {
    type Item = MutualReachabilityEdge;

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.graph.n_points();
        if self.b >= n {
            if self.a + 2 >= n {
                return None;
            }
            self.a += 1;
            self.b = self.a + 1;
        }
        let edge = MutualReachabilityEdge {
            a: self.a,
            b: self.b,
            weight: self.graph.reachability(self.a, self.b),
        };
        self.b += 1;
        Some(edge)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.graph.n_points();
        let remaining = if self.b >= n && self.a + 2 >= n {
            0
        } else {
            // Rest of the current row plus every later row
            let row = n.saturating_sub(self.b);
            let later = n.saturating_sub(self.a + 1);
            row + later * later.saturating_sub(1) / 2
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ReachabilityEdges<'_, '_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{DistanceMetric, NeighborSearch};
    use ndarray::array;

    #[test]
    fn test_reachability_is_max_of_core_and_direct() {
        let points = array![[0.0], [1.0], [3.0], [7.0]];
        let engine = DistanceEngine::new(points.view(), DistanceMetric::Euclidean).unwrap();
        let core = engine.core_distances(2, NeighborSearch::BruteForce).unwrap();
        let graph = MutualReachabilityGraph::new(&engine, &core).unwrap();

        // core = [1, 1, 2, 4]
        assert_eq!(graph.reachability(0, 1), 1.0);
        assert_eq!(graph.reachability(1, 2), 2.0);
        assert_eq!(graph.reachability(2, 3), 4.0);
        assert_eq!(graph.reachability(0, 3), 7.0);
        assert_eq!(graph.reachability(2, 2), 0.0);
        assert_eq!(graph.reachability(3, 0), graph.reachability(0, 3));
    }

    #[test]
    fn test_edges_cover_complete_graph_once() {
        let points = array![[0.0, 0.0], [1.0, 0.0], [0.0, 2.0], [5.0, 5.0], [6.0, 5.0]];
        let engine = DistanceEngine::new(points.view(), DistanceMetric::Manhattan).unwrap();
        let core = engine.core_distances(3, NeighborSearch::BruteForce).unwrap();
        let graph = MutualReachabilityGraph::new(&engine, &core).unwrap();

        let edges: Vec<_> = graph.edges().collect();
        assert_eq!(edges.len(), 5 * 4 / 2);
        assert!(edges.iter().all(|e| e.a < e.b));
        for edge in &edges {
            assert_eq!(edge.weight, graph.reachability(edge.a, edge.b));
            assert!(edge.weight >= graph.core_distance(edge.a));
            assert!(edge.weight >= graph.core_distance(edge.b));
        }
    }

    #[test]
    fn test_triangle_inequality_holds_in_reachability_space() {
        let points = array![[0.0, 0.0], [0.5, 0.1], [0.2, 0.9], [4.0, 4.0], [4.2, 3.5], [9.0, 0.0]];
        let engine = DistanceEngine::new(points.view(), DistanceMetric::Euclidean).unwrap();
        let core = engine.core_distances(2, NeighborSearch::BruteForce).unwrap();
        let graph = MutualReachabilityGraph::new(&engine, &core).unwrap();
        let n = graph.n_points();
        for a in 0..n {
            for b in 0..n {
                for c in 0..n {
                    assert!(
                        graph.reachability(a, c)
                            <= graph.reachability(a, b) + graph.reachability(b, c) + 1e-12
                    );
                }
            }
        }
    }

    #[test]
    fn test_mismatched_core_distances_rejected() {
        let points = array![[0.0], [1.0], [2.0]];
        let other = array![[0.0], [1.0]];
        let engine = DistanceEngine::new(points.view(), DistanceMetric::Euclidean).unwrap();
        let other_engine = DistanceEngine::new(other.view(), DistanceMetric::Euclidean).unwrap();
        let core = other_engine.core_distances(1, NeighborSearch::BruteForce).unwrap();
        assert!(matches!(
            MutualReachabilityGraph::new(&engine, &core),
            Err(ClusterError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    /// Builds everything from a matrix local to the function and hands back
    /// only the owned edge list.
    fn edges_of(points: &ndarray::Array2<f64>, min_pts: usize) -> Vec<MutualReachabilityEdge> {
        let engine = DistanceEngine::new(points.view(), DistanceMetric::Euclidean).unwrap();
        let core = engine.core_distances(min_pts, NeighborSearch::BruteForce).unwrap();
        let graph = MutualReachabilityGraph::new(&engine, &core).unwrap();
        graph.edges().collect()
    }

    #[test]
    fn test_edges_built_from_a_local_view_stream_after_the_graph_is_gone() {
        let points = array![[0.0], [1.0], [3.0], [7.0]];
        let edges = edges_of(&points, 2);
        let pairs: Vec<_> = edges.iter().map(|e| (e.a, e.b)).collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
        // core = [1, 1, 2, 4]
        assert_eq!(edges[0].weight, 1.0);
        assert_eq!(edges[5].weight, 4.0);
    }

    #[test]
    fn test_edge_count_matches_size_hint() {
        for n in 1..6 {
            let points = ndarray::Array2::from_shape_fn((n, 1), |(i, _)| i as f64 * 2.0);
            let engine = DistanceEngine::new(points.view(), DistanceMetric::Euclidean).unwrap();
            let core = engine.core_distances(1, NeighborSearch::BruteForce).unwrap();
            let graph = MutualReachabilityGraph::new(&engine, &core).unwrap();
            let mut edges = graph.edges();
            assert_eq!(edges.len(), n * n.saturating_sub(1) / 2, "n = {n}");
            edges.next();
            assert_eq!(edges.len(), (n * n.saturating_sub(1) / 2).saturating_sub(1), "n = {n}");
            assert_eq!(edges.count(), (n * n.saturating_sub(1) / 2).saturating_sub(1));
        }
    }

    #[test]
    fn test_edge_normalization() {
        let edge = MutualReachabilityEdge::new(4, 1, 2.5);
        assert_eq!((edge.a, edge.b), (1, 4));
    }
}
