//! Single-linkage hierarchy in mutual reachability space.
//!
//! The minimum spanning tree is built with Prim's algorithm over the implicit
//! complete graph, then replayed in order of increasing weight through a
//! union-find to produce a binary merge tree. Nodes live in an arena:
//! ids `0..n` are the points, id `n + k` is the `k`-th merge.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClusterError, Result};
use crate::reachability::{MutualReachabilityEdge, MutualReachabilityGraph};

/// Minimum spanning tree of the reachability graph.
///
/// Dense Prim's, O(n²) reachability evaluations and no materialized matrix.
/// Starts from point 0; among equal candidate weights the lowest point index
/// is attached first, and an existing attachment is only replaced by a
/// strictly lighter one, so the result is reproducible.
pub fn minimum_spanning_tree(graph: &MutualReachabilityGraph) -> Vec<MutualReachabilityEdge> {
    let n = graph.n_points();
    if n < 2 {
        return Vec::new();
    }

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut attach = vec![0usize; n];
    let mut edges = Vec::with_capacity(n - 1);

    let mut current = 0;
    in_tree[current] = true;
    for _ in 1..n {
        let mut next: Option<usize> = None;
        for v in 0..n {
            if in_tree[v] {
                continue;
            }
            let weight = graph.reachability(current, v);
            if weight < best[v] {
                best[v] = weight;
                attach[v] = current;
            }
            match next {
                Some(u) if best[u] <= best[v] => {}
                _ => next = Some(v),
            }
        }

        let Some(v) = next else { break };
        in_tree[v] = true;
        edges.push(MutualReachabilityEdge::new(attach[v], v, best[v]));
        current = v;
    }

    edges
}

/// Union-find over dendrogram node ids. Each union mints a fresh node id.
struct UnionFind {
    parent: Vec<usize>,
    next_label: usize,
}

impl UnionFind {
    fn new(n_points: usize) -> Self {
        Self {
            parent: (0..2 * n_points - 1).collect(),
            next_label: n_points,
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut node = x;
        while self.parent[node] != root {
            let up = self.parent[node];
            self.parent[node] = root;
            node = up;
        }
        root
    }

    /// Join two roots under a new node and return its id.
    fn union(&mut self, a: usize, b: usize) -> usize {
        let label = self.next_label;
        self.parent[a] = label;
        self.parent[b] = label;
        self.next_label += 1;
        label
    }
}

/// Internal dendrogram node: the merge of two earlier nodes at `weight`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeNode {
    pub left: usize,
    pub right: usize,
    pub weight: f64,
    pub size: usize,
}

/// Binary merge tree over all points. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dendrogram {
    n_points: usize,
    merges: Vec<MergeNode>,
    mst: Vec<MutualReachabilityEdge>,
}

impl Dendrogram {
    /// MST plus merge tree for the given reachability graph.
    pub fn build(graph: &MutualReachabilityGraph) -> Result<Self> {
        let _span = tracing::info_span!("build_hierarchy", points = graph.n_points()).entered();
        let mst = minimum_spanning_tree(graph);
        Self::from_mst(graph.n_points(), mst)
    }

    /// Replay spanning-tree edges in order of increasing weight.
    ///
    /// Ties are broken by `(a, b)`. Fails if `edges` is not a spanning tree
    /// over `n_points` points.
    pub fn from_mst(n_points: usize, mut edges: Vec<MutualReachabilityEdge>) -> Result<Self> {
        if n_points == 0 {
            return Err(ClusterError::insufficient_data(1, 0));
        }
        if edges.len() != n_points - 1 {
            return Err(ClusterError::dimension_mismatch(n_points - 1, edges.len()));
        }

        edges.sort_by(|x, y| {
            x.weight
                .total_cmp(&y.weight)
                .then(x.a.cmp(&y.a))
                .then(x.b.cmp(&y.b))
        });

        let mut sizes = vec![1usize; n_points];
        let mut uf = UnionFind::new(n_points);
        let mut merges = Vec::with_capacity(n_points - 1);
        for edge in &edges {
            if edge.a >= n_points || edge.b >= n_points {
                return Err(ClusterError::invalid_input(
                    None,
                    format!("edge ({}, {}) references a point outside 0..{}", edge.a, edge.b, n_points),
                ));
            }
            let ra = uf.find(edge.a);
            let rb = uf.find(edge.b);
            if ra == rb {
                return Err(ClusterError::invalid_input(
                    None,
                    format!("edge ({}, {}) closes a cycle; not a spanning tree", edge.a, edge.b),
                ));
            }
            let (left, right) = if ra < rb { (ra, rb) } else { (rb, ra) };
            let size = sizes[left] + sizes[right];
            uf.union(ra, rb);
            sizes.push(size);
            merges.push(MergeNode {
                left,
                right,
                weight: edge.weight,
                size,
            });
        }

        debug!(
            merges = merges.len(),
            max_weight = merges.last().map(|m| m.weight).unwrap_or(0.0),
            "built dendrogram"
        );

        Ok(Self {
            n_points,
            merges,
            mst: edges,
        })
    }

    pub fn n_points(&self) -> usize {
        self.n_points
    }

    /// Points plus merges.
    pub fn node_count(&self) -> usize {
        self.n_points + self.merges.len()
    }

    /// The node spanning every point.
    pub fn root(&self) -> usize {
        self.node_count() - 1
    }

    #[inline]
    pub fn is_leaf(&self, node: usize) -> bool {
        node < self.n_points
    }

    pub fn merge(&self, node: usize) -> Option<&MergeNode> {
        node.checked_sub(self.n_points).and_then(|k| self.merges.get(k))
    }

    pub fn children(&self, node: usize) -> Option<(usize, usize)> {
        self.merge(node).map(|m| (m.left, m.right))
    }

    /// Merge weight of a node; 0 for points.
    pub fn weight(&self, node: usize) -> f64 {
        self.merge(node).map_or(0.0, |m| m.weight)
    }

    /// Number of points under a node.
    pub fn size(&self, node: usize) -> usize {
        self.merge(node).map_or(1, |m| m.size)
    }

    /// Merges in creation order (non-decreasing weight).
    pub fn merges(&self) -> &[MergeNode] {
        &self.merges
    }

    /// Spanning-tree edges sorted by weight.
    pub fn mst_edges(&self) -> &[MutualReachabilityEdge] {
        &self.mst
    }

    /// Points under `node`, in left-to-right order.
    pub fn leaves(&self, node: usize) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.size(node));
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            match self.children(current) {
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                None => out.push(current),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{DistanceEngine, DistanceMetric, NeighborSearch};
    use ndarray::{array, Array2};

    fn irregular_points() -> Array2<f64> {
        Array2::from_shape_fn((15, 2), |(i, j)| {
            ((i * 13 + j * 5) as f64 * 0.71).cos() * 3.0 + (i % 4) as f64 * (j as f64 + 0.5)
        })
    }

    fn dendrogram_for(points: &Array2<f64>, min_pts: usize) -> Dendrogram {
        let engine = DistanceEngine::new(points.view(), DistanceMetric::Euclidean).unwrap();
        let core = engine.core_distances(min_pts, NeighborSearch::BruteForce).unwrap();
        let graph = MutualReachabilityGraph::new(&engine, &core).unwrap();
        Dendrogram::build(&graph).unwrap()
    }

    #[test]
    fn test_mst_has_n_minus_one_edges_and_spans_all_points() {
        let points = irregular_points();
        let engine = DistanceEngine::new(points.view(), DistanceMetric::Euclidean).unwrap();
        let core = engine.core_distances(3, NeighborSearch::BruteForce).unwrap();
        let graph = MutualReachabilityGraph::new(&engine, &core).unwrap();
        let mst = minimum_spanning_tree(&graph);

        assert_eq!(mst.len(), points.nrows() - 1);

        let mut uf = UnionFind::new(points.nrows());
        for edge in &mst {
            let (ra, rb) = (uf.find(edge.a), uf.find(edge.b));
            assert_ne!(ra, rb, "MST must not contain a cycle");
            uf.union(ra, rb);
        }
        let root = uf.find(0);
        assert!((0..points.nrows()).all(|p| uf.find(p) == root), "MST must connect all points");
    }

    #[test]
    fn test_mst_weight_matches_kruskal() {
        let points = irregular_points();
        let engine = DistanceEngine::new(points.view(), DistanceMetric::Euclidean).unwrap();
        let core = engine.core_distances(4, NeighborSearch::BruteForce).unwrap();
        let graph = MutualReachabilityGraph::new(&engine, &core).unwrap();

        let prim_total: f64 = minimum_spanning_tree(&graph).iter().map(|e| e.weight).sum();

        let mut all: Vec<_> = graph.edges().collect();
        all.sort_by(|x, y| x.weight.total_cmp(&y.weight));
        let mut uf = UnionFind::new(points.nrows());
        let mut kruskal_total = 0.0;
        for edge in all {
            let (ra, rb) = (uf.find(edge.a), uf.find(edge.b));
            if ra != rb {
                uf.union(ra, rb);
                kruskal_total += edge.weight;
            }
        }
        assert!((prim_total - kruskal_total).abs() < 1e-9);
    }

    #[test]
    fn test_dendrogram_shape() {
        let points = irregular_points();
        let tree = dendrogram_for(&points, 3);
        let n = points.nrows();

        assert_eq!(tree.merges().len(), n - 1);
        assert_eq!(tree.root(), 2 * n - 2);
        assert_eq!(tree.size(tree.root()), n);

        let mut leaves = tree.leaves(tree.root());
        leaves.sort_unstable();
        assert_eq!(leaves, (0..n).collect::<Vec<_>>());

        for pair in tree.merges().windows(2) {
            assert!(pair[0].weight <= pair[1].weight);
        }
        for (k, merge) in tree.merges().iter().enumerate() {
            let node = n + k;
            assert!(merge.left < node && merge.right < node, "children precede parents");
            assert!(merge.left < merge.right);
            assert_eq!(merge.size, tree.size(merge.left) + tree.size(merge.right));
        }
    }

    #[test]
    fn test_from_mst_merges_in_weight_order() {
        // Path 0-1 (1.0), 1-2 (3.0), 2-3 (2.0)
        let edges = vec![
            MutualReachabilityEdge::new(1, 2, 3.0),
            MutualReachabilityEdge::new(0, 1, 1.0),
            MutualReachabilityEdge::new(2, 3, 2.0),
        ];
        let tree = Dendrogram::from_mst(4, edges).unwrap();
        let merges = tree.merges();
        assert_eq!((merges[0].left, merges[0].right, merges[0].weight), (0, 1, 1.0));
        assert_eq!((merges[1].left, merges[1].right, merges[1].weight), (2, 3, 2.0));
        assert_eq!((merges[2].left, merges[2].right, merges[2].weight), (4, 5, 3.0));
        assert_eq!(tree.leaves(6), vec![0, 1, 2, 3]);
        assert_eq!(tree.weight(0), 0.0);
        assert_eq!(tree.children(2), None);
    }

    #[test]
    fn test_from_mst_rejects_non_trees() {
        assert!(matches!(
            Dendrogram::from_mst(3, vec![MutualReachabilityEdge::new(0, 1, 1.0)]),
            Err(ClusterError::DimensionMismatch { .. })
        ));
        let cycle = vec![
            MutualReachabilityEdge::new(0, 1, 1.0),
            MutualReachabilityEdge::new(1, 0, 2.0),
        ];
        assert!(matches!(
            Dendrogram::from_mst(3, cycle),
            Err(ClusterError::InvalidInput { .. })
        ));
        assert!(Dendrogram::from_mst(0, vec![]).is_err());
    }

    #[test]
    fn test_single_point_dendrogram() {
        let points = array![[1.0, 2.0]];
        let tree = dendrogram_for(&points, 1);
        assert_eq!(tree.root(), 0);
        assert!(tree.is_leaf(tree.root()));
        assert!(tree.mst_edges().is_empty());
    }

    #[test]
    fn test_ties_are_deterministic() {
        // Square lattice: many equal distances
        let points = Array2::from_shape_fn((16, 2), |(i, j)| if j == 0 { (i % 4) as f64 } else { (i / 4) as f64 });
        let first = dendrogram_for(&points, 2);
        let second = dendrogram_for(&points, 2);
        assert_eq!(first, second);
    }
}
