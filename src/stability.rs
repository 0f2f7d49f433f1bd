//! Condensed cluster tree, stability scores and cluster selection.
//!
//! The dendrogram is walked from the root. A split where both sides hold at
//! least `min_cluster_size` points creates two child clusters; a smaller side
//! is folded into its parent and its points fall out at the split's lambda
//! (`1 / weight`). Stability of a cluster is the sum over its points of
//! `lambda_fall - lambda_birth`, with child clusters contributing their whole
//! size at their birth lambda.

use std::collections::VecDeque;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hierarchy::Dendrogram;

/// Merge weights below this are treated as this value when taking `1 / weight`.
pub const MIN_MERGE_WEIGHT: f64 = 1e-12;

/// How clusters are extracted from the condensed tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ClusterSelectionMethod {
    /// Excess of Mass: keep a cluster unless its descendants are jointly more stable.
    #[default]
    Eom,
    /// Leaf clusters only - more granular clustering.
    Leaf,
}

impl ClusterSelectionMethod {
    pub fn description(&self) -> &'static str {
        match self {
            ClusterSelectionMethod::Eom => "Excess of Mass - most persistent non-overlapping clusters",
            ClusterSelectionMethod::Leaf => "Leaf clusters only - finest non-overlapping clusters",
        }
    }
}

/// Density threshold for a merge weight.
#[inline]
pub fn lambda(weight: f64) -> f64 {
    1.0 / weight.max(MIN_MERGE_WEIGHT)
}

/// A candidate cluster in the condensed tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondensedCluster {
    /// Parent cluster; `None` for the root
    pub parent: Option<usize>,
    /// Child clusters (0 or 2)
    pub children: Vec<usize>,
    /// Dendrogram node this cluster starts at
    pub node: usize,
    /// Lambda at which the cluster comes into existence (0 for the root)
    pub lambda_birth: f64,
    /// Points at birth
    pub size: usize,
    /// Excess of mass
    pub stability: f64,
}

/// Where a point leaves the condensed tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointExit {
    /// Innermost cluster holding the point
    pub cluster: usize,
    /// Lambda at which the point falls out of that cluster
    pub lambda: f64,
}

/// Condensed tree. Clusters are stored parents-before-children; index 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondensedTree {
    min_cluster_size: usize,
    clusters: Vec<CondensedCluster>,
    exits: Vec<PointExit>,
}

impl CondensedTree {
    pub fn build(dendrogram: &Dendrogram, min_cluster_size: usize) -> Self {
        let n = dendrogram.n_points();
        let mut clusters = vec![CondensedCluster {
            parent: None,
            children: Vec::new(),
            node: dendrogram.root(),
            lambda_birth: 0.0,
            size: n,
            stability: 0.0,
        }];
        let mut exits = vec![
            PointExit {
                cluster: 0,
                lambda: 0.0,
            };
            n
        ];

        // (dendrogram node, condensed cluster it belongs to)
        let mut queue = VecDeque::from([(dendrogram.root(), 0usize)]);
        while let Some((node, cluster)) = queue.pop_front() {
            let Some((left, right)) = dendrogram.children(node) else {
                // Only reached for a single-point tree: the point never separates.
                exits[node] = PointExit { cluster, lambda: 0.0 };
                continue;
            };
            let split_lambda = lambda(dendrogram.weight(node));
            let left_big = dendrogram.size(left) >= min_cluster_size;
            let right_big = dendrogram.size(right) >= min_cluster_size;

            if left_big && right_big {
                for child in [left, right] {
                    let id = clusters.len();
                    clusters.push(CondensedCluster {
                        parent: Some(cluster),
                        children: Vec::new(),
                        node: child,
                        lambda_birth: split_lambda,
                        size: dendrogram.size(child),
                        stability: 0.0,
                    });
                    clusters[cluster].children.push(id);
                    queue.push_back((child, id));
                }
                continue;
            }

            for (child, big) in [(left, left_big), (right, right_big)] {
                if big {
                    // The cluster carries on through its large side.
                    queue.push_back((child, cluster));
                } else {
                    for point in dendrogram.leaves(child) {
                        exits[point] = PointExit {
                            cluster,
                            lambda: split_lambda,
                        };
                    }
                }
            }
        }

        for exit in &exits {
            let birth = clusters[exit.cluster].lambda_birth;
            clusters[exit.cluster].stability += exit.lambda - birth;
        }
        for id in 1..clusters.len() {
            let (parent, birth, size) = {
                let c = &clusters[id];
                (c.parent.unwrap_or(0), c.lambda_birth, c.size)
            };
            let parent_birth = clusters[parent].lambda_birth;
            clusters[parent].stability += (birth - parent_birth) * size as f64;
        }

        debug!(
            clusters = clusters.len(),
            min_cluster_size, "condensed cluster tree"
        );

        Self {
            min_cluster_size,
            clusters,
            exits,
        }
    }

    pub fn min_cluster_size(&self) -> usize {
        self.min_cluster_size
    }

    pub fn clusters(&self) -> &[CondensedCluster] {
        &self.clusters
    }

    pub fn cluster(&self, id: usize) -> &CondensedCluster {
        &self.clusters[id]
    }

    pub fn exits(&self) -> &[PointExit] {
        &self.exits
    }

    pub fn n_points(&self) -> usize {
        self.exits.len()
    }

    /// Whether `ancestor` is `descendant` or lies above it.
    pub fn is_ancestor(&self, ancestor: usize, descendant: usize) -> bool {
        let mut current = Some(descendant);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.clusters[id].parent;
        }
        false
    }

    /// All clusters strictly below `id`.
    pub fn descendants(&self, id: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = self.clusters[id].children.clone();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.clusters[current].children.iter().copied());
        }
        out
    }

    /// Greatest fall-out lambda within each cluster and its descendants.
    pub fn max_lambdas(&self) -> Vec<f64> {
        let mut deaths = vec![0.0f64; self.clusters.len()];
        for exit in &self.exits {
            deaths[exit.cluster] = deaths[exit.cluster].max(exit.lambda);
        }
        for id in (1..self.clusters.len()).rev() {
            let parent = self.clusters[id].parent.unwrap_or(0);
            deaths[parent] = deaths[parent].max(deaths[id]);
        }
        deaths
    }

    /// Pick non-overlapping clusters. The root is never selected.
    ///
    /// Children are always stored after their parent, so a reverse scan visits
    /// children before parents and no recursion is needed.
    pub fn select(&self, method: ClusterSelectionMethod) -> Vec<usize> {
        let count = self.clusters.len();
        let mut selected = vec![false; count];

        match method {
            ClusterSelectionMethod::Leaf => {
                for id in 1..count {
                    selected[id] = self.clusters[id].children.is_empty();
                }
            }
            ClusterSelectionMethod::Eom => {
                let mut best: Vec<f64> = self.clusters.iter().map(|c| c.stability).collect();
                for id in (1..count).rev() {
                    let children = &self.clusters[id].children;
                    if children.is_empty() {
                        selected[id] = true;
                        continue;
                    }
                    let children_total: f64 = children.iter().map(|&c| best[c]).sum();
                    if children_total > self.clusters[id].stability {
                        best[id] = children_total;
                    } else {
                        selected[id] = true;
                        for descendant in self.descendants(id) {
                            selected[descendant] = false;
                        }
                    }
                }
            }
        }

        let chosen: Vec<usize> = (1..count).filter(|&id| selected[id]).collect();
        for &id in &chosen {
            debug!(
                cluster = id,
                size = self.clusters[id].size,
                stability = self.clusters[id].stability,
                "selected cluster"
            );
        }
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{DistanceEngine, DistanceMetric, NeighborSearch};
    use crate::reachability::{MutualReachabilityEdge, MutualReachabilityGraph};
    use ndarray::Array2;

    /// Three 10-point grids plus two far outliers.
    fn three_blobs_with_outliers() -> Array2<f64> {
        let mut rows = Vec::new();
        for (cx, cy) in [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)] {
            for i in 0..10 {
                rows.push([cx + 0.1 * (i % 5) as f64, cy + 0.1 * (i / 5) as f64]);
            }
        }
        rows.push([30.0, -20.0]);
        rows.push([-20.0, 30.0]);
        Array2::from_shape_fn((rows.len(), 2), |(i, j)| rows[i][j])
    }

    fn condensed(points: &Array2<f64>, min_pts: usize, min_cluster_size: usize) -> CondensedTree {
        let engine = DistanceEngine::new(points.view(), DistanceMetric::Euclidean).unwrap();
        let core = engine.core_distances(min_pts, NeighborSearch::BruteForce).unwrap();
        let graph = MutualReachabilityGraph::new(&engine, &core).unwrap();
        let dendrogram = Dendrogram::build(&graph).unwrap();
        CondensedTree::build(&dendrogram, min_cluster_size)
    }

    #[test]
    fn test_three_blobs_condense_into_nested_clusters() {
        let tree = condensed(&three_blobs_with_outliers(), 5, 5);
        // root, {blob, pair of blobs}, then the pair splits
        assert_eq!(tree.clusters().len(), 5);
        assert_eq!(tree.cluster(0).size, 32);
        let mut leaf_sizes: Vec<usize> = tree
            .clusters()
            .iter()
            .filter(|c| c.children.is_empty())
            .map(|c| c.size)
            .collect();
        leaf_sizes.sort_unstable();
        assert_eq!(leaf_sizes, vec![10, 10, 10]);

        // Outliers leave the root directly
        assert_eq!(tree.exits()[30].cluster, 0);
        assert_eq!(tree.exits()[31].cluster, 0);
    }

    #[test]
    fn test_children_stored_after_parents_with_later_birth() {
        let tree = condensed(&three_blobs_with_outliers(), 5, 5);
        for (id, cluster) in tree.clusters().iter().enumerate() {
            for &child in &cluster.children {
                assert!(child > id);
                assert!(tree.cluster(child).lambda_birth >= cluster.lambda_birth);
            }
            assert!(cluster.stability >= 0.0 && cluster.stability.is_finite());
        }
        for exit in tree.exits() {
            assert!(exit.lambda >= tree.cluster(exit.cluster).lambda_birth);
        }
    }

    #[test]
    fn test_stability_by_hand() {
        // Two pairs far apart: 0-1 at 1.0, 2-3 at 1.0, pairs join at 4.0
        let edges = vec![
            MutualReachabilityEdge::new(0, 1, 1.0),
            MutualReachabilityEdge::new(2, 3, 1.0),
            MutualReachabilityEdge::new(1, 2, 4.0),
        ];
        let dendrogram = Dendrogram::from_mst(4, edges).unwrap();
        let tree = CondensedTree::build(&dendrogram, 2);

        assert_eq!(tree.clusters().len(), 3);
        let child = tree.cluster(1);
        assert_eq!(child.lambda_birth, 0.25);
        // Each point falls out at lambda 1.0: 2 * (1.0 - 0.25)
        assert!((child.stability - 1.5).abs() < 1e-12);
        // Root: both children born at 0.25 with 2 points each
        assert!((tree.cluster(0).stability - 1.0).abs() < 1e-12);

        let selected = tree.select(ClusterSelectionMethod::Eom);
        assert_eq!(selected, vec![1, 2]);
    }

    #[test]
    fn test_eom_prefers_parent_when_children_are_fragile() {
        // Two pairs that split just before the group would dissolve: the
        // parent cluster is far more persistent than its children.
        let edges = vec![
            MutualReachabilityEdge::new(0, 1, 0.1),
            MutualReachabilityEdge::new(2, 3, 0.1),
            MutualReachabilityEdge::new(1, 2, 0.11),
            MutualReachabilityEdge::new(4, 5, 0.1),
            MutualReachabilityEdge::new(3, 4, 10.0),
        ];
        let dendrogram = Dendrogram::from_mst(6, edges).unwrap();
        let tree = CondensedTree::build(&dendrogram, 2);

        let selected = tree.select(ClusterSelectionMethod::Eom);
        let sizes: Vec<usize> = selected.iter().map(|&id| tree.cluster(id).size).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 6);
        assert!(sizes.contains(&4), "the 4-point group should win over its halves: {:?}", sizes);

        let leaves = tree.select(ClusterSelectionMethod::Leaf);
        let leaf_sizes: Vec<usize> = leaves.iter().map(|&id| tree.cluster(id).size).collect();
        assert_eq!(leaf_sizes.len(), 3);
        assert!(leaf_sizes.iter().all(|&s| s == 2));
    }

    #[test]
    fn test_selection_is_a_valid_partition() {
        let points = three_blobs_with_outliers();
        for method in [ClusterSelectionMethod::Eom, ClusterSelectionMethod::Leaf] {
            for mcs in [2, 3, 5, 8] {
                let tree = condensed(&points, 3, mcs);
                let selected = tree.select(method);
                for &a in &selected {
                    for &b in &selected {
                        if a != b {
                            assert!(!tree.is_ancestor(a, b), "{} is an ancestor of {}", a, b);
                        }
                    }
                }
                let total: usize = selected.iter().map(|&id| tree.cluster(id).size).sum();
                assert!(total <= points.nrows());
            }
        }
    }

    #[test]
    fn test_min_cluster_size_above_population_selects_nothing() {
        let tree = condensed(&three_blobs_with_outliers(), 5, 33);
        assert_eq!(tree.clusters().len(), 1);
        assert!(tree.select(ClusterSelectionMethod::Eom).is_empty());
        assert!(tree.select(ClusterSelectionMethod::Leaf).is_empty());
    }

    #[test]
    fn test_duplicate_points_keep_finite_stability() {
        let points = Array2::from_shape_fn((8, 2), |(i, _)| if i < 4 { 0.0 } else { 5.0 });
        let tree = condensed(&points, 2, 2);
        for cluster in tree.clusters() {
            assert!(cluster.stability.is_finite());
        }
        assert_eq!(tree.select(ClusterSelectionMethod::Eom).len(), 2);
    }

    #[test]
    fn test_max_lambdas_propagate_upward() {
        let tree = condensed(&three_blobs_with_outliers(), 5, 5);
        let deaths = tree.max_lambdas();
        for (id, cluster) in tree.clusters().iter().enumerate() {
            for &child in &cluster.children {
                assert!(deaths[id] >= deaths[child]);
            }
        }
    }
}
