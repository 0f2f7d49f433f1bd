//! Pairwise dissimilarity and core distances over feature vectors.

use clap::ValueEnum;
use linfa_nn::distance::{Distance, L1Dist, L2Dist, LInfDist};
use linfa_nn::{CommonNearestNeighbour, NearestNeighbour, NearestNeighbourIndex};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClusterError, Result};

/// Metric used between standardized feature vectors. All variants are true metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// L2 norm of the difference.
    #[default]
    Euclidean,
    /// L1 norm of the difference.
    Manhattan,
    /// L-infinity norm of the difference.
    Chebyshev,
}

impl DistanceMetric {
    #[inline]
    pub fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self {
            DistanceMetric::Euclidean => L2Dist.distance(a, b),
            DistanceMetric::Manhattan => L1Dist.distance(a, b),
            DistanceMetric::Chebyshev => LInfDist.distance(a, b),
        }
    }
}

/// Backend for k-nearest-neighbor queries.
///
/// Every backend yields the same core distances; the tree indexes only change
/// how neighbors are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NeighborSearch {
    /// Exhaustive scan of all pairs.
    #[default]
    BruteForce,
    /// linfa-nn KD-tree.
    KdTree,
    /// linfa-nn ball tree.
    BallTree,
}

/// Distance to each point's `min_pts`-th nearest neighbor, counting the point itself.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreDistances {
    min_pts: usize,
    values: Array1<f64>,
}

impl CoreDistances {
    pub fn min_pts(&self) -> usize {
        self.min_pts
    }

    #[inline]
    pub fn get(&self, point: usize) -> f64 {
        self.values[point]
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Distance computations over a fixed point set.
#[derive(Debug, Clone)]
pub struct DistanceEngine<'a> {
    points: ArrayView2<'a, f64>,
    metric: DistanceMetric,
}

impl<'a> DistanceEngine<'a> {
    /// Wrap a point matrix (one row per point). Every component must be finite.
    pub fn new(points: ArrayView2<'a, f64>, metric: DistanceMetric) -> Result<Self> {
        if let Some(((row, col), value)) = points.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ClusterError::invalid_input(
                Some(row),
                format!("feature {col} is {value}; all features must be finite"),
            ));
        }
        Ok(Self { points, metric })
    }

    pub fn n_points(&self) -> usize {
        self.points.nrows()
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Dissimilarity between points `a` and `b`.
    #[inline]
    pub fn distance(&self, a: usize, b: usize) -> f64 {
        if a == b {
            return 0.0;
        }
        self.metric.distance(self.points.row(a), self.points.row(b))
    }

    /// Core distance of every point for neighborhood size `min_pts`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if `min_pts` is 0 or exceeds the number of points.
    pub fn core_distances(&self, min_pts: usize, search: NeighborSearch) -> Result<CoreDistances> {
        let n = self.n_points();
        if min_pts == 0 || min_pts > n {
            return Err(ClusterError::invalid_parameter(format!(
                "min_pts must be in 1..={n} for {n} points, got {min_pts}"
            )));
        }

        let values = match search {
            NeighborSearch::BruteForce => self.brute_force_core_distances(min_pts),
            NeighborSearch::KdTree => self.indexed_core_distances(min_pts, CommonNearestNeighbour::KdTree)?,
            NeighborSearch::BallTree => {
                self.indexed_core_distances(min_pts, CommonNearestNeighbour::BallTree)?
            }
        };

        debug!(
            min_pts,
            ?search,
            min = values.iter().copied().fold(f64::INFINITY, f64::min),
            max = values.iter().copied().fold(0.0, f64::max),
            "computed core distances"
        );

        Ok(CoreDistances {
            min_pts,
            values: Array1::from(values),
        })
    }

    /// Core distance of a single point.
    pub fn core_distance(&self, point: usize, min_pts: usize) -> Result<f64> {
        let n = self.n_points();
        if point >= n {
            return Err(ClusterError::invalid_parameter(format!(
                "point {point} out of range for {n} points"
            )));
        }
        if min_pts == 0 || min_pts > n {
            return Err(ClusterError::invalid_parameter(format!(
                "min_pts must be in 1..={n} for {n} points, got {min_pts}"
            )));
        }
        Ok(self.kth_distance(point, min_pts))
    }

    fn kth_distance(&self, point: usize, k: usize) -> f64 {
        let mut distances: Vec<f64> = (0..self.n_points()).map(|j| self.distance(point, j)).collect();
        let (_, kth, _) = distances.select_nth_unstable_by(k - 1, f64::total_cmp);
        *kth
    }

    fn brute_force_core_distances(&self, min_pts: usize) -> Vec<f64> {
        (0..self.n_points())
            .into_par_iter()
            .map(|i| self.kth_distance(i, min_pts))
            .collect()
    }

    fn indexed_core_distances(&self, min_pts: usize, algo: CommonNearestNeighbour) -> Result<Vec<f64>> {
        let built = match self.metric {
            DistanceMetric::Euclidean => algo.from_batch(&self.points, L2Dist),
            DistanceMetric::Manhattan => algo.from_batch(&self.points, L1Dist),
            DistanceMetric::Chebyshev => algo.from_batch(&self.points, LInfDist),
        };
        let index: Box<dyn NearestNeighbourIndex<f64> + '_> = built.map_err(|e| {
            ClusterError::invalid_parameter(format!("cannot build neighbor index: {e}"))
        })?;

        (0..self.n_points())
            .map(|i| {
                let neighbours = index
                    .k_nearest(self.points.row(i), min_pts)
                    .map_err(|e| ClusterError::invalid_parameter(format!("neighbor query failed: {e}")))?;
                Ok(neighbours
                    .iter()
                    .map(|(_, j)| self.distance(i, *j))
                    .fold(0.0, f64::max))
            })
            .collect()
    }
}
