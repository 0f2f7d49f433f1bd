//! Run configuration for profile construction and density clustering.
//!
//! A [`ClusterConfig`] is an immutable value handed to every stage. Nothing is
//! read from process-wide state, so several runs with different parameters
//! can execute side by side.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::distance::{DistanceMetric, NeighborSearch};
use crate::error::{ClusterError, Result};
use crate::profile::ProfileFeature;
use crate::stability::ClusterSelectionMethod;

/// Default neighborhood size used for core distances.
pub const DEFAULT_MIN_PTS: usize = 5;

/// Default minimum number of points for a genuine cluster.
pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 5;

/// Default minimum in-window transactions for a division to be profiled.
pub const DEFAULT_MIN_TRANSACTIONS: usize = 10;

/// Inclusive date bounds for aggregation. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    /// First day included, or unbounded
    pub start: Option<NaiveDate>,
    /// Last day included, or unbounded
    pub end: Option<NaiveDate>,
}

impl AnalysisWindow {
    /// Window covering every date.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Window between two inclusive bounds.
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Whether `date` falls inside the window.
    #[inline]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }

    /// Fails when the start bound lies after the end bound.
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(ClusterError::invalid_parameter(format!(
                    "analysis window start ({start}) is after its end ({end})"
                )));
            }
        }
        Ok(())
    }
}

/// Parameters for a full clustering run.
///
/// Builder methods never clamp values; call [`ClusterConfig::validate`] to
/// check them.
///
/// # Example
///
/// ```
/// use pcard_cluster::config::ClusterConfig;
/// use pcard_cluster::distance::DistanceMetric;
///
/// let config = ClusterConfig::default()
///     .with_min_pts(4)
///     .with_min_cluster_size(3)
///     .with_metric(DistanceMetric::Manhattan);
/// assert!(config.validate().is_ok());
/// assert!(config.validate_population(3).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Neighborhood size for core distances, counting the point itself.
    pub min_pts: usize,

    /// Minimum number of points for a node to count as a genuine cluster.
    pub min_cluster_size: usize,

    /// Dissimilarity between feature vectors.
    pub metric: DistanceMetric,

    /// Nearest-neighbor backend used for core distances.
    pub neighbor_search: NeighborSearch,

    /// How clusters are extracted from the condensed tree.
    pub selection: ClusterSelectionMethod,

    /// Date bounds applied before aggregation.
    pub window: AnalysisWindow,

    /// Divisions with fewer in-window transactions are excluded.
    pub min_transactions: usize,

    /// Profile features, in column order.
    pub features: Vec<ProfileFeature>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_pts: DEFAULT_MIN_PTS,
            min_cluster_size: DEFAULT_MIN_CLUSTER_SIZE,
            metric: DistanceMetric::default(),
            neighbor_search: NeighborSearch::default(),
            selection: ClusterSelectionMethod::default(),
            window: AnalysisWindow::unbounded(),
            min_transactions: DEFAULT_MIN_TRANSACTIONS,
            features: ProfileFeature::all().to_vec(),
        }
    }
}

impl ClusterConfig {
    /// Set the core-distance neighborhood size.
    #[must_use]
    pub fn with_min_pts(mut self, min_pts: usize) -> Self {
        self.min_pts = min_pts;
        self
    }

    /// Set the minimum cluster size.
    #[must_use]
    pub fn with_min_cluster_size(mut self, size: usize) -> Self {
        self.min_cluster_size = size;
        self
    }

    /// Set the distance metric.
    #[must_use]
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Set the nearest-neighbor backend.
    #[must_use]
    pub fn with_neighbor_search(mut self, search: NeighborSearch) -> Self {
        self.neighbor_search = search;
        self
    }

    /// Set the cluster selection method.
    #[must_use]
    pub fn with_selection(mut self, selection: ClusterSelectionMethod) -> Self {
        self.selection = selection;
        self
    }

    /// Set the analysis window.
    #[must_use]
    pub fn with_window(mut self, window: AnalysisWindow) -> Self {
        self.window = window;
        self
    }

    /// Set the minimum activity threshold.
    #[must_use]
    pub fn with_min_transactions(mut self, count: usize) -> Self {
        self.min_transactions = count;
        self
    }

    /// Replace the profile feature set.
    #[must_use]
    pub fn with_features(mut self, features: Vec<ProfileFeature>) -> Self {
        self.features = features;
        self
    }

    /// Validate parameters that do not depend on the data.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InvalidParameter` if:
    /// - min_pts < 1
    /// - min_cluster_size < 2
    /// - min_transactions < 1
    /// - the window is inverted
    /// - the feature list is empty or repeats a feature
    pub fn validate(&self) -> Result<()> {
        if self.min_pts < 1 {
            return Err(ClusterError::invalid_parameter(format!(
                "min_pts must be >= 1, got {}",
                self.min_pts
            )));
        }

        if self.min_cluster_size < 2 {
            return Err(ClusterError::invalid_parameter(format!(
                "min_cluster_size must be >= 2, got {}. A cluster needs at least 2 points.",
                self.min_cluster_size
            )));
        }

        if self.min_transactions < 1 {
            return Err(ClusterError::invalid_parameter(
                "min_transactions must be >= 1",
            ));
        }

        self.window.validate()?;

        if self.features.is_empty() {
            return Err(ClusterError::invalid_parameter(
                "feature list must name at least one profile feature",
            ));
        }
        for (i, feature) in self.features.iter().enumerate() {
            if self.features[..i].contains(feature) {
                return Err(ClusterError::invalid_parameter(format!(
                    "feature {:?} is listed more than once",
                    feature
                )));
            }
        }

        Ok(())
    }

    /// Check the parameters against the number of points to be clustered.
    ///
    /// `min_cluster_size` above the population is allowed; such a run ends
    /// with every point labeled noise.
    pub fn validate_population(&self, n_points: usize) -> Result<()> {
        if self.min_pts > n_points {
            return Err(ClusterError::invalid_parameter(format!(
                "min_pts ({}) exceeds the number of clusterable divisions ({})",
                self.min_pts, n_points
            )));
        }
        Ok(())
    }
}
