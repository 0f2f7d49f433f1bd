//! End-to-end clustering: transactions to profiles to labeled divisions.
//!
//! [`DensityClusterer`] works on any standardized feature matrix.
//! [`ClusteringPipeline`] adds profile construction and division bookkeeping
//! on top of it.

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ClusterConfig;
use crate::distance::DistanceEngine;
use crate::error::{ClusterError, Result};
use crate::hierarchy::Dendrogram;
use crate::labeler::{ClusterAssignment, ClusterLabeler, ClusterSummary, Labeling, NOISE_ID};
use crate::profile::{ExcludedDivision, FeatureProfileBuilder};
use crate::reachability::{MutualReachabilityEdge, MutualReachabilityGraph};
use crate::stability::CondensedTree;
use crate::transaction::{validate_transactions, RawTransaction, TransactionRecord};

/// Everything a clustering fit produces, indexed by matrix row.
#[derive(Debug, Clone)]
pub struct ClusterFit {
    pub core_distances: Array1<f64>,
    /// Minimum spanning tree of the mutual reachability graph
    pub mst: Vec<MutualReachabilityEdge>,
    pub condensed: CondensedTree,
    /// Condensed cluster indices that were selected
    pub selected: Vec<usize>,
    pub labeling: Labeling,
}

impl ClusterFit {
    pub fn n_clusters(&self) -> usize {
        self.labeling.n_clusters()
    }

    pub fn noise_count(&self) -> usize {
        self.labeling.noise_count()
    }

    /// Label per row, noise as -1.
    pub fn labels(&self) -> Vec<i64> {
        self.labeling.label_ids()
    }
}

/// HDBSCAN-style clusterer over rows of a feature matrix.
#[derive(Debug, Clone)]
pub struct DensityClusterer {
    config: ClusterConfig,
}

impl DensityClusterer {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Cluster the rows of `features`.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` when the configuration is invalid or `min_pts`
    ///   exceeds the number of rows; raised before any distance is computed
    /// - `InsufficientData` for an empty matrix
    /// - `InvalidInput` for non-finite features
    pub fn fit(&self, features: ArrayView2<f64>) -> Result<ClusterFit> {
        self.config.validate()?;
        let n = features.nrows();
        if n == 0 {
            return Err(ClusterError::insufficient_data(1, 0));
        }
        self.config.validate_population(n)?;

        let _span = tracing::info_span!("density_clustering", points = n, dims = features.ncols()).entered();

        let engine = DistanceEngine::new(features, self.config.metric)?;
        let core = engine.core_distances(self.config.min_pts, self.config.neighbor_search)?;
        let graph = MutualReachabilityGraph::new(&engine, &core)?;
        let dendrogram = Dendrogram::build(&graph)?;

        let condensed = CondensedTree::build(&dendrogram, self.config.min_cluster_size);
        let selected = condensed.select(self.config.selection);
        let labeling = ClusterLabeler::new(&condensed, &selected)?.label();

        info!(
            clusters = labeling.n_clusters(),
            noise = labeling.noise_count(),
            selection = ?self.config.selection,
            "clusters selected"
        );
        if labeling.n_clusters() == 0 {
            warn!(
                points = n,
                min_cluster_size = self.config.min_cluster_size,
                "no cluster reached the minimum size; every point is noise"
            );
        }

        Ok(ClusterFit {
            core_distances: core.values().clone(),
            mst: dendrogram.mst_edges().to_vec(),
            condensed,
            selected,
            labeling,
        })
    }
}

/// One row of the flat output contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivisionRecord {
    pub division_id: String,
    /// Dense cluster id, or -1 for noise and excluded divisions
    pub cluster_id: i64,
    pub confidence: f64,
    /// Not computed for excluded divisions
    pub outlier_score: Option<f64>,
    pub excluded: bool,
    /// Raw feature values; absent for excluded divisions
    pub profile: Option<Vec<f64>>,
}

/// Result of a full run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringReport {
    pub feature_names: Vec<String>,
    /// One per clustered division, sorted by division id
    pub assignments: Vec<ClusterAssignment>,
    /// Divisions left out for insufficient data, sorted by division id
    pub excluded: Vec<ExcludedDivision>,
    pub clusters: Vec<ClusterSummary>,
    pub config: ClusterConfig,
}

impl ClusteringReport {
    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn noise_count(&self) -> usize {
        self.assignments.iter().filter(|a| a.label.is_noise()).count()
    }

    /// True when no cluster was selected. A valid outcome, not an error.
    pub fn is_all_noise(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Flat records for every division, clustered or excluded, sorted by division id.
    pub fn records(&self) -> Vec<DivisionRecord> {
        let mut records: Vec<DivisionRecord> = self
            .assignments
            .iter()
            .map(|a| DivisionRecord {
                division_id: a.division_id.clone(),
                cluster_id: i64::from(a.label),
                confidence: a.confidence,
                outlier_score: Some(a.outlier_score),
                excluded: false,
                profile: Some(a.profile.clone()),
            })
            .chain(self.excluded.iter().map(|e| DivisionRecord {
                division_id: e.division_id.clone(),
                cluster_id: NOISE_ID,
                confidence: 0.0,
                outlier_score: None,
                excluded: true,
                profile: None,
            }))
            .collect();
        records.sort_by(|a, b| a.division_id.cmp(&b.division_id));
        records
    }
}

/// Runs profile construction and clustering with one immutable configuration.
#[derive(Debug, Clone)]
pub struct ClusteringPipeline {
    config: ClusterConfig,
}

impl ClusteringPipeline {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Cluster divisions by spending profile.
    ///
    /// Divisions below the activity threshold are reported in
    /// [`ClusteringReport::excluded`]; every other division gets an assignment.
    pub fn run(&self, records: &[TransactionRecord]) -> Result<ClusteringReport> {
        self.config.validate()?;
        let _span = tracing::info_span!("clustering_pipeline", records = records.len()).entered();

        let matrix = FeatureProfileBuilder::new(&self.config).build(records)?;
        self.config.validate_population(matrix.len())?;

        let fit = DensityClusterer::new(&self.config).fit(matrix.features.view())?;
        let mut assignments = fit.labeling.assignments(&matrix.division_ids)?;
        for assignment in &mut assignments {
            assignment.profile = matrix.raw_profile(&assignment.division_id).unwrap_or_default();
        }
        let clusters = fit.labeling.summaries(&matrix.division_ids)?;

        Ok(ClusteringReport {
            feature_names: matrix.feature_names,
            assignments,
            excluded: matrix.excluded,
            clusters,
            config: self.config.clone(),
        })
    }

    /// Validate raw rows, then [`run`](Self::run).
    pub fn run_raw(&self, rows: Vec<RawTransaction>) -> Result<ClusteringReport> {
        let records = validate_transactions(rows)?;
        self.run(&records)
    }
}
