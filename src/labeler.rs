//! Turns selected condensed clusters into per-point labels.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::stability::CondensedTree;

/// Label written for noise in tabular output.
pub const NOISE_ID: i64 = -1;

/// Cluster membership of one point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum ClusterLabel {
    Cluster(usize),
    Noise,
}

impl ClusterLabel {
    pub fn is_noise(&self) -> bool {
        matches!(self, ClusterLabel::Noise)
    }

    pub fn cluster_id(&self) -> Option<usize> {
        match self {
            ClusterLabel::Cluster(id) => Some(*id),
            ClusterLabel::Noise => None,
        }
    }
}

impl From<ClusterLabel> for i64 {
    fn from(label: ClusterLabel) -> Self {
        match label {
            ClusterLabel::Cluster(id) => id as i64,
            ClusterLabel::Noise => NOISE_ID,
        }
    }
}

impl TryFrom<i64> for ClusterLabel {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            NOISE_ID => Ok(ClusterLabel::Noise),
            id if id >= 0 => Ok(ClusterLabel::Cluster(id as usize)),
            other => Err(format!("invalid cluster label {other}")),
        }
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterLabel::Cluster(id) => write!(f, "{id}"),
            ClusterLabel::Noise => f.write_str("noise"),
        }
    }
}

/// Label and scores for one point, by point index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLabel {
    pub label: ClusterLabel,
    /// Membership strength in [0, 1]; 0 for noise
    pub confidence: f64,
    /// GLOSH outlier score in [0, 1]
    pub outlier_score: f64,
}

/// A selected cluster, by point index.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedCluster {
    pub cluster_id: usize,
    /// Index in the condensed tree
    pub condensed_id: usize,
    pub stability: f64,
    pub lambda_birth: f64,
    /// Member point indices, ascending
    pub members: Vec<usize>,
}

/// Labels for every point plus the clusters they belong to.
#[derive(Debug, Clone, PartialEq)]
pub struct Labeling {
    pub points: Vec<PointLabel>,
    pub clusters: Vec<SelectedCluster>,
}

/// Final per-division output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub division_id: String,
    #[serde(rename = "cluster")]
    pub label: ClusterLabel,
    pub confidence: f64,
    pub outlier_score: f64,
    /// Unstandardized profile, in the report's feature column order
    #[serde(default)]
    pub profile: Vec<f64>,
}

/// Description of one cluster in the final output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub size: usize,
    pub stability: f64,
    pub lambda_birth: f64,
    /// Member division ids, sorted
    pub members: Vec<String>,
}

impl Labeling {
    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn noise_count(&self) -> usize {
        self.points.iter().filter(|p| p.label.is_noise()).count()
    }

    /// Label vector with noise as [`NOISE_ID`].
    pub fn label_ids(&self) -> Vec<i64> {
        self.points.iter().map(|p| i64::from(p.label)).collect()
    }

    /// Attach division ids to point labels. `division_ids[i]` names point `i`.
    pub fn assignments(&self, division_ids: &[String]) -> Result<Vec<ClusterAssignment>> {
        self.check_ids(division_ids)?;
        let mut assignments: Vec<ClusterAssignment> = self
            .points
            .iter()
            .zip(division_ids)
            .map(|(point, id)| ClusterAssignment {
                division_id: id.clone(),
                label: point.label,
                confidence: point.confidence,
                outlier_score: point.outlier_score,
                profile: Vec::new(),
            })
            .collect();
        assignments.sort_by(|a, b| a.division_id.cmp(&b.division_id));
        Ok(assignments)
    }

    pub fn summaries(&self, division_ids: &[String]) -> Result<Vec<ClusterSummary>> {
        self.check_ids(division_ids)?;
        Ok(self
            .clusters
            .iter()
            .map(|cluster| {
                let mut members: Vec<String> = cluster
                    .members
                    .iter()
                    .map(|&p| division_ids[p].clone())
                    .collect();
                members.sort();
                ClusterSummary {
                    cluster_id: cluster.cluster_id,
                    size: cluster.members.len(),
                    stability: cluster.stability,
                    lambda_birth: cluster.lambda_birth,
                    members,
                }
            })
            .collect())
    }

    fn check_ids(&self, division_ids: &[String]) -> Result<()> {
        if division_ids.len() != self.points.len() {
            return Err(ClusterError::dimension_mismatch(self.points.len(), division_ids.len()));
        }
        Ok(())
    }
}

/// Assigns each point to the selected cluster that contains it.
pub struct ClusterLabeler<'t> {
    tree: &'t CondensedTree,
    selected: Vec<bool>,
}

impl<'t> ClusterLabeler<'t> {
    /// `selected` must be non-overlapping condensed cluster indices, as
    /// returned by [`CondensedTree::select`].
    pub fn new(tree: &'t CondensedTree, selected: &[usize]) -> Result<Self> {
        let mut flags = vec![false; tree.clusters().len()];
        for &id in selected {
            if id >= flags.len() {
                return Err(ClusterError::invalid_parameter(format!(
                    "selected cluster {id} is not in the condensed tree"
                )));
            }
            flags[id] = true;
        }
        Ok(Self {
            tree,
            selected: flags,
        })
    }

    pub fn label(&self) -> Labeling {
        let clusters = self.tree.clusters();

        // Selected cluster owning each condensed cluster; parents are stored first.
        let mut owner: Vec<Option<usize>> = vec![None; clusters.len()];
        for (id, cluster) in clusters.iter().enumerate() {
            owner[id] = if self.selected[id] {
                Some(id)
            } else {
                cluster.parent.and_then(|p| owner[p])
            };
        }

        let exits = self.tree.exits();
        let point_owner: Vec<Option<usize>> = exits.iter().map(|e| owner[e.cluster]).collect();

        // Dense ids in order of each cluster's smallest member
        let mut dense: BTreeMap<usize, usize> = BTreeMap::new();
        let mut order: Vec<usize> = Vec::new();
        for condensed in point_owner.iter().flatten() {
            if !dense.contains_key(condensed) {
                dense.insert(*condensed, order.len());
                order.push(*condensed);
            }
        }

        let mut best = vec![0.0f64; clusters.len()];
        for (exit, owner) in exits.iter().zip(&point_owner) {
            if let Some(c) = owner {
                best[*c] = best[*c].max(exit.lambda - clusters[*c].lambda_birth);
            }
        }

        let deaths = self.tree.max_lambdas();
        let points = exits
            .iter()
            .zip(&point_owner)
            .map(|(exit, owner)| {
                let death = deaths[exit.cluster];
                let outlier_score = if death > 0.0 {
                    ((death - exit.lambda) / death).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                match owner {
                    Some(c) => {
                        let persistence = exit.lambda - clusters[*c].lambda_birth;
                        let confidence = if best[*c] > 0.0 {
                            (persistence / best[*c]).clamp(0.0, 1.0)
                        } else {
                            1.0
                        };
                        PointLabel {
                            label: ClusterLabel::Cluster(dense[c]),
                            confidence,
                            outlier_score,
                        }
                    }
                    None => PointLabel {
                        label: ClusterLabel::Noise,
                        confidence: 0.0,
                        outlier_score,
                    },
                }
            })
            .collect();

        let clusters = order
            .iter()
            .enumerate()
            .map(|(cluster_id, &condensed)| SelectedCluster {
                cluster_id,
                condensed_id: condensed,
                stability: clusters[condensed].stability,
                lambda_birth: clusters[condensed].lambda_birth,
                members: point_owner
                    .iter()
                    .enumerate()
                    .filter(|(_, o)| **o == Some(condensed))
                    .map(|(p, _)| p)
                    .collect(),
            })
            .collect();

        Labeling { points, clusters }
    }
}
