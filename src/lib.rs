//! pcard-cluster: density-based clustering of municipal divisions by
//! purchasing-card spending profile
//!
//! Transactions are aggregated into one standardized profile per division,
//! then grouped with an HDBSCAN-style hierarchy: core distances, mutual
//! reachability, a minimum spanning tree, a condensed cluster tree and
//! stability-based cluster selection. Divisions that fit no cluster are noise.

pub mod cli;
pub mod config;
pub mod data;
pub mod distance;
pub mod error;
pub mod hierarchy;
pub mod labeler;
pub mod logging;
pub mod pipeline;
pub mod profile;
pub mod reachability;
pub mod stability;
pub mod transaction;

// Re-export public items for easier access
pub use cli::{Args, OutputFormat};
pub use config::{AnalysisWindow, ClusterConfig};
pub use data::{load_transactions, write_report_csv, write_report_json};
pub use distance::{CoreDistances, DistanceEngine, DistanceMetric, NeighborSearch};
pub use error::{ClusterError, Result};
pub use hierarchy::{minimum_spanning_tree, Dendrogram};
pub use labeler::{ClusterAssignment, ClusterLabel, ClusterLabeler, ClusterSummary};
pub use pipeline::{ClusterFit, ClusteringPipeline, ClusteringReport, DensityClusterer, DivisionRecord};
pub use profile::{ExcludedDivision, FeatureMatrix, FeatureProfileBuilder, ProfileFeature, StandardScaler};
pub use reachability::{MutualReachabilityEdge, MutualReachabilityGraph, ReachabilityEdges};
pub use stability::{ClusterSelectionMethod, CondensedTree};
pub use transaction::{validate_transactions, RawTransaction, TransactionRecord};
