//! Command-line interface definitions and argument parsing

use std::fs;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};

use crate::config::ClusterConfig;
use crate::distance::{DistanceMetric, NeighborSearch};
use crate::stability::ClusterSelectionMethod;

/// File format for the clustering report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One row per division
    #[default]
    Csv,
    /// Full report with cluster summaries and the run configuration
    Json,
}

/// Cluster municipal divisions by purchasing-card spending profile
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the transactions CSV (columns: division,date,amount,vendor,category)
    #[arg(short, long, default_value = "transactions.csv")]
    pub input: String,

    /// Where to write the report; nothing is written when omitted
    #[arg(short, long)]
    pub output: Option<String>,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Csv)]
    pub format: OutputFormat,

    /// JSON file with a base configuration; flags below override it
    #[arg(short, long)]
    pub config: Option<String>,

    /// Neighborhood size for core distances
    #[arg(long)]
    pub min_pts: Option<usize>,

    /// Minimum divisions for a genuine cluster
    #[arg(long)]
    pub min_cluster_size: Option<usize>,

    /// Distance between standardized profiles
    #[arg(long, value_enum)]
    pub metric: Option<DistanceMetric>,

    /// Nearest-neighbor backend for core distances
    #[arg(long, value_enum)]
    pub neighbor_search: Option<NeighborSearch>,

    /// Cluster extraction method
    #[arg(long, value_enum)]
    pub selection: Option<ClusterSelectionMethod>,

    /// First day of the analysis window (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Last day of the analysis window (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Divisions with fewer in-window transactions are excluded
    #[arg(long)]
    pub min_transactions: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Base configuration from `--config`, or the defaults
    pub fn load_base_config(&self) -> anyhow::Result<ClusterConfig> {
        match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {path}"))?;
                serde_json::from_str(&text).with_context(|| format!("invalid config file {path}"))
            }
            None => Ok(ClusterConfig::default()),
        }
    }

    /// Apply the explicit flags on top of `base`
    pub fn apply_overrides(&self, mut base: ClusterConfig) -> ClusterConfig {
        if let Some(min_pts) = self.min_pts {
            base.min_pts = min_pts;
        }
        if let Some(size) = self.min_cluster_size {
            base.min_cluster_size = size;
        }
        if let Some(metric) = self.metric {
            base.metric = metric;
        }
        if let Some(search) = self.neighbor_search {
            base.neighbor_search = search;
        }
        if let Some(selection) = self.selection {
            base.selection = selection;
        }
        if let Some(start) = self.start {
            base.window.start = Some(start);
        }
        if let Some(end) = self.end {
            base.window.end = Some(end);
        }
        if let Some(count) = self.min_transactions {
            base.min_transactions = count;
        }
        base
    }

    /// Final, validated run configuration
    pub fn cluster_config(&self) -> anyhow::Result<ClusterConfig> {
        let config = self.apply_overrides(self.load_base_config()?);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["pcard-cluster"]);
        assert_eq!(args.input, "transactions.csv");
        assert_eq!(args.format, OutputFormat::Csv);
        assert!(args.output.is_none());
        assert_eq!(args.cluster_config().unwrap(), ClusterConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "pcard-cluster",
            "--input",
            "cards.csv",
            "--min-pts",
            "3",
            "--min-cluster-size",
            "4",
            "--metric",
            "manhattan",
            "--neighbor-search",
            "ball-tree",
            "--selection",
            "leaf",
            "--start",
            "2023-01-01",
            "--end",
            "2023-12-31",
            "--min-transactions",
            "20",
            "--format",
            "json",
        ]);
        let config = args.cluster_config().unwrap();

        assert_eq!(config.min_pts, 3);
        assert_eq!(config.min_cluster_size, 4);
        assert_eq!(config.metric, DistanceMetric::Manhattan);
        assert_eq!(config.neighbor_search, NeighborSearch::BallTree);
        assert_eq!(config.selection, ClusterSelectionMethod::Leaf);
        assert_eq!(config.window.start, NaiveDate::from_ymd_opt(2023, 1, 1));
        assert_eq!(config.window.end, NaiveDate::from_ymd_opt(2023, 12, 31));
        assert_eq!(config.min_transactions, 20);
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_config_file_with_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"min_pts": 7, "metric": "chebyshev", "window": {{"start": "2022-07-01", "end": null}}}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let args = Args::parse_from(["pcard-cluster", "--config", path, "--min-pts", "4"]);
        let config = args.cluster_config().unwrap();

        assert_eq!(config.min_pts, 4);
        assert_eq!(config.metric, DistanceMetric::Chebyshev);
        assert_eq!(config.window.start, NaiveDate::from_ymd_opt(2022, 7, 1));
        assert_eq!(config.min_cluster_size, ClusterConfig::default().min_cluster_size);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let args = Args::parse_from(["pcard-cluster", "--min-cluster-size", "1"]);
        assert!(args.cluster_config().is_err());

        let args = Args::parse_from(["pcard-cluster", "--start", "2024-01-01", "--end", "2023-01-01"]);
        assert!(args.cluster_config().is_err());

        assert!(Args::try_parse_from(["pcard-cluster", "--start", "01/01/2024"]).is_err());
        assert!(Args::try_parse_from(["pcard-cluster", "--metric", "cosine"]).is_err());

        let args = Args::parse_from(["pcard-cluster", "--config", "/nonexistent/config.json"]);
        assert!(args.cluster_config().is_err());
    }
}
