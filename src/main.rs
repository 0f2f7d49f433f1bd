//! pcard-cluster: groups municipal divisions by purchasing-card spending
//!
//! Entrypoint that loads transactions, runs the clustering pipeline, prints a
//! summary and writes the report.

use anyhow::{Context, Result};
use clap::Parser;
use pcard_cluster::logging::configure_logging;
use pcard_cluster::{
    load_transactions, validate_transactions, write_report_csv, write_report_json, Args,
    ClusteringPipeline, ClusteringReport, OutputFormat,
};
use std::time::Instant;

fn main() -> Result<()> {
    let args = Args::parse();
    configure_logging(args.verbose)?;

    if args.verbose {
        println!("pcard-cluster - Division spending profiles by density clustering");
        println!("=================================================================\n");
    }

    let config = args.cluster_config()?;
    println!("=== Clustering Pipeline ===\n");
    let start_time = Instant::now();

    // Step 1: Load and validate transactions
    if args.verbose {
        println!("Step 1: Loading transactions");
        println!("  Input file: {}", args.input);
    }
    let load_start = Instant::now();
    let rows = load_transactions(&args.input)?;
    let records = validate_transactions(rows).context("transaction data failed validation")?;
    println!("✓ Data loaded: {} transactions", records.len());
    if args.verbose {
        println!("  Loading time: {:.2}s", load_start.elapsed().as_secs_f64());
    }

    // Step 2: Profile and cluster
    if args.verbose {
        println!("\nStep 2: Clustering divisions");
        println!("  min_pts: {}", config.min_pts);
        println!("  min_cluster_size: {}", config.min_cluster_size);
        println!("  Metric: {:?}", config.metric);
        println!("  Selection: {}", config.selection.description());
    }
    let cluster_start = Instant::now();
    let report = ClusteringPipeline::new(config)
        .run(&records)
        .context("clustering failed")?;
    println!("✓ Clustering complete");
    if args.verbose {
        println!("  Clustering time: {:.2}s", cluster_start.elapsed().as_secs_f64());
        println!("  Profile columns: {}", report.feature_names.len());
    }

    print_summary(&report);

    // Step 3: Write the report
    if let Some(output) = &args.output {
        match args.format {
            OutputFormat::Csv => write_report_csv(&report, output)?,
            OutputFormat::Json => write_report_json(&report, output)?,
        }
        println!("\nReport saved to: {}", output);
    }

    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(())
}

fn print_summary(report: &ClusteringReport) {
    let clustered = report.assignments.len();

    println!("\n=== Cluster Statistics ===");
    if report.is_all_noise() {
        println!("No cluster reached the minimum size; all {} divisions are noise", clustered);
    }
    for cluster in &report.clusters {
        let percentage = (cluster.size as f64 / clustered as f64) * 100.0;
        println!(
            "Cluster {}: {} divisions ({:.1}%), stability {:.3}",
            cluster.cluster_id, cluster.size, percentage, cluster.stability
        );
    }
    println!("Noise: {} divisions", report.noise_count());

    if !report.excluded.is_empty() {
        println!("\nExcluded divisions:");
        for excluded in &report.excluded {
            println!("  {}: {}", excluded.division_id, excluded.reason());
        }
    }
}
