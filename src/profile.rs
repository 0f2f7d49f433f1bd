//! Division spending profiles built from transaction records.
//!
//! Each division's in-window transactions are aggregated into one fixed-length
//! feature row with polars group-by expressions. Columns are then standardized
//! across the division population so that no raw-dollar feature dominates
//! distance computation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Datelike;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AnalysisWindow, ClusterConfig};
use crate::error::{ClusterError, Result};
use crate::transaction::TransactionRecord;

/// Feature families available to a profile. Some expand to several columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileFeature {
    TotalSpend,
    TransactionCount,
    AverageAmount,
    AmountStdDev,
    /// Coefficient of variation of the mean amount per year-month.
    MonthlyCv,
    /// Coefficient of variation of the mean amount per year-quarter.
    QuarterlyCv,
    VendorDiversity,
    CategoryCount,
    /// Skewness of the category-rank frequency distribution.
    CategorySkew,
    /// Excess kurtosis of the category-rank frequency distribution.
    CategoryKurtosis,
    /// One column per category seen in the population: share of transactions.
    CategoryShares,
    /// Four columns: share of spend per calendar quarter.
    SeasonalShares,
}

impl ProfileFeature {
    /// Every feature, in default column order.
    pub fn all() -> &'static [ProfileFeature] {
        &[
            ProfileFeature::TotalSpend,
            ProfileFeature::TransactionCount,
            ProfileFeature::AverageAmount,
            ProfileFeature::AmountStdDev,
            ProfileFeature::MonthlyCv,
            ProfileFeature::QuarterlyCv,
            ProfileFeature::VendorDiversity,
            ProfileFeature::CategoryCount,
            ProfileFeature::CategorySkew,
            ProfileFeature::CategoryKurtosis,
            ProfileFeature::CategoryShares,
            ProfileFeature::SeasonalShares,
        ]
    }

    /// Column of the per-division summary frame holding a single-valued feature.
    fn summary_column(&self) -> Option<&'static str> {
        match self {
            ProfileFeature::TotalSpend => Some("total_spend"),
            ProfileFeature::TransactionCount => Some("transaction_count"),
            ProfileFeature::AverageAmount => Some("average_amount"),
            ProfileFeature::AmountStdDev => Some("amount_stdev"),
            ProfileFeature::MonthlyCv => Some("monthly_average_cv"),
            ProfileFeature::QuarterlyCv => Some("quarterly_average_cv"),
            ProfileFeature::VendorDiversity => Some("distinct_vendors"),
            ProfileFeature::CategoryCount => Some("distinct_categories"),
            ProfileFeature::CategorySkew => Some("category_rank_skew"),
            ProfileFeature::CategoryKurtosis => Some("category_rank_kurtosis"),
            ProfileFeature::CategoryShares | ProfileFeature::SeasonalShares => None,
        }
    }

    fn column_names(&self, categories: &[String]) -> Vec<String> {
        match self {
            ProfileFeature::CategoryShares => categories
                .iter()
                .map(|c| format!("category_share:{c}"))
                .collect(),
            ProfileFeature::SeasonalShares => (1..=4).map(|q| format!("seasonal_share:q{q}")).collect(),
            scalar => scalar.summary_column().map(str::to_string).into_iter().collect(),
        }
    }
}

/// A division left out of clustering because its history is too thin.
///
/// Converts into [`ClusterError::InsufficientData`] for callers that treat a
/// missing division as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedDivision {
    pub division_id: String,
    /// In-window transactions found
    pub transactions: usize,
    /// Configured minimum
    pub required: usize,
}

impl ExcludedDivision {
    /// Why the division was left out, as the run-level error it would be.
    pub fn reason(&self) -> ClusterError {
        ClusterError::from(self)
    }
}

impl From<&ExcludedDivision> for ClusterError {
    fn from(excluded: &ExcludedDivision) -> Self {
        ClusterError::insufficient_data(excluded.required, excluded.transactions)
    }
}

/// Per-column standardization to zero mean and unit (population) variance.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub means: Array1<f64>,
    pub stds: Array1<f64>,
}

impl StandardScaler {
    /// Fit column statistics. An empty matrix yields an identity scaler.
    pub fn fit(data: &ArrayView2<f64>) -> Self {
        let n_features = data.ncols();
        match data.mean_axis(Axis(0)) {
            Some(means) if data.nrows() > 0 => Self {
                stds: data.std_axis(Axis(0), 0.0),
                means,
            },
            _ => Self {
                means: Array1::zeros(n_features),
                stds: Array1::ones(n_features),
            },
        }
    }

    /// Standardize rows. Constant columns map to 0.
    pub fn transform(&self, data: &ArrayView2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.means.len() {
            return Err(ClusterError::dimension_mismatch(self.means.len(), data.ncols()));
        }

        let mut scaled = data.to_owned();
        for (mut column, (&mean, &std)) in scaled
            .axis_iter_mut(Axis(1))
            .zip(self.means.iter().zip(self.stds.iter()))
        {
            if std > f64::EPSILON * mean.abs().max(1.0) {
                column.mapv_inplace(|x| (x - mean) / std);
            } else {
                column.fill(0.0);
            }
        }
        Ok(scaled)
    }
}

/// Standardized feature rows, one per clusterable division.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    /// Division ids, sorted; row `i` of every matrix belongs to `division_ids[i]`
    pub division_ids: Vec<String>,
    /// Column names, fixed for the run
    pub feature_names: Vec<String>,
    /// Standardized features (n_divisions, d)
    pub features: Array2<f64>,
    /// Features before standardization, carried into the report
    pub raw_features: Array2<f64>,
    /// Divisions below the activity threshold, sorted by id
    pub excluded: Vec<ExcludedDivision>,
}

impl FeatureMatrix {
    /// Number of clusterable divisions.
    pub fn len(&self) -> usize {
        self.division_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.division_ids.is_empty()
    }

    /// Feature dimensionality.
    pub fn dim(&self) -> usize {
        self.feature_names.len()
    }

    /// Unstandardized profile of `division_id`, if it was clustered.
    pub fn raw_profile(&self, division_id: &str) -> Option<Vec<f64>> {
        let row = self.division_ids.iter().position(|id| id == division_id)?;
        Some(self.raw_features.row(row).to_vec())
    }
}

/// Aggregates transactions into per-division feature vectors.
#[derive(Debug, Clone)]
pub struct FeatureProfileBuilder {
    window: AnalysisWindow,
    min_transactions: usize,
    features: Vec<ProfileFeature>,
}

impl FeatureProfileBuilder {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            window: config.window,
            min_transactions: config.min_transactions,
            features: config.features.clone(),
        }
    }

    /// Build one standardized feature vector per division with enough history.
    ///
    /// Deterministic: divisions, categories and columns are all ordered.
    pub fn build(&self, records: &[TransactionRecord]) -> Result<FeatureMatrix> {
        let _span = tracing::info_span!("build_profiles", records = records.len()).entered();

        // Divisions with no in-window activity are still reported as excluded
        let divisions: BTreeSet<&str> = records.iter().map(|r| r.division_id()).collect();

        let in_window = transactions_frame(records)?
            .lazy()
            .filter(window_predicate(&self.window))
            .collect()?;
        let aggregates = DivisionAggregates::compute(&in_window)?;

        let mut included = Vec::new();
        let mut excluded = Vec::new();
        for division in divisions {
            let transactions = aggregates.transactions(division);
            if transactions < self.min_transactions {
                warn!(
                    division,
                    transactions,
                    required = self.min_transactions,
                    "excluding division with insufficient data"
                );
                excluded.push(ExcludedDivision {
                    division_id: division.to_string(),
                    transactions,
                    required: self.min_transactions,
                });
            } else {
                included.push(division);
            }
        }

        let categories: Vec<String> = if self.features.contains(&ProfileFeature::CategoryShares) {
            included
                .iter()
                .filter_map(|division| aggregates.category_counts.get(*division))
                .flat_map(|counts| counts.keys())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let feature_names: Vec<String> = self
            .features
            .iter()
            .flat_map(|f| f.column_names(&categories))
            .collect();
        let d = feature_names.len();

        let mut raw = Vec::with_capacity(included.len() * d);
        for division in &included {
            let row = self.profile_row(division, &aggregates, &categories);
            debug_assert_eq!(row.len(), d);
            if let Some(pos) = row.iter().position(|v| !v.is_finite()) {
                return Err(ClusterError::invalid_input(
                    None,
                    format!(
                        "feature '{}' for division '{}' is not finite",
                        feature_names[pos], division
                    ),
                ));
            }
            raw.extend(row);
        }

        let raw_features = Array2::from_shape_vec((included.len(), d), raw)
            .map_err(|e| ClusterError::invalid_input(None, e.to_string()))?;
        let features = StandardScaler::fit(&raw_features.view()).transform(&raw_features.view())?;

        info!(
            divisions = included.len(),
            excluded = excluded.len(),
            dimensions = d,
            "built division profiles"
        );
        debug!(columns = ?feature_names, "profile columns");

        Ok(FeatureMatrix {
            division_ids: included.iter().map(|id| id.to_string()).collect(),
            feature_names,
            features,
            raw_features,
            excluded,
        })
    }

    fn profile_row(&self, division: &str, aggregates: &DivisionAggregates, categories: &[String]) -> Vec<f64> {
        let mut row = Vec::new();
        for feature in &self.features {
            match feature {
                ProfileFeature::CategoryShares => {
                    let n = aggregates.transactions(division).max(1) as f64;
                    let counts = aggregates.category_counts.get(division);
                    row.extend(categories.iter().map(|c| {
                        counts.and_then(|by_category| by_category.get(c)).copied().unwrap_or(0) as f64 / n
                    }));
                }
                ProfileFeature::SeasonalShares => row.extend(aggregates.seasonal_shares(division)),
                scalar => row.extend(
                    scalar
                        .summary_column()
                        .map(|column| aggregates.scalar(division, column)),
                ),
            }
        }
        row
    }
}

/// One row per transaction with the calendar keys used for grouping.
///
/// `day` counts days from the common era so window bounds compare as integers.
fn transactions_frame(records: &[TransactionRecord]) -> PolarsResult<DataFrame> {
    df!(
        "division" => records.iter().map(|r| r.division_id()).collect::<Vec<_>>(),
        "day" => records.iter().map(|r| r.date().num_days_from_ce()).collect::<Vec<_>>(),
        "year" => records.iter().map(|r| r.date().year()).collect::<Vec<_>>(),
        "month" => records.iter().map(|r| r.date().month() as i32).collect::<Vec<_>>(),
        "quarter" => records.iter().map(|r| quarter_of(r.date().month())).collect::<Vec<_>>(),
        "amount" => records.iter().map(|r| r.amount()).collect::<Vec<_>>(),
        "vendor" => records.iter().map(|r| r.vendor()).collect::<Vec<_>>(),
        "category" => records.iter().map(|r| r.category()).collect::<Vec<_>>()
    )
}

fn quarter_of(month: u32) -> i32 {
    ((month - 1) / 3 + 1) as i32
}

fn window_predicate(window: &AnalysisWindow) -> Expr {
    let mut predicate = lit(true);
    if let Some(start) = window.start {
        predicate = predicate.and(col("day").gt_eq(lit(start.num_days_from_ce())));
    }
    if let Some(end) = window.end {
        predicate = predicate.and(col("day").lt_eq(lit(end.num_days_from_ce())));
    }
    predicate
}

/// Amount, vendor and category statistics per division, joined with both
/// period CVs and the category-rank moments.
fn division_summary(transactions: &DataFrame, ranks: DataFrame) -> PolarsResult<DataFrame> {
    transactions
        .clone()
        .lazy()
        .group_by([col("division")])
        .agg([
            col("amount").sum().alias("total_spend"),
            col("amount").count().cast(DataType::Float64).alias("transaction_count"),
            col("amount").mean().alias("average_amount"),
            col("amount").std(0).alias("amount_stdev"),
            col("vendor").n_unique().cast(DataType::Float64).alias("distinct_vendors"),
            col("category").n_unique().cast(DataType::Float64).alias("distinct_categories"),
        ])
        .left_join(
            period_mean_cv(transactions, "month", "monthly_average_cv"),
            col("division"),
            col("division"),
        )
        .left_join(
            period_mean_cv(transactions, "quarter", "quarterly_average_cv"),
            col("division"),
            col("division"),
        )
        .left_join(rank_moments(ranks), col("division"), col("division"))
        .collect()
}

/// Population std over mean of the mean amount per `(year, period)`; 0 when
/// the mean is 0.
fn period_mean_cv(transactions: &DataFrame, period: &str, alias: &str) -> LazyFrame {
    transactions
        .clone()
        .lazy()
        .group_by([col("division"), col("year"), col(period)])
        .agg([col("amount").mean().alias("period_mean")])
        .group_by([col("division")])
        .agg([
            col("period_mean").mean().alias("mean_of_periods"),
            col("period_mean").std(0).alias("std_of_periods"),
        ])
        .select([
            col("division"),
            when(col("mean_of_periods").lt_eq(lit(f64::EPSILON)))
                .then(lit(0.0))
                .otherwise(col("std_of_periods") / col("mean_of_periods"))
                .alias(alias),
        ])
}

/// Skewness and excess kurtosis of each division's category-rank list.
/// A single rank has no spread and scores 0 on both.
fn rank_moments(ranks: DataFrame) -> LazyFrame {
    ranks.lazy().group_by([col("division")]).agg([
        col("rank")
            .skew(true)
            .fill_nan(lit(0.0))
            .fill_null(lit(0.0))
            .alias("category_rank_skew"),
        col("rank")
            .kurtosis(true, true)
            .fill_nan(lit(0.0))
            .fill_null(lit(0.0))
            .alias("category_rank_kurtosis"),
    ])
}

/// Every transaction contributes the rank of its category within its
/// division: categories ordered by count (descending, ties by name) from 0.
fn category_rank_frame(category_counts: &BTreeMap<String, BTreeMap<String, usize>>) -> PolarsResult<DataFrame> {
    let mut divisions = Vec::new();
    let mut ranks = Vec::new();
    for (division, counts) in category_counts {
        let mut ordered: Vec<(&String, usize)> = counts.iter().map(|(c, n)| (c, *n)).collect();
        ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        for (rank, (_, n)) in ordered.into_iter().enumerate() {
            divisions.extend(std::iter::repeat(division.as_str()).take(n));
            ranks.extend(std::iter::repeat(rank as f64).take(n));
        }
    }
    df!("division" => divisions, "rank" => ranks)
}

/// Grouped frames pulled out into lookups keyed by division.
struct DivisionAggregates {
    row_of: HashMap<String, usize>,
    scalars: HashMap<String, Vec<f64>>,
    category_counts: BTreeMap<String, BTreeMap<String, usize>>,
    /// Spend and transaction count per calendar quarter
    seasons: BTreeMap<String, ([f64; 4], [f64; 4])>,
}

impl DivisionAggregates {
    fn compute(transactions: &DataFrame) -> PolarsResult<Self> {
        let by_category = transactions
            .clone()
            .lazy()
            .group_by([col("division"), col("category")])
            .agg([col("amount").count().cast(DataType::Float64).alias("count")])
            .collect()?;
        let mut category_counts: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        for ((division, category), count) in str_values(&by_category, "division")?
            .into_iter()
            .zip(str_values(&by_category, "category")?)
            .zip(f64_values(&by_category, "count")?)
        {
            category_counts
                .entry(division)
                .or_default()
                .insert(category, count as usize);
        }

        let summary = division_summary(transactions, category_rank_frame(&category_counts)?)?;
        let row_of = str_values(&summary, "division")?
            .into_iter()
            .enumerate()
            .map(|(row, division)| (division, row))
            .collect();
        let mut scalars = HashMap::new();
        for feature in ProfileFeature::all() {
            if let Some(column) = feature.summary_column() {
                scalars.insert(column.to_string(), f64_values(&summary, column)?);
            }
        }

        let by_quarter = transactions
            .clone()
            .lazy()
            .group_by([col("division"), col("quarter")])
            .agg([
                col("amount").sum().alias("spend"),
                col("amount").count().cast(DataType::Float64).alias("count"),
            ])
            .collect()?;
        let mut seasons: BTreeMap<String, ([f64; 4], [f64; 4])> = BTreeMap::new();
        for (((division, quarter), spend), count) in str_values(&by_quarter, "division")?
            .into_iter()
            .zip(f64_values(&by_quarter, "quarter")?)
            .zip(f64_values(&by_quarter, "spend")?)
            .zip(f64_values(&by_quarter, "count")?)
        {
            let slot = (quarter as usize).clamp(1, 4) - 1;
            let entry = seasons.entry(division).or_default();
            entry.0[slot] += spend;
            entry.1[slot] += count;
        }

        Ok(Self {
            row_of,
            scalars,
            category_counts,
            seasons,
        })
    }

    /// Summary value for a division; 0 for a division with no in-window rows.
    fn scalar(&self, division: &str, column: &str) -> f64 {
        self.row_of
            .get(division)
            .zip(self.scalars.get(column))
            .and_then(|(&row, values)| values.get(row).copied())
            .unwrap_or(0.0)
    }

    fn transactions(&self, division: &str) -> usize {
        self.scalar(division, "transaction_count") as usize
    }

    /// Share of spend per quarter, or of transactions when nothing was spent.
    fn seasonal_shares(&self, division: &str) -> [f64; 4] {
        let (spend, counts) = self.seasons.get(division).copied().unwrap_or_default();
        let total: f64 = spend.iter().sum();
        if total > 0.0 {
            spend.map(|s| s / total)
        } else {
            let n = counts.iter().sum::<f64>().max(1.0);
            counts.map(|c| c / n)
        }
    }
}

fn str_values(frame: &DataFrame, name: &str) -> PolarsResult<Vec<String>> {
    Ok(frame
        .column(name)?
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

fn f64_values(frame: &DataFrame, name: &str) -> PolarsResult<Vec<f64>> {
    let values = frame.column(name)?.cast(&DataType::Float64)?;
    Ok(values.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}
