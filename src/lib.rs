//! # Expense Insights
//!
//! A local-first engine that turns a personal expense spreadsheet into the
//! derived views of a spending dashboard, and answers ad-hoc questions about it.
//!
//! ## Core Concepts
//!
//! - **Raw rows**: cells as produced by an external spreadsheet parser
//! - **Transaction records**: normalized rows with a parsed date, an amount and a
//!   broad category group from the [`CategoryMapper`]
//! - **Filter criteria**: a period plus housing, audience and one-time toggles
//! - **Derived views**: grouped totals, daily and moving-average series, the
//!   calendar heatmap, insights and the count/total correlation
//! - **Execution gateway**: runs a natural-language query on a remote backend,
//!   falling back to a local sandbox that executes generated analysis snippets
//!
//! ## Example
//!
//! ```rust,ignore
//! use expense_insights::*;
//!
//! let rows = vec![
//!     RawRow::new()
//!         .with("Date", RawCell::text("2024-01-01"))
//!         .with("Expense", RawCell::Number(1000.0))
//!         .with("category", RawCell::text("grocery")),
//! ];
//!
//! let (dataset, report) = Dataset::load(&rows, &CategoryMapper::default());
//! assert!(report.is_clean());
//!
//! let criteria = FilterCriteria::for_dataset(&dataset);
//! let view = DashboardProcessor::process(&dataset, &criteria, &EngineConfig::default())?;
//! println!("Spent {} over {} transactions", view.total, view.count);
//! ```

pub mod aggregation;
pub mod analysis;
pub mod category_mapping;
pub mod config;
pub mod currency;
pub mod error;
pub mod filter;
pub mod ingestion;
pub mod insights;
pub mod metadata;
pub mod schema;
pub mod stats;

#[cfg(feature = "gateway")]
pub mod gateway;

pub use aggregation::{
    compare_years, cumulative_series, daily_totals, group_by, group_by_key, group_for_display,
    heatmap, monthly_category_breakdown, moving_average, total_amount, weekday_profile,
    DailyTotal, GroupKey, HeatmapView, MonthlyCategoryTotal, MovingAveragePoint, SortOrder,
    YearComparison,
};
pub use category_mapping::{CategoryMapper, MatchMode, UNKNOWN_CATEGORY};
pub use config::{EngineConfig, StreakGapPolicy};
pub use currency::{format_currency, CurrencyFormatter};
pub use error::{ExpenseError, Result};
pub use filter::{
    apply_filter, apply_filter_with_label, search_remarks, Audience, FilterCriteria,
    OneTimeFilter, PeriodFilter,
};
pub use ingestion::{normalize_rows, Dataset, NormalizationReport, RowRejection};
pub use insights::{detect_insights, Insights};
pub use metadata::{
    extract_metadata, metadata_from_records, prompt_metadata, ColumnInfo, ColumnType,
    DatasetMetadata,
};
pub use schema::*;
pub use stats::{count_total_correlation, pearson, quantile_threshold, welch_t_test, CorrelationResult};

use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A group total together with the color the dashboard paints it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryAggregate {
    pub category: String,
    pub total: f64,
    pub count: usize,
    pub color: String,
}

/// Everything the dashboard shows for one filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub records: Vec<TransactionRecord>,
    pub total: f64,
    pub count: usize,
    /// Broad groups, largest total first.
    pub categories: Vec<CategoryAggregate>,
    /// Monday through Sunday.
    pub weekdays: Vec<DerivedAggregate>,
    /// Oldest month first.
    pub months: Vec<DerivedAggregate>,
    pub daily: Vec<DailyTotal>,
    pub moving_average: Vec<MovingAveragePoint>,
    pub heatmap: HeatmapView,
    pub insights: Insights,
    pub correlation: Option<CorrelationResult>,
}

pub struct DashboardProcessor;

impl DashboardProcessor {
    /// Recomputes every view from scratch, coloring groups with the default mapping.
    pub fn process(
        dataset: &Dataset,
        criteria: &FilterCriteria,
        config: &EngineConfig,
    ) -> Result<DashboardView> {
        Self::process_with_mapper(dataset, criteria, config, &CategoryMapper::default())
    }

    pub fn process_with_mapper(
        dataset: &Dataset,
        criteria: &FilterCriteria,
        config: &EngineConfig,
        mapper: &CategoryMapper,
    ) -> Result<DashboardView> {
        config.validate()?;

        info!(
            "Processing dashboard for {} records (period: {:?})",
            dataset.len(),
            criteria.period
        );

        let records = apply_filter_with_label(dataset.records(), criteria, &config.housing_label);
        debug!(
            "Filter kept {} of {} records",
            records.len(),
            dataset.len()
        );

        let categories = group_for_display(&records, GroupKey::MappedCategory)
            .into_iter()
            .map(|group| CategoryAggregate {
                color: mapper.color_for(&group.key).to_string(),
                category: group.key,
                total: group.total,
                count: group.count,
            })
            .collect();

        let view = DashboardView {
            total: total_amount(&records),
            count: records.len(),
            categories,
            weekdays: weekday_profile(&records),
            months: group_for_display(&records, GroupKey::Month),
            daily: daily_totals(&records),
            moving_average: moving_average(&records, config.moving_average_window),
            heatmap: heatmap(&records, config.heatmap_quantile),
            insights: detect_insights(&records, config.streak_gap_policy),
            correlation: count_total_correlation(&records),
            records,
        };

        debug!(
            "Dashboard ready: total {:.2}, {} groups, {} days",
            view.total,
            view.categories.len(),
            view.daily.len()
        );

        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(date: &str, amount: f64, category: &str) -> RawRow {
        RawRow::new()
            .with("Date", RawCell::text(date))
            .with("Expense", RawCell::Number(amount))
            .with("category", RawCell::text(category))
    }

    fn sample_dataset() -> Dataset {
        let rows = vec![
            row("2024-01-01", 1000.0, "grocery"),
            row("2024-01-01", 500.0, "snacks"),
            row("2024-01-02", 2000.0, "housing"),
        ];
        let (dataset, report) = Dataset::load(&rows, &CategoryMapper::default());
        assert!(report.is_clean());
        dataset
    }

    #[test]
    fn test_end_to_end_processing() {
        let dataset = sample_dataset();
        let criteria = FilterCriteria::with_period(PeriodFilter::year(2024)).excluding_housing(true);

        let view = DashboardProcessor::process(&dataset, &criteria, &EngineConfig::default()).unwrap();

        assert_eq!(view.total, 1500.0);
        assert_eq!(view.count, 2);
        assert!(view.records.iter().all(|r| r.raw_category != "housing"));

        let top = view.insights.top_spending_day.unwrap();
        assert_eq!(top.date, date(2024, 1, 1));
        assert_eq!(top.total, 1500.0);
        assert_eq!(top.items.len(), 2);

        assert_eq!(view.categories.len(), 1);
        assert_eq!(view.categories[0].category, "Food");
        assert_eq!(
            view.categories[0].color,
            CategoryMapper::default().color_for("Food")
        );
    }

    #[test]
    fn test_views_agree_on_total() {
        let dataset = sample_dataset();
        let criteria = FilterCriteria::for_dataset(&dataset);
        let view = DashboardProcessor::process(&dataset, &criteria, &EngineConfig::default()).unwrap();

        assert_eq!(view.total, 3500.0);
        let by_category: f64 = view.categories.iter().map(|c| c.total).sum();
        let by_weekday: f64 = view.weekdays.iter().map(|w| w.total).sum();
        let by_month: f64 = view.months.iter().map(|m| m.total).sum();
        let by_day: f64 = view.daily.iter().map(|d| d.total).sum();
        for sum in [by_category, by_weekday, by_month, by_day] {
            assert!((sum - view.total).abs() < 1e-9);
        }
        assert_eq!(view.weekdays.len(), 7);
        assert_eq!(view.months[0].key, "2024-01");
    }

    #[test]
    fn test_empty_dataset() {
        let dataset = Dataset::default();
        let view = DashboardProcessor::process(
            &dataset,
            &FilterCriteria::default(),
            &EngineConfig::default(),
        )
        .unwrap();

        assert_eq!(view.total, 0.0);
        assert!(view.categories.is_empty());
        assert!(view.insights.top_spending_day.is_none());
        assert!(view.correlation.is_none());
        assert!(view.heatmap.threshold.is_none());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            moving_average_window: 0,
            ..EngineConfig::default()
        };
        let err = DashboardProcessor::process(&sample_dataset(), &FilterCriteria::default(), &config)
            .unwrap_err();
        assert!(matches!(err, ExpenseError::InvalidConfig(_)));
    }
}
