use crate::config::DEFAULT_HOUSING_LABEL;
use crate::error::{ExpenseError, Result};
use crate::ingestion::Dataset;
use crate::schema::TransactionRecord;
use chrono::{Datelike, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which calendar window of the data is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeriodFilter {
    #[schemars(description = "Every day of one calendar year")]
    Year { year: i32 },

    #[schemars(description = "One calendar month. `month` is zero-indexed (0 = January, 11 = December)")]
    Month { year: i32, month: u32 },

    #[schemars(description = "A single calendar day")]
    Day { date: NaiveDate },

    #[schemars(description = "An inclusive custom range")]
    Range { start: NaiveDate, end: NaiveDate },
}

impl PeriodFilter {
    pub fn year(year: i32) -> Self {
        PeriodFilter::Year { year }
    }

    /// `month` is zero-indexed.
    pub fn month(year: i32, month: u32) -> Result<Self> {
        if month > 11 {
            return Err(ExpenseError::InvalidFilter(format!(
                "Month index {} out of range (expected 0-11)",
                month
            )));
        }
        Ok(PeriodFilter::Month { year, month })
    }

    pub fn day(date: NaiveDate) -> Self {
        PeriodFilter::Day { date }
    }

    pub fn range(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(ExpenseError::InvalidFilter(format!(
                "Range end {} is before start {}",
                end, start
            )));
        }
        Ok(PeriodFilter::Range { start, end })
    }

    /// The range spanning the whole dataset; used to reset the filter after a load.
    pub fn dataset_range(dataset: &Dataset) -> Option<Self> {
        dataset
            .bounds()
            .map(|(start, end)| PeriodFilter::Range { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            PeriodFilter::Year { year } => date.year() == year,
            PeriodFilter::Month { year, month } => date.year() == year && date.month0() == month,
            PeriodFilter::Day { date: day } => date == day,
            PeriodFilter::Range { start, end } => start <= date && date <= end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    #[default]
    All,
    SelfOnly,
    OthersOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OneTimeFilter {
    #[default]
    Include,
    Exclude,
    Only,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FilterCriteria {
    #[schemars(description = "Calendar window; `None` keeps every date")]
    pub period: Option<PeriodFilter>,

    #[schemars(description = "Drop records whose raw category is the housing label (rent-like recurring costs)")]
    pub exclude_recurring_housing: bool,

    pub audience: Audience,

    pub one_time: OneTimeFilter,
}

impl FilterCriteria {
    pub fn with_period(period: PeriodFilter) -> Self {
        Self {
            period: Some(period),
            ..Self::default()
        }
    }

    /// Fresh criteria for a newly loaded dataset: full date range, nothing excluded.
    pub fn for_dataset(dataset: &Dataset) -> Self {
        Self {
            period: PeriodFilter::dataset_range(dataset),
            ..Self::default()
        }
    }

    pub fn excluding_housing(mut self, exclude: bool) -> Self {
        self.exclude_recurring_housing = exclude;
        self
    }

    fn keeps(&self, record: &TransactionRecord, housing_label: &str) -> bool {
        if self.exclude_recurring_housing
            && record.raw_category.trim().to_lowercase() == housing_label.to_lowercase()
        {
            return false;
        }

        let audience_ok = match self.audience {
            Audience::All => true,
            Audience::SelfOnly => !record.is_for_others,
            Audience::OthersOnly => record.is_for_others,
        };
        if !audience_ok {
            return false;
        }

        let one_time_ok = match self.one_time {
            OneTimeFilter::Include => true,
            OneTimeFilter::Exclude => !record.is_one_time,
            OneTimeFilter::Only => record.is_one_time,
        };
        if !one_time_ok {
            return false;
        }

        self.period.map_or(true, |period| period.contains(record.date))
    }
}

pub fn apply_filter(records: &[TransactionRecord], criteria: &FilterCriteria) -> Vec<TransactionRecord> {
    apply_filter_with_label(records, criteria, DEFAULT_HOUSING_LABEL)
}

pub fn apply_filter_with_label(
    records: &[TransactionRecord],
    criteria: &FilterCriteria,
    housing_label: &str,
) -> Vec<TransactionRecord> {
    records
        .iter()
        .filter(|record| criteria.keeps(record, housing_label))
        .cloned()
        .collect()
}

/// Records whose remark contains `keyword`, ignoring case.
pub fn search_remarks(records: &[TransactionRecord], keyword: &str) -> Vec<TransactionRecord> {
    let needle = keyword.trim().to_lowercase();
    if needle.is_empty() {
        return records.to_vec();
    }
    records
        .iter()
        .filter(|record| {
            record
                .remark
                .as_deref()
                .is_some_and(|remark| remark.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}

/// Narrows records to a raw category and/or a broad group, ignoring case.
///
/// With both given, the raw category is tried first; the broad group applies
/// only when the raw category matches nothing.
pub fn select_category(
    records: &[TransactionRecord],
    category: Option<&str>,
    major_category: Option<&str>,
) -> Vec<TransactionRecord> {
    let by_raw = |label: &str| -> Vec<TransactionRecord> {
        records
            .iter()
            .filter(|r| r.raw_category.eq_ignore_ascii_case(label.trim()))
            .cloned()
            .collect()
    };
    let by_group = |label: &str| -> Vec<TransactionRecord> {
        records
            .iter()
            .filter(|r| r.mapped_category.eq_ignore_ascii_case(label.trim()))
            .cloned()
            .collect()
    };

    match (category, major_category) {
        (Some(category), Some(major)) => {
            let matched = by_raw(category);
            if matched.is_empty() {
                by_group(major)
            } else {
                matched
            }
        }
        (Some(category), None) => by_raw(category),
        (None, Some(major)) => by_group(major),
        (None, None) => records.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample() -> Vec<TransactionRecord> {
        vec![
            TransactionRecord::new(date(2023, 12, 31), 50.0, "taxi", "Transportation"),
            TransactionRecord::new(date(2024, 1, 1), 1000.0, "grocery", "Food"),
            TransactionRecord::new(date(2024, 1, 1), 500.0, "snacks", "Food")
                .with_remark("Convenience store")
                .for_others(true),
            TransactionRecord::new(date(2024, 1, 2), 2000.0, "Housing", "Housing and Utilities"),
            TransactionRecord::new(date(2024, 1, 2), 80.0, "utility", "Housing and Utilities"),
            TransactionRecord::new(date(2024, 2, 14), 300.0, "gift", "Souvenirs/Gifts/Treats")
                .one_time(true),
        ]
    }

    #[test]
    fn test_period_variants() {
        let records = sample();

        let year = apply_filter(&records, &FilterCriteria::with_period(PeriodFilter::year(2024)));
        assert_eq!(year.len(), 5);

        let jan = PeriodFilter::month(2024, 0).unwrap();
        assert_eq!(apply_filter(&records, &FilterCriteria::with_period(jan)).len(), 4);

        let day = PeriodFilter::day(date(2024, 1, 1));
        assert_eq!(apply_filter(&records, &FilterCriteria::with_period(day)).len(), 2);

        let range = PeriodFilter::range(date(2023, 12, 31), date(2024, 1, 1)).unwrap();
        assert_eq!(apply_filter(&records, &FilterCriteria::with_period(range)).len(), 3);
    }

    #[test]
    fn test_invalid_period_construction() {
        assert!(PeriodFilter::month(2024, 12).is_err());
        assert!(PeriodFilter::range(date(2024, 2, 1), date(2024, 1, 1)).is_err());
    }

    #[test]
    fn test_exclude_housing_keeps_other_utilities() {
        let records = sample();
        let criteria = FilterCriteria::default().excluding_housing(true);
        let kept = apply_filter(&records, &criteria);
        assert_eq!(kept.len(), 5);
        assert!(kept.iter().all(|r| r.raw_category != "Housing"));
        assert!(kept.iter().any(|r| r.raw_category == "utility"));
    }

    #[test]
    fn test_filter_is_idempotent() {
        let records = sample();
        let criteria = FilterCriteria {
            period: Some(PeriodFilter::year(2024)),
            exclude_recurring_housing: true,
            audience: Audience::SelfOnly,
            one_time: OneTimeFilter::Exclude,
        };
        let once = apply_filter(&records, &criteria);
        let twice = apply_filter(&once, &criteria);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn test_audience_and_one_time() {
        let records = sample();
        let others = FilterCriteria {
            audience: Audience::OthersOnly,
            ..FilterCriteria::default()
        };
        assert_eq!(apply_filter(&records, &others).len(), 1);

        let only_one_time = FilterCriteria {
            one_time: OneTimeFilter::Only,
            ..FilterCriteria::default()
        };
        assert_eq!(apply_filter(&records, &only_one_time)[0].raw_category, "gift");
    }

    #[test]
    fn test_empty_result_is_not_an_error() {
        let records = sample();
        let criteria = FilterCriteria::with_period(PeriodFilter::year(1999));
        assert!(apply_filter(&records, &criteria).is_empty());
    }

    #[test]
    fn test_search_remarks() {
        let records = sample();
        let hits = search_remarks(&records, "CONVENIENCE");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].raw_category, "snacks");
    }

    #[test]
    fn test_select_category_fallback() {
        let records = sample();
        assert_eq!(select_category(&records, Some("GROCERY"), None).len(), 1);
        assert_eq!(select_category(&records, None, Some("food")).len(), 2);
        assert_eq!(select_category(&records, Some("bento"), Some("Food")).len(), 2);
        assert_eq!(select_category(&records, Some("snacks"), Some("Food")).len(), 1);
    }
}
