use crate::schema::{DerivedAggregate, TransactionRecord};
use crate::stats::quantile_threshold;
use chrono::{Datelike, Days, NaiveDate, Weekday};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    #[schemars(description = "Broad group from the category mapping")]
    MappedCategory,
    #[schemars(description = "Category label as entered")]
    RawCategory,
    #[schemars(description = "Monday of the ISO week, YYYY-MM-DD")]
    WeekStart,
    #[schemars(description = "Calendar date, YYYY-MM-DD")]
    Day,
    #[schemars(description = "Calendar month, YYYY-MM")]
    Month,
    #[schemars(description = "Calendar year, YYYY")]
    Year,
    #[schemars(description = "English weekday name")]
    Weekday,
}

impl GroupKey {
    pub fn key_for(&self, record: &TransactionRecord) -> String {
        match self {
            GroupKey::MappedCategory => record.mapped_category.clone(),
            GroupKey::RawCategory => record.raw_category.clone(),
            GroupKey::WeekStart => week_start(record.date).format("%Y-%m-%d").to_string(),
            GroupKey::Day => record.date.format("%Y-%m-%d").to_string(),
            GroupKey::Month => record.date.format("%Y-%m").to_string(),
            GroupKey::Year => record.date.year().to_string(),
            GroupKey::Weekday => weekday_name(record.date.weekday()).to_string(),
        }
    }

    /// True for keys whose string form sorts chronologically.
    pub fn is_chronological(&self) -> bool {
        matches!(
            self,
            GroupKey::WeekStart | GroupKey::Day | GroupKey::Month | GroupKey::Year
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    TotalDescending,
    KeyAscending,
    FirstSeen,
}

pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_monday() as u64;
    date.checked_sub_days(Days::new(offset)).unwrap_or(date)
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

pub fn total_amount(records: &[TransactionRecord]) -> f64 {
    records.iter().map(|r| r.amount).sum()
}

fn accumulate<F>(records: &[TransactionRecord], key_fn: F) -> Vec<DerivedAggregate>
where
    F: Fn(&TransactionRecord) -> String,
{
    let mut groups: Vec<DerivedAggregate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let key = key_fn(record);
        match index.get(&key) {
            Some(&position) => {
                let group = &mut groups[position];
                group.total += record.amount;
                group.count += 1;
            }
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(DerivedAggregate {
                    key,
                    total: record.amount,
                    count: 1,
                });
            }
        }
    }

    groups
}

/// Groups records with an arbitrary key function, largest total first.
pub fn group_by<F>(records: &[TransactionRecord], key_fn: F) -> Vec<DerivedAggregate>
where
    F: Fn(&TransactionRecord) -> String,
{
    group_by_ordered(records, key_fn, SortOrder::TotalDescending)
}

pub fn group_by_ordered<F>(
    records: &[TransactionRecord],
    key_fn: F,
    order: SortOrder,
) -> Vec<DerivedAggregate>
where
    F: Fn(&TransactionRecord) -> String,
{
    let mut groups = accumulate(records, key_fn);
    match order {
        SortOrder::TotalDescending => groups.sort_by(|a, b| b.total.total_cmp(&a.total)),
        SortOrder::KeyAscending => groups.sort_by(|a, b| a.key.cmp(&b.key)),
        SortOrder::FirstSeen => {}
    }
    groups
}

pub fn group_by_key(records: &[TransactionRecord], key: GroupKey) -> Vec<DerivedAggregate> {
    group_by(records, |r| key.key_for(r))
}

/// Time keys come back oldest first, everything else largest total first.
pub fn group_for_display(records: &[TransactionRecord], key: GroupKey) -> Vec<DerivedAggregate> {
    let order = if key.is_chronological() {
        SortOrder::KeyAscending
    } else {
        SortOrder::TotalDescending
    };
    group_by_ordered(records, |r| key.key_for(r), order)
}

/// Monday through Sunday, with zero rows for weekdays that have no spending.
pub fn weekday_profile(records: &[TransactionRecord]) -> Vec<DerivedAggregate> {
    let groups = accumulate(records, |r| weekday_name(r.date.weekday()).to_string());
    WEEKDAYS
        .iter()
        .map(|weekday| {
            let name = weekday_name(*weekday);
            groups
                .iter()
                .find(|g| g.key == name)
                .cloned()
                .unwrap_or(DerivedAggregate {
                    key: name.to_string(),
                    total: 0.0,
                    count: 0,
                })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub total: f64,
    pub count: usize,
}

/// One entry per day present in the data, oldest first.
pub fn daily_totals(records: &[TransactionRecord]) -> Vec<DailyTotal> {
    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for record in records {
        let entry = days.entry(record.date).or_insert((0.0, 0));
        entry.0 += record.amount;
        entry.1 += 1;
    }
    days.into_iter()
        .map(|(date, (total, count))| DailyTotal { date, total, count })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CumulativePoint {
    pub date: NaiveDate,
    /// 1-366
    pub day_of_year: u32,
    pub running_total: f64,
}

/// Running total over one calendar year, one point per record.
///
/// Points carry the ordinal day so two years can be overlaid; leap days are
/// not shifted.
pub fn cumulative_series(records: &[TransactionRecord], year: i32) -> Vec<CumulativePoint> {
    let mut in_year: Vec<&TransactionRecord> =
        records.iter().filter(|r| r.date.year() == year).collect();
    in_year.sort_by_key(|r| r.date);

    let mut running_total = 0.0;
    in_year
        .into_iter()
        .map(|record| {
            running_total += record.amount;
            CumulativePoint {
                date: record.date,
                day_of_year: record.date.ordinal(),
                running_total,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct YearComparison {
    pub first_year: i32,
    pub second_year: i32,
    pub first: Vec<CumulativePoint>,
    pub second: Vec<CumulativePoint>,
}

pub fn compare_years(records: &[TransactionRecord], first_year: i32, second_year: i32) -> YearComparison {
    YearComparison {
        first_year,
        second_year,
        first: cumulative_series(records, first_year),
        second: cumulative_series(records, second_year),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MovingAveragePoint {
    pub date: NaiveDate,
    pub total: f64,
    /// `None` until a full window is available.
    pub average: Option<f64>,
}

/// Trailing average over per-day totals, oldest first.
pub fn moving_average(records: &[TransactionRecord], window: usize) -> Vec<MovingAveragePoint> {
    let window = window.max(1);
    let days = daily_totals(records);
    let mut points = Vec::with_capacity(days.len());
    let mut window_sum = 0.0;

    for (idx, day) in days.iter().enumerate() {
        window_sum += day.total;
        if idx >= window {
            window_sum -= days[idx - window].total;
        }
        let average = if idx + 1 >= window {
            Some(window_sum / window as f64)
        } else {
            None
        };
        points.push(MovingAveragePoint {
            date: day.date,
            total: day.total,
            average,
        });
    }

    points
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HeatmapView {
    /// Largest single amount still shown; `None` for an empty input.
    pub threshold: Option<f64>,
    /// Records left out of this view only.
    pub clipped: usize,
    pub cells: Vec<DailyTotal>,
}

/// Per-day totals for the calendar heatmap with outlier amounts clipped.
///
/// The clip applies to this view alone; totals elsewhere keep every record.
pub fn heatmap(records: &[TransactionRecord], quantile: f64) -> HeatmapView {
    let amounts: Vec<f64> = records.iter().map(|r| r.amount).collect();
    let threshold = quantile_threshold(&amounts, quantile);

    let kept: Vec<TransactionRecord> = match threshold {
        Some(limit) => records.iter().filter(|r| r.amount <= limit).cloned().collect(),
        None => Vec::new(),
    };

    HeatmapView {
        threshold,
        clipped: records.len() - kept.len(),
        cells: daily_totals(&kept),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyCategoryTotal {
    pub month: String,
    pub category: String,
    pub total: f64,
}

/// Month by broad-group totals for stacked bars, ordered by month then group.
pub fn monthly_category_breakdown(records: &[TransactionRecord]) -> Vec<MonthlyCategoryTotal> {
    let mut cells: BTreeMap<(String, String), f64> = BTreeMap::new();
    for record in records {
        let key = (
            record.date.format("%Y-%m").to_string(),
            record.mapped_category.clone(),
        );
        *cells.entry(key).or_insert(0.0) += record.amount;
    }
    cells
        .into_iter()
        .map(|((month, category), total)| MonthlyCategoryTotal {
            month,
            category,
            total,
        })
        .collect()
}
