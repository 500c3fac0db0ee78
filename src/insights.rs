use crate::aggregation::{group_by_ordered, GroupKey, SortOrder};
use crate::config::StreakGapPolicy;
use crate::schema::{
    CategoryStreak, InsightResult, PriciestCategory, TopSpendingDay, TransactionRecord,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub top_spending_day: Option<TopSpendingDay>,
    pub category_streak: Option<CategoryStreak>,
    pub priciest_category: Option<PriciestCategory>,
}

impl Insights {
    pub fn into_results(self) -> Vec<InsightResult> {
        let mut results = Vec::new();
        if let Some(day) = self.top_spending_day {
            results.push(InsightResult::TopSpendingDay(day));
        }
        if let Some(streak) = self.category_streak {
            results.push(InsightResult::CategoryStreak(streak));
        }
        if let Some(category) = self.priciest_category {
            results.push(InsightResult::PriciestCategory(category));
        }
        results
    }
}

pub fn detect_insights(records: &[TransactionRecord], gap_policy: StreakGapPolicy) -> Insights {
    Insights {
        top_spending_day: top_spending_day(records),
        category_streak: category_streak(records, gap_policy),
        priciest_category: priciest_category(records),
    }
}

/// The day with the largest total, with every record of that day attached.
/// On a tie the day encountered first wins.
pub fn top_spending_day(records: &[TransactionRecord]) -> Option<TopSpendingDay> {
    let days = group_by_ordered(records, |r| GroupKey::Day.key_for(r), SortOrder::FirstSeen);

    let mut best: Option<(usize, f64)> = None;
    for (position, day) in days.iter().enumerate() {
        if best.map_or(true, |(_, total)| day.total > total) {
            best = Some((position, day.total));
        }
    }
    let (position, total) = best?;

    let key = &days[position].key;
    let items: Vec<TransactionRecord> = records
        .iter()
        .filter(|r| GroupKey::Day.key_for(r) == *key)
        .cloned()
        .collect();
    let date = items.first()?.date;

    Some(TopSpendingDay { date, total, items })
}

/// Dominant broad group for each day present, oldest first.
///
/// Within a day the group with the largest total dominates; on a tie the group
/// whose first record came first wins.
fn dominant_categories(records: &[TransactionRecord]) -> Vec<(NaiveDate, String)> {
    let mut by_day: BTreeMap<NaiveDate, Vec<(String, f64)>> = BTreeMap::new();
    for record in records {
        let groups = by_day.entry(record.date).or_default();
        match groups.iter_mut().find(|(name, _)| *name == record.mapped_category) {
            Some(group) => group.1 += record.amount,
            None => groups.push((record.mapped_category.clone(), record.amount)),
        }
    }

    by_day
        .into_iter()
        .filter_map(|(date, groups)| {
            let mut best: Option<(String, f64)> = None;
            for (name, total) in groups {
                if best.as_ref().map_or(true, |(_, best_total)| total > *best_total) {
                    best = Some((name, total));
                }
            }
            best.map(|(name, _)| (date, name))
        })
        .collect()
}

/// Longest run of consecutive days sharing a dominant broad group.
///
/// With [`StreakGapPolicy::SkipAbsentDays`] only data-bearing days count and a
/// day without records never breaks a run. Among runs of equal length the
/// earliest is kept.
pub fn category_streak(
    records: &[TransactionRecord],
    gap_policy: StreakGapPolicy,
) -> Option<CategoryStreak> {
    let days = dominant_categories(records);

    let mut best: Option<CategoryStreak> = None;
    let mut current: Option<CategoryStreak> = None;
    let mut previous_day: Option<NaiveDate> = None;

    for (date, category) in days {
        let contiguous = match (gap_policy, previous_day) {
            (StreakGapPolicy::BreakOnGaps, Some(prev)) => prev.succ_opt() == Some(date),
            _ => true,
        };

        current = match current.take() {
            Some(mut run) if contiguous && run.category == category => {
                run.length += 1;
                run.days.push(date);
                Some(run)
            }
            _ => Some(CategoryStreak {
                length: 1,
                category,
                days: vec![date],
            }),
        };

        if let Some(run) = &current {
            if best.as_ref().map_or(true, |b| run.length > b.length) {
                best = Some(run.clone());
            }
        }
        previous_day = Some(date);
    }

    best
}

/// Broad group with the highest average amount per transaction.
/// Single-transaction groups are eligible.
pub fn priciest_category(records: &[TransactionRecord]) -> Option<PriciestCategory> {
    let groups = group_by_ordered(
        records,
        |r| GroupKey::MappedCategory.key_for(r),
        SortOrder::FirstSeen,
    );

    let mut best: Option<PriciestCategory> = None;
    for group in groups {
        let average = group.average();
        if best
            .as_ref()
            .map_or(true, |b| average > b.average_per_transaction)
        {
            best = Some(PriciestCategory {
                category: group.key,
                average_per_transaction: average,
                total: group.total,
                count: group.count,
            });
        }
    }
    best
}
