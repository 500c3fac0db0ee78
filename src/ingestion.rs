use crate::category_mapping::{CategoryMapper, UNKNOWN_CATEGORY};
use crate::error::{ExpenseError, Result};
use crate::metadata::{extract_metadata, metadata_from_records, DatasetMetadata};
use crate::schema::{RawCell, RawRow, TransactionRecord};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%m/%d/%Y", "%d.%m.%Y", "%d-%m-%Y", "%b %d, %Y",
    "%B %d, %Y", "%d %b %Y", "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Largest spreadsheet serial accepted as a date (9999-12-31).
const MAX_SPREADSHEET_SERIAL: f64 = 2_958_465.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Date,
    Amount,
    Category,
    Remark,
    OneTime,
    ForOthers,
    Derived,
}

fn canonical_header(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn classify_column(name: &str) -> Option<Field> {
    match canonical_header(name).as_str() {
        "date" | "day" | "transaction date" => Some(Field::Date),
        "expense" | "expenses" | "amount" => Some(Field::Amount),
        "category" => Some(Field::Category),
        "remarks" | "remark" | "note" | "notes" => Some(Field::Remark),
        "onetime" | "one time" => Some(Field::OneTime),
        "for others" | "forothers" => Some(Field::ForOthers),
        // Recomputed from the mapping on every load.
        "major category" => Some(Field::Derived),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RowRejection {
    MissingDate { row: usize },
    UnparseableDate { row: usize, value: String },
}

impl RowRejection {
    pub fn row(&self) -> usize {
        match self {
            RowRejection::MissingDate { row } | RowRejection::UnparseableDate { row, .. } => *row,
        }
    }

    pub fn to_error(&self) -> ExpenseError {
        match self {
            RowRejection::MissingDate { row } => ExpenseError::MissingDate { row: *row },
            RowRejection::UnparseableDate { row, value } => ExpenseError::UnparseableDate {
                row: *row,
                value: value.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizationReport {
    pub records: Vec<TransactionRecord>,
    /// Rows whose date could not be resolved, 1-based.
    pub rejected: Vec<RowRejection>,
    /// Rows with a valid date and a zero, negative or non-numeric amount.
    pub skipped_placeholders: usize,
}

impl NormalizationReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Fails on the first rejected row instead of carrying rejections along.
    pub fn into_strict(self) -> Result<Vec<TransactionRecord>> {
        match self.rejected.first() {
            Some(rejection) => Err(rejection.to_error()),
            None => Ok(self.records),
        }
    }
}

pub fn parse_date_cell(cell: &RawCell) -> Option<NaiveDate> {
    match cell {
        RawCell::Date(d) => Some(*d),
        RawCell::DateTime(dt) => Some(dt.date()),
        RawCell::Number(n) => spreadsheet_serial_to_date(*n),
        RawCell::Text(s) => parse_date_text(s),
        RawCell::Empty | RawCell::Bool(_) => None,
    }
}

fn spreadsheet_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..=MAX_SPREADSHEET_SERIAL).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_days(Days::new(serial.floor() as u64))
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Some(datetime.date());
        }
    }

    // Offsets are dropped; the wall-clock date is kept.
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.naive_local().date());
    }

    None
}

/// Coerces an amount cell; anything non-numeric becomes `0.0`.
pub fn parse_amount_cell(cell: &RawCell) -> f64 {
    let value = match cell {
        RawCell::Number(n) => *n,
        RawCell::Text(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().unwrap_or(0.0)
        }
        _ => 0.0,
    };

    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn parse_flag_cell(cell: &RawCell) -> bool {
    match cell {
        RawCell::Bool(b) => *b,
        RawCell::Number(n) => *n != 0.0,
        RawCell::Text(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "yes" | "y" | "1" | "x" | "✓" | "✔"
        ),
        _ => false,
    }
}

fn normalize_row(
    row_number: usize,
    row: &RawRow,
    mapper: &CategoryMapper,
) -> std::result::Result<Option<TransactionRecord>, RowRejection> {
    let mut date_cell = None;
    let mut amount = 0.0;
    let mut raw_category = String::new();
    let mut remark = None;
    let mut is_one_time = false;
    let mut is_for_others = false;
    let mut extra = BTreeMap::new();

    for (column, cell) in row.iter() {
        match classify_column(column) {
            Some(Field::Date) => {
                if date_cell.is_none() {
                    date_cell = Some(cell);
                }
            }
            Some(Field::Amount) => amount = parse_amount_cell(cell),
            Some(Field::Category) => raw_category = cell.as_text().unwrap_or_default(),
            Some(Field::Remark) => remark = cell.as_text(),
            Some(Field::OneTime) => is_one_time = parse_flag_cell(cell),
            Some(Field::ForOthers) => is_for_others = parse_flag_cell(cell),
            Some(Field::Derived) => {}
            None => {
                extra.insert(column.to_string(), cell.clone());
            }
        }
    }

    let date = match date_cell {
        None => return Err(RowRejection::MissingDate { row: row_number }),
        Some(cell) if cell.is_blank() => return Err(RowRejection::MissingDate { row: row_number }),
        Some(cell) => parse_date_cell(cell).ok_or_else(|| RowRejection::UnparseableDate {
            row: row_number,
            value: cell.as_text().unwrap_or_default(),
        })?,
    };

    if amount <= 0.0 {
        return Ok(None);
    }

    let mapped_category = if raw_category.is_empty() {
        UNKNOWN_CATEGORY.to_string()
    } else {
        mapper.map_category(&raw_category)
    };

    Ok(Some(TransactionRecord {
        date,
        amount,
        raw_category,
        mapped_category,
        remark,
        is_one_time,
        is_for_others,
        extra,
    }))
}

/// Converts raw spreadsheet rows into canonical records.
///
/// Rows with an unresolvable date are reported in `rejected`; rows with a valid
/// date but no positive amount are placeholders and are dropped silently.
pub fn normalize_rows(rows: &[RawRow], mapper: &CategoryMapper) -> NormalizationReport {
    let mut report = NormalizationReport::default();

    for (idx, row) in rows.iter().enumerate() {
        match normalize_row(idx + 1, row, mapper) {
            Ok(Some(record)) => report.records.push(record),
            Ok(None) => report.skipped_placeholders += 1,
            Err(rejection) => {
                warn!("Rejected input row: {}", rejection.to_error());
                report.rejected.push(rejection);
            }
        }
    }

    debug!(
        "Normalized {} rows: {} records, {} placeholders, {} rejected",
        rows.len(),
        report.records.len(),
        report.skipped_placeholders,
        report.rejected.len()
    );

    report
}

/// The canonical record collection of one upload.
///
/// A dataset is never merged into: loading a new file builds a fresh `Dataset`
/// that replaces the previous one wholesale.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<TransactionRecord>,
    metadata: DatasetMetadata,
}

impl Dataset {
    pub fn load(rows: &[RawRow], mapper: &CategoryMapper) -> (Self, NormalizationReport) {
        let report = normalize_rows(rows, mapper);
        let metadata = extract_metadata(rows, &report.records);
        let dataset = Self {
            records: report.records.clone(),
            metadata,
        };

        info!(
            "Loaded dataset with {} records across {} columns ({} rows rejected)",
            dataset.records.len(),
            dataset.metadata.columns.len(),
            report.rejected.len()
        );

        (dataset, report)
    }

    pub fn from_records(records: Vec<TransactionRecord>) -> Self {
        let metadata = metadata_from_records(&records);
        Self { records, metadata }
    }

    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Earliest and latest record date.
    pub fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.records.iter().map(|r| r.date).min()?;
        let max = self.records.iter().map(|r| r.date).max()?;
        Some((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(date: RawCell, expense: RawCell, category: &str) -> RawRow {
        RawRow::new()
            .with("Date", date)
            .with("Expense", expense)
            .with("category", RawCell::text(category))
    }

    #[test]
    fn test_resolves_aliased_columns() {
        let rows = vec![RawRow::new()
            .with("date", RawCell::text("2024-03-05"))
            .with("expense", RawCell::Number(450.0))
            .with("Category", RawCell::text("Grocery"))
            .with("Remarks", RawCell::text("market"))
            .with("onetime", RawCell::Bool(true))
            .with("For_Others", RawCell::text("yes"))
            .with("store", RawCell::text("Aeon"))];

        let report = normalize_rows(&rows, &CategoryMapper::default());
        assert!(report.is_clean());
        let record = &report.records[0];
        assert_eq!(record.date, date(2024, 3, 5));
        assert_eq!(record.amount, 450.0);
        assert_eq!(record.raw_category, "Grocery");
        assert_eq!(record.mapped_category, "Food");
        assert_eq!(record.remark.as_deref(), Some("market"));
        assert!(record.is_one_time);
        assert!(record.is_for_others);
        assert_eq!(record.extra.get("store"), Some(&RawCell::text("Aeon")));
    }

    #[test]
    fn test_drops_placeholder_rows() {
        let rows = vec![
            row(RawCell::text("2024-01-01"), RawCell::Number(0.0), "grocery"),
            row(RawCell::text("2024-01-02"), RawCell::Number(-20.0), "grocery"),
            row(RawCell::text("2024-01-03"), RawCell::text("n/a"), "grocery"),
            row(RawCell::text("2024-01-04"), RawCell::Empty, "grocery"),
            row(RawCell::text("2024-01-05"), RawCell::text("¥1,200"), "grocery"),
        ];

        let report = normalize_rows(&rows, &CategoryMapper::default());
        assert_eq!(report.skipped_placeholders, 4);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].amount, 1200.0);
    }

    #[test]
    fn test_unparseable_date_is_reported() {
        let rows = vec![
            row(RawCell::text("2024-01-01"), RawCell::Number(10.0), "grocery"),
            row(RawCell::text("next tuesday"), RawCell::Number(10.0), "grocery"),
            RawRow::new().with("Expense", RawCell::Number(5.0)),
        ];

        let report = normalize_rows(&rows, &CategoryMapper::default());
        assert_eq!(report.records.len(), 1);
        assert_eq!(
            report.rejected,
            vec![
                RowRejection::UnparseableDate {
                    row: 2,
                    value: "next tuesday".to_string()
                },
                RowRejection::MissingDate { row: 3 },
            ]
        );

        let err = report.into_strict().unwrap_err();
        assert!(matches!(err, ExpenseError::UnparseableDate { row: 2, .. }));
    }

    #[test]
    fn test_date_cell_variants() {
        assert_eq!(parse_date_cell(&RawCell::Number(45292.0)), Some(date(2024, 1, 1)));
        assert_eq!(
            parse_date_cell(&RawCell::text("2024-02-29T18:30:00")),
            Some(date(2024, 2, 29))
        );
        assert_eq!(
            parse_date_cell(&RawCell::text("2024-02-29T23:30:00+09:00")),
            Some(date(2024, 2, 29))
        );
        assert_eq!(parse_date_cell(&RawCell::text("03/15/2024")), Some(date(2024, 3, 15)));
        assert_eq!(parse_date_cell(&RawCell::Bool(true)), None);
        assert_eq!(parse_date_cell(&RawCell::Number(-3.0)), None);
    }

    #[test]
    fn test_blank_category_becomes_unknown() {
        let rows = vec![row(RawCell::text("2024-01-01"), RawCell::Number(10.0), "  ")];
        let report = normalize_rows(&rows, &CategoryMapper::default());
        assert_eq!(report.records[0].mapped_category, UNKNOWN_CATEGORY);
    }

    #[test]
    fn test_dataset_load_and_bounds() {
        let rows = vec![
            row(RawCell::text("2024-02-10"), RawCell::Number(10.0), "grocery"),
            row(RawCell::text("2023-12-31"), RawCell::Number(30.0), "taxi"),
        ];
        let (dataset, report) = Dataset::load(&rows, &CategoryMapper::default());
        assert!(report.is_clean());
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.bounds(), Some((date(2023, 12, 31), date(2024, 2, 10))));
        assert_eq!(dataset.metadata().columns.len(), 3);

        let empty = Dataset::default();
        assert!(empty.bounds().is_none());
    }
}
