use crate::error::Result;
use crate::ingestion::parse_date_cell;
use crate::schema::{RawCell, RawRow, TransactionRecord};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Datetime,
    Numeric,
    Boolean,
    String,
    /// Every cell of the column is empty.
    Unknown,
}

impl ColumnType {
    /// Inferred from a single sample; the rest of the column is not checked.
    pub fn infer(sample: &RawCell) -> Self {
        match sample {
            RawCell::Empty => ColumnType::Unknown,
            RawCell::Bool(_) => ColumnType::Boolean,
            RawCell::Number(_) => ColumnType::Numeric,
            RawCell::Date(_) | RawCell::DateTime(_) => ColumnType::Datetime,
            RawCell::Text(text) => {
                let lowered = text.trim().to_lowercase();
                if lowered == "true" || lowered == "false" {
                    ColumnType::Boolean
                } else if lowered.parse::<f64>().is_ok() {
                    ColumnType::Numeric
                } else if parse_date_cell(sample).is_some() {
                    ColumnType::Datetime
                } else {
                    ColumnType::String
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnInfo {
    pub name: String,
    #[schemars(description = "Type inferred from the first non-empty value of the column")]
    pub inferred_type: ColumnType,
}

/// Shape of a dataset as handed to the natural-language-to-code translator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DatasetMetadata {
    #[schemars(description = "Columns in source order")]
    pub columns: Vec<ColumnInfo>,

    #[schemars(description = "Distinct raw category labels, de-duplicated ignoring case")]
    pub categories: Vec<String>,

    #[schemars(description = "Distinct broad groups the present categories map to")]
    pub major_categories: Vec<String>,

    #[schemars(description = "Raw label to broad group, only for labels present in the data")]
    pub category_mapping: BTreeMap<String, String>,
}

impl DatasetMetadata {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.categories.is_empty()
    }

    /// Pretty JSON block embedded verbatim in code-generation prompts.
    pub fn to_prompt_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(DatasetMetadata)
    }
}

/// Pushes `value` unless an entry equal to it ignoring case is already present.
fn push_unique(seen: &mut HashSet<String>, values: &mut Vec<String>, value: &str) -> bool {
    if seen.insert(value.to_lowercase()) {
        values.push(value.to_string());
        true
    } else {
        false
    }
}

/// Columns in source order, each typed from its first non-empty cell.
fn extract_columns(rows: &[RawRow]) -> Vec<ColumnInfo> {
    let mut columns: Vec<ColumnInfo> = Vec::new();
    for row in rows {
        for (name, cell) in row.iter() {
            match columns.iter_mut().find(|c| c.name == name) {
                Some(column) => {
                    if column.inferred_type == ColumnType::Unknown && !cell.is_blank() {
                        column.inferred_type = ColumnType::infer(cell);
                    }
                }
                None => columns.push(ColumnInfo {
                    name: name.to_string(),
                    inferred_type: if cell.is_blank() {
                        ColumnType::Unknown
                    } else {
                        ColumnType::infer(cell)
                    },
                }),
            }
        }
    }
    columns
}

/// Category labels and groups of the records that survived normalization.
fn with_categories(columns: Vec<ColumnInfo>, records: &[TransactionRecord]) -> DatasetMetadata {
    let mut categories = Vec::new();
    let mut seen_categories = HashSet::new();
    let mut major_categories = Vec::new();
    let mut seen_groups = HashSet::new();
    let mut category_mapping = BTreeMap::new();

    for record in records {
        if push_unique(&mut seen_categories, &mut categories, &record.raw_category) {
            push_unique(&mut seen_groups, &mut major_categories, &record.mapped_category);
            category_mapping.insert(record.raw_category.clone(), record.mapped_category.clone());
        }
    }

    categories.sort_by_key(|c| c.to_lowercase());
    major_categories.sort_by_key(|c| c.to_lowercase());

    DatasetMetadata {
        columns,
        categories,
        major_categories,
        category_mapping,
    }
}

/// Columns come from the uploaded rows; categories only from `records`, so
/// rejected rows and zero-amount placeholders never show up.
pub fn extract_metadata(rows: &[RawRow], records: &[TransactionRecord]) -> DatasetMetadata {
    with_categories(extract_columns(rows), records)
}

/// Metadata for records built in code, described by their canonical columns.
pub fn metadata_from_records(records: &[TransactionRecord]) -> DatasetMetadata {
    if records.is_empty() {
        return DatasetMetadata::default();
    }
    let columns = [
        ("Date", ColumnType::Datetime),
        ("Expense", ColumnType::Numeric),
        ("category", ColumnType::String),
        ("major category", ColumnType::String),
        ("remarks", ColumnType::String),
        ("onetime", ColumnType::Boolean),
        ("for others", ColumnType::Boolean),
    ]
    .into_iter()
    .map(|(name, inferred_type)| ColumnInfo {
        name: name.to_string(),
        inferred_type,
    })
    .collect();
    with_categories(columns, records)
}

/// Metadata for an already-loaded dataset, as sent alongside an analysis request.
pub fn prompt_metadata(dataset: &crate::ingestion::Dataset) -> Result<String> {
    dataset.metadata().to_prompt_string()
}
