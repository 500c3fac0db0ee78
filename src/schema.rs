use chrono::{NaiveDate, NaiveDateTime};
use schemars::JsonSchema;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A single spreadsheet cell as handed over by the external parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RawCell {
    #[schemars(description = "An empty cell (null)")]
    Empty,

    #[schemars(description = "A boolean cell (checkbox columns such as 'onetime')")]
    Bool(bool),

    #[schemars(description = "A numeric cell. Date columns may arrive as spreadsheet serial numbers.")]
    Number(f64),

    #[schemars(description = "A calendar date in YYYY-MM-DD format")]
    Date(NaiveDate),

    #[schemars(description = "A timestamp; only the calendar date is used")]
    DateTime(NaiveDateTime),

    #[schemars(description = "Free text")]
    Text(String),
}

impl RawCell {
    pub fn text(value: impl Into<String>) -> Self {
        RawCell::Text(value.into())
    }

    /// True for null cells and for text cells holding only whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            RawCell::Empty => true,
            RawCell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Trimmed textual rendering of the cell, `None` when blank.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawCell::Empty => None,
            RawCell::Bool(b) => Some(b.to_string()),
            RawCell::Number(n) => Some(format_number(*n)),
            RawCell::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            RawCell::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            RawCell::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// One spreadsheet row: column name to cell, in the column order of the source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: Vec<(String, RawCell)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. A repeated column name replaces the earlier cell.
    pub fn with(mut self, column: impl Into<String>, cell: RawCell) -> Self {
        self.insert(column, cell);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, cell: RawCell) {
        let column = column.into();
        if let Some(slot) = self.cells.iter_mut().find(|(name, _)| *name == column) {
            slot.1 = cell;
        } else {
            self.cells.push((column, cell));
        }
    }

    pub fn get(&self, column: &str) -> Option<&RawCell> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, cell)| cell)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawCell)> {
        self.cells.iter().map(|(name, cell)| (name.as_str(), cell))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, RawCell)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, RawCell)>>(iter: I) -> Self {
        let mut row = RawRow::new();
        for (column, cell) in iter {
            row.insert(column, cell);
        }
        row
    }
}

impl Serialize for RawRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, cell) in &self.cells {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RawRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = RawRow;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column names to cells")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RawRow, A::Error> {
                let mut row = RawRow::new();
                while let Some((name, cell)) = access.next_entry::<String, RawCell>()? {
                    row.insert(name, cell);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// A canonical expense line.
///
/// Serialized field names follow the spreadsheet/backend column names so that
/// the same shape can be posted to the remote analysis backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransactionRecord {
    #[serde(rename = "Date")]
    #[schemars(description = "Calendar date of the expense (day granularity)")]
    pub date: NaiveDate,

    #[serde(rename = "Expense")]
    #[schemars(description = "Strictly positive amount spent")]
    pub amount: f64,

    #[serde(rename = "category")]
    #[schemars(description = "Category label exactly as entered by the user")]
    pub raw_category: String,

    #[serde(rename = "major category")]
    #[schemars(description = "Broad group resolved from the category mapping; the raw label when unmapped")]
    pub mapped_category: String,

    #[serde(rename = "remarks", default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Optional free-text note")]
    pub remark: Option<String>,

    #[serde(rename = "onetime", default)]
    #[schemars(description = "Rare or irregular purchase")]
    pub is_one_time: bool,

    #[serde(rename = "for others", default)]
    #[schemars(description = "Spending on behalf of someone else")]
    pub is_for_others: bool,

    #[serde(flatten, default)]
    #[schemars(description = "Columns the normalizer did not recognise, passed through untouched")]
    pub extra: BTreeMap<String, RawCell>,
}

impl TransactionRecord {
    pub fn new(
        date: NaiveDate,
        amount: f64,
        raw_category: impl Into<String>,
        mapped_category: impl Into<String>,
    ) -> Self {
        Self {
            date,
            amount,
            raw_category: raw_category.into(),
            mapped_category: mapped_category.into(),
            remark: None,
            is_one_time: false,
            is_for_others: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    pub fn one_time(mut self, value: bool) -> Self {
        self.is_one_time = value;
        self
    }

    pub fn for_others(mut self, value: bool) -> Self {
        self.is_for_others = value;
        self
    }
}

/// Sum and count of one group produced by a grouping request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DerivedAggregate {
    pub key: String,
    pub total: f64,
    pub count: usize,
}

impl DerivedAggregate {
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TopSpendingDay {
    pub date: NaiveDate,
    pub total: f64,
    /// Every record that contributed to `total`.
    pub items: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CategoryStreak {
    pub length: usize,
    pub category: String,
    pub days: Vec<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PriciestCategory {
    pub category: String,
    pub average_per_transaction: f64,
    pub total: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsightResult {
    TopSpendingDay(TopSpendingDay),
    CategoryStreak(CategoryStreak),
    PriciestCategory(PriciestCategory),
}
