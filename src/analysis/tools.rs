use super::chart::{ChartKind, ChartSeries, ChartSpec};
use crate::aggregation::{daily_totals, group_by_ordered, GroupKey, SortOrder};
use crate::error::{ExpenseError, Result};
use crate::filter::{search_remarks, select_category};
use crate::ingestion::parse_amount_cell;
use crate::schema::{RawCell, TransactionRecord};
use crate::stats::{pearson, welch_t_test};
use chrono::{Datelike, Months, NaiveDate};
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// What a tool sees: the loaded records, today's date for relative windows,
/// and the display currency used in chart titles.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext<'a> {
    pub records: &'a [TransactionRecord],
    pub today: NaiveDate,
    pub currency: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub fig: Option<ChartSpec>,
    pub message: String,
}

impl ToolOutput {
    fn text(message: impl Into<String>) -> Self {
        Self {
            fig: None,
            message: message.into(),
        }
    }

    fn chart(fig: ChartSpec, message: impl Into<String>) -> Self {
        Self {
            fig: Some(fig),
            message: message.into(),
        }
    }
}

/// Accepts `2024`, `2024.0` or `"2024"`.
fn lenient_int<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<i32>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .and_then(|n| i32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("{} is not a whole number", n))),
        Value::String(s) => s
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("'{}' is not a whole number", s))),
        other => Err(serde::de::Error::custom(format!("expected a whole number, got {}", other))),
    }
}

/// Blank or whitespace-only text counts as not given.
fn non_blank<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct TimeSeriesArgs {
    #[schemars(description = "Specific category to filter by (e.g., 'grocery', 'gym').")]
    #[serde(deserialize_with = "non_blank")]
    pub category: Option<String>,
    #[schemars(description = "Broad category to filter by (e.g., 'Food', 'Transportation').")]
    #[serde(deserialize_with = "non_blank")]
    pub major_category: Option<String>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "Specific year to plot (e.g., 2024).")]
    pub year: Option<i32>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "Start year for a range query.")]
    pub start_year: Option<i32>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "End year for a range query.")]
    pub end_year: Option<i32>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "Number of recent months to include.")]
    pub months: Option<i32>,
    #[schemars(description = "Optional custom title for the plot.")]
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct PieChartArgs {
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "Year to filter data by.")]
    pub year: Option<i32>,
    #[schemars(description = "Show breakdown of sub-categories within this major category.")]
    #[serde(deserialize_with = "non_blank")]
    pub major_category: Option<String>,
    #[schemars(description = "Specific category to focus on.")]
    #[serde(deserialize_with = "non_blank")]
    pub category: Option<String>,
    #[schemars(description = "Optional custom title.")]
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct ComparisonArgs {
    #[schemars(description = "Specific category to compare.")]
    #[serde(deserialize_with = "non_blank")]
    pub category: Option<String>,
    #[schemars(description = "Broad category to compare.")]
    #[serde(deserialize_with = "non_blank")]
    pub major_category: Option<String>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "First year.")]
    pub y1: Option<i32>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "Second year.")]
    pub y2: Option<i32>,
    #[schemars(description = "Optional custom title.")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum StackMode {
    #[default]
    Monthly,
    Yearly,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct StackedBarArgs {
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "Year for a monthly breakdown.")]
    pub year: Option<i32>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "First year for a yearly comparison.")]
    pub y1: Option<i32>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "Second year for a yearly comparison.")]
    pub y2: Option<i32>,
    #[schemars(description = "'monthly' (needs year) or 'yearly' (needs y1 and y2).")]
    pub mode: StackMode,
    #[schemars(description = "Optional custom title.")]
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct TotalArgs {
    #[schemars(description = "Specific category (e.g., 'grocery').")]
    #[serde(deserialize_with = "non_blank")]
    pub category: Option<String>,
    #[schemars(description = "Broad category (e.g., 'Food').")]
    #[serde(deserialize_with = "non_blank")]
    pub major_category: Option<String>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "Year to restrict to.")]
    pub year: Option<i32>,
    #[schemars(description = "Keyword searched in the remarks column (case-insensitive).")]
    #[serde(deserialize_with = "non_blank")]
    pub remarks: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct SignificanceArgs {
    #[schemars(description = "Specific category to test.")]
    #[serde(deserialize_with = "non_blank")]
    pub category: Option<String>,
    #[schemars(description = "Broad category to test (used when no category is given).")]
    #[serde(deserialize_with = "non_blank")]
    pub major_category: Option<String>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "First year.")]
    pub y1: Option<i32>,
    #[serde(deserialize_with = "lenient_int")]
    #[schemars(description = "Second year.")]
    pub y2: Option<i32>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CorrelationArgs {
    #[schemars(description = "First numeric column (e.g., 'Expense').")]
    pub col1: String,
    #[schemars(description = "Second numeric column.")]
    pub col2: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    PlotTimeSeries,
    PlotPieChart,
    PlotComparison,
    PlotStackedBar,
    CalculateSum,
    CalculateAverage,
    RunSignificanceTest,
    RunCorrelation,
}

impl Tool {
    pub const ALL: [Tool; 8] = [
        Tool::PlotTimeSeries,
        Tool::PlotPieChart,
        Tool::PlotComparison,
        Tool::PlotStackedBar,
        Tool::CalculateSum,
        Tool::CalculateAverage,
        Tool::RunSignificanceTest,
        Tool::RunCorrelation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::PlotTimeSeries => "plot_time_series",
            Tool::PlotPieChart => "plot_pie_chart",
            Tool::PlotComparison => "plot_comparison",
            Tool::PlotStackedBar => "plot_stacked_bar",
            Tool::CalculateSum => "calculate_sum",
            Tool::CalculateAverage => "calculate_average",
            Tool::RunSignificanceTest => "run_significance_test",
            Tool::RunCorrelation => "run_correlation",
        }
    }

    pub fn from_name(name: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tool::PlotTimeSeries => "Plots a time series chart of expenses. Can filter by category, year, range of years, or recent months. Returns a figure and a summary message.",
            Tool::PlotPieChart => "Plots a pie chart showing expense breakdown. Can show major categories, or sub-categories within a major category or specific category.",
            Tool::PlotComparison => "Contrasts spending between two years as a scatter plot, optionally for one category.",
            Tool::PlotStackedBar => "Plots a stacked bar chart of major categories, either month by month for one year or side by side for two years.",
            Tool::CalculateSum => "Calculates the total amount spent, optionally filtered by category, year and remark keyword.",
            Tool::CalculateAverage => "Calculates the average transaction amount, optionally filtered by category, year and remark keyword.",
            Tool::RunSignificanceTest => "Runs Welch's t-test on transaction amounts between two years to see whether spending changed significantly.",
            Tool::RunCorrelation => "Computes the Pearson correlation between two numeric columns.",
        }
    }

    /// Parameter order when arguments are passed positionally after `df`.
    pub fn positional_params(&self) -> &'static [&'static str] {
        match self {
            Tool::PlotTimeSeries => &[
                "category",
                "major_category",
                "year",
                "start_year",
                "end_year",
                "months",
                "title",
            ],
            Tool::PlotPieChart => &["year", "major_category", "title"],
            Tool::PlotComparison => &["category", "major_category", "y1", "y2", "title"],
            Tool::PlotStackedBar => &["year", "y1", "y2", "mode", "title"],
            Tool::CalculateSum | Tool::CalculateAverage => {
                &["category", "major_category", "year", "remarks"]
            }
            Tool::RunSignificanceTest => &["category", "major_category", "y1", "y2"],
            Tool::RunCorrelation => &["col1", "col2"],
        }
    }

    pub fn parameters_schema(&self) -> Result<Value> {
        match self {
            Tool::PlotTimeSeries => parameters_schema::<TimeSeriesArgs>(),
            Tool::PlotPieChart => parameters_schema::<PieChartArgs>(),
            Tool::PlotComparison => parameters_schema::<ComparisonArgs>(),
            Tool::PlotStackedBar => parameters_schema::<StackedBarArgs>(),
            Tool::CalculateSum | Tool::CalculateAverage => parameters_schema::<TotalArgs>(),
            Tool::RunSignificanceTest => parameters_schema::<SignificanceArgs>(),
            Tool::RunCorrelation => parameters_schema::<CorrelationArgs>(),
        }
    }

    pub fn run(&self, arguments: Map<String, Value>, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
        match self {
            Tool::PlotTimeSeries => plot_time_series(self.args(arguments)?, ctx),
            Tool::PlotPieChart => plot_pie_chart(self.args(arguments)?, ctx),
            Tool::PlotComparison => plot_comparison(self.args(arguments)?, ctx),
            Tool::PlotStackedBar => plot_stacked_bar(self.args(arguments)?, ctx),
            Tool::CalculateSum => calculate_sum(self.args(arguments)?, ctx),
            Tool::CalculateAverage => calculate_average(self.args(arguments)?, ctx),
            Tool::RunSignificanceTest => run_significance_test(self.args(arguments)?, ctx),
            Tool::RunCorrelation => run_correlation(self.args(arguments)?, ctx),
        }
    }

    fn args<T: DeserializeOwned>(&self, arguments: Map<String, Value>) -> Result<T> {
        serde_json::from_value(Value::Object(arguments)).map_err(|e| {
            ExpenseError::InvalidToolArguments {
                tool: self.name().to_string(),
                details: e.to_string(),
            }
        })
    }
}

/// Parameter schema without `$ref`s, the way function-calling models expect it.
fn parameters_schema<T: JsonSchema>() -> Result<Value> {
    let root = SchemaSettings::draft07()
        .with(|settings| {
            settings.inline_subschemas = true;
            settings.option_add_null_type = false;
        })
        .into_generator()
        .into_root_schema_for::<T>();

    let mut schema = serde_json::to_value(root)?;
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
        object.remove("definitions");
    }
    Ok(schema)
}

/// Function-calling catalogue for every tool, for the code-generation prompt.
pub fn tool_definitions() -> Result<Value> {
    let mut definitions = Vec::with_capacity(Tool::ALL.len());
    for tool in Tool::ALL {
        definitions.push(json!({
            "type": "function",
            "function": {
                "name": tool.name(),
                "description": tool.description(),
                "parameters": tool.parameters_schema()?,
            }
        }));
    }
    Ok(Value::Array(definitions))
}

/// Rounds like the message templates expect: `1500.0`, `1234.57`.
pub fn round_repr(value: f64, places: i32) -> String {
    let factor = 10f64.powi(places);
    let rounded = (value * factor).round() / factor;
    if rounded.fract() == 0.0 {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    }
}

fn label(category: &Option<String>, major_category: &Option<String>) -> String {
    category
        .clone()
        .or_else(|| major_category.clone())
        .unwrap_or_else(|| "Total".to_string())
}

fn in_year(records: &[TransactionRecord], year: i32) -> Vec<TransactionRecord> {
    records.iter().filter(|r| r.date.year() == year).cloned().collect()
}

fn by_category(
    records: &[TransactionRecord],
    category: &Option<String>,
    major_category: &Option<String>,
) -> Vec<TransactionRecord> {
    select_category(records, category.as_deref(), major_category.as_deref())
}

fn plot_time_series(args: TimeSeriesArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
    let mut data = match (args.year, args.start_year, args.end_year) {
        (Some(year), _, _) => in_year(ctx.records, year),
        (None, Some(start), Some(end)) => ctx
            .records
            .iter()
            .filter(|r| (start..=end).contains(&r.date.year()))
            .cloned()
            .collect(),
        _ => ctx.records.to_vec(),
    };
    data = by_category(&data, &args.category, &args.major_category);

    if let Some(months) = args.months.filter(|m| *m > 0) {
        let cutoff = ctx.today.checked_sub_months(Months::new(months as u32));
        if let Some(cutoff) = cutoff {
            data.retain(|r| r.date >= cutoff);
        }
    }

    let label = label(&args.category, &args.major_category);
    if data.is_empty() {
        return Ok(ToolOutput::text(format!(
            "No spending data found for {} in the specified period.",
            label
        )));
    }

    let mut series = ChartSeries::new(label.clone());
    for day in daily_totals(&data) {
        series.push(day.date.format("%Y-%m-%d").to_string(), day.total);
    }
    let title = args
        .title
        .unwrap_or_else(|| format!("{} Spending Over Time ({})", label, ctx.currency));
    let fig = ChartSpec::new(ChartKind::Line, title)
        .with_axes("Date", "Expense")
        .with_series(series);

    let mut message = format!("Time-series plot for {} expenses", label);
    if let Some(year) = args.year {
        message.push_str(&format!(" in {}", year));
    } else if let (Some(start), Some(end)) = (args.start_year, args.end_year) {
        message.push_str(&format!(" from {} to {}", start, end));
    }
    if let Some(months) = args.months {
        message.push_str(&format!(" for the past {} months", months));
    }
    message.push_str(" has been generated.");

    Ok(ToolOutput::chart(fig, message))
}

fn plot_pie_chart(args: PieChartArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
    let data = match args.year {
        Some(year) => in_year(ctx.records, year),
        None => ctx.records.to_vec(),
    };

    let (data, key, default_title, mut message) = if let Some(major) = &args.major_category {
        (
            select_category(&data, None, Some(major.as_str())),
            GroupKey::RawCategory,
            format!("{} Breakdown ({})", major, ctx.currency),
            format!("Pie chart showing breakdown of {} expenses", major),
        )
    } else if let Some(category) = &args.category {
        (
            select_category(&data, Some(category.as_str()), None),
            GroupKey::RawCategory,
            format!("{} Breakdown ({})", category, ctx.currency),
            format!("Pie chart showing {} expenses", category),
        )
    } else {
        (
            data,
            GroupKey::MappedCategory,
            format!("Major Category Breakdown ({})", ctx.currency),
            "Pie chart showing major category breakdown".to_string(),
        )
    };

    if data.is_empty() {
        return Ok(ToolOutput::text(format!(
            "No data found to create a pie chart for {}.",
            args.major_category.as_deref().unwrap_or("Total")
        )));
    }

    if let Some(year) = args.year {
        message.push_str(&format!(" for {}", year));
    }
    message.push_str(" has been generated.");

    let mut series = ChartSeries::new("Expense");
    for group in group_by_ordered(&data, |r| key.key_for(r), SortOrder::TotalDescending) {
        series.push(group.key, group.total);
    }
    let fig = ChartSpec::new(ChartKind::Pie, args.title.unwrap_or(default_title)).with_series(series);

    Ok(ToolOutput::chart(fig, message))
}

fn missing_years(tool: Tool) -> ExpenseError {
    ExpenseError::InvalidToolArguments {
        tool: tool.name().to_string(),
        details: "both y1 and y2 are required".to_string(),
    }
}

fn plot_comparison(args: ComparisonArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
    let (Some(y1), Some(y2)) = (args.y1, args.y2) else {
        return Err(missing_years(Tool::PlotComparison));
    };

    let in_years: Vec<TransactionRecord> = ctx
        .records
        .iter()
        .filter(|r| r.date.year() == y1 || r.date.year() == y2)
        .cloned()
        .collect();
    let mut data = by_category(&in_years, &args.category, &args.major_category);

    let label = label(&args.category, &args.major_category);
    if data.is_empty() {
        return Ok(ToolOutput::text(format!(
            "No data found to compare {} expenses between {} and {}.",
            label, y1, y2
        )));
    }

    data.sort_by_key(|r| r.date);
    let title = args
        .title
        .unwrap_or_else(|| format!("{} Comparison: {} vs {} ({})", label, y1, y2, ctx.currency));
    let mut fig = ChartSpec::new(ChartKind::Scatter, title).with_axes("Date", "Expense");
    for year in [y1, y2] {
        let mut series = ChartSeries::new(year.to_string());
        for record in data.iter().filter(|r| r.date.year() == year) {
            series.push(record.date.format("%Y-%m-%d").to_string(), record.amount);
        }
        fig = fig.with_series(series);
    }

    Ok(ToolOutput::chart(
        fig,
        format!(
            "Comparison plot for {} expenses between {} and {} has been generated.",
            label, y1, y2
        ),
    ))
}

type TimeKey = fn(&TransactionRecord) -> String;

fn month_label(record: &TransactionRecord) -> String {
    record.date.format("%Y-%m").to_string()
}

fn year_label(record: &TransactionRecord) -> String {
    record.date.year().to_string()
}

fn plot_stacked_bar(args: StackedBarArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
    let (data, time_key, message, period): (Vec<TransactionRecord>, TimeKey, String, String) =
        match (args.mode, args.year, args.y1, args.y2) {
            (StackMode::Monthly, Some(year), _, _) => (
                in_year(ctx.records, year),
                month_label,
                format!("Monthly stacked bar chart for {} has been generated.", year),
                year.to_string(),
            ),
            (StackMode::Yearly, _, Some(y1), Some(y2)) => (
                ctx.records
                    .iter()
                    .filter(|r| r.date.year() == y1 || r.date.year() == y2)
                    .cloned()
                    .collect(),
                year_label,
                format!(
                    "Yearly comparison stacked bar chart for {} vs {} has been generated.",
                    y1, y2
                ),
                format!("{} vs {}", y1, y2),
            ),
            _ => return Ok(ToolOutput::text("Invalid parameters for stacked bar")),
        };

    if data.is_empty() {
        return Ok(ToolOutput::text(
            "No data found for the requested stacked bar chart breakdown.",
        ));
    }

    let mut cells: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for record in &data {
        *cells
            .entry(record.mapped_category.clone())
            .or_default()
            .entry(time_key(record))
            .or_insert(0.0) += record.amount;
    }

    let title = args
        .title
        .unwrap_or_else(|| format!("{} Breakdown ({})", period, ctx.currency));
    let mut fig = ChartSpec::new(ChartKind::StackedBar, title).with_axes("Time", "Expense");
    for (category, totals) in cells {
        let mut series = ChartSeries::new(category);
        for (time, total) in totals {
            series.push(time, total);
        }
        fig = fig.with_series(series);
    }

    Ok(ToolOutput::chart(fig, message))
}

/// Records selected by year, category and remark keyword, plus the label used
/// in messages (the keyword when given, else the category).
fn select_for_totals(args: &TotalArgs, ctx: &ToolContext<'_>) -> (Vec<TransactionRecord>, String) {
    let data = match args.year {
        Some(year) => in_year(ctx.records, year),
        None => ctx.records.to_vec(),
    };
    let mut data = by_category(&data, &args.category, &args.major_category);
    if let Some(keyword) = args.remarks.as_deref().filter(|k| !k.trim().is_empty()) {
        data = search_remarks(&data, keyword);
    }
    let label = args
        .remarks
        .clone()
        .unwrap_or_else(|| label(&args.category, &args.major_category));
    (data, label)
}

fn calculate_sum(args: TotalArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
    let (data, label) = select_for_totals(&args, ctx);
    if data.is_empty() {
        return Ok(ToolOutput::text(format!(
            "No transactions found for {} in {}.",
            label,
            args.year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "the requested period".to_string())
        )));
    }

    let total: f64 = data.iter().map(|r| r.amount).sum();
    Ok(ToolOutput::text(format!(
        "Total {} in {}: {}",
        label,
        args.year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "all time".to_string()),
        round_repr(total, 2)
    )))
}

fn calculate_average(args: TotalArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
    let (data, label) = select_for_totals(&args, ctx);
    if data.is_empty() {
        return Ok(ToolOutput::text(format!(
            "No transactions found for {} calculation in {}.",
            label,
            args.year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "the requested period".to_string())
        )));
    }

    let average = data.iter().map(|r| r.amount).sum::<f64>() / data.len() as f64;
    Ok(ToolOutput::text(format!(
        "Average {} in {}: {}",
        label,
        args.year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "all time".to_string()),
        round_repr(average, 2)
    )))
}

fn run_significance_test(args: SignificanceArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
    let (Some(y1), Some(y2)) = (args.y1, args.y2) else {
        return Err(missing_years(Tool::RunSignificanceTest));
    };

    // Unlike the totals, the category wins outright here with no fallback.
    let sample = |year: i32| -> Vec<f64> {
        let data = in_year(ctx.records, year);
        let data = match (&args.category, &args.major_category) {
            (Some(category), _) => select_category(&data, Some(category.as_str()), None),
            (None, Some(major)) => select_category(&data, None, Some(major.as_str())),
            (None, None) => data,
        };
        data.iter().map(|r| r.amount).collect()
    };
    let a = sample(y1);
    let b = sample(y2);

    let mean = |values: &[f64]| -> String {
        if values.is_empty() {
            "n/a".to_string()
        } else {
            round_repr(values.iter().sum::<f64>() / values.len() as f64, 2)
        }
    };

    let message = match welch_t_test(&a, &b) {
        Some(test) => format!(
            "Avg {}: {}, Avg {}: {} | Difference is {} (p={})",
            y1,
            round_repr(test.mean_a, 2),
            y2,
            round_repr(test.mean_b, 2),
            if test.is_significant(0.05) {
                "significant"
            } else {
                "not significant"
            },
            round_repr(test.p_value, 4)
        ),
        None => format!(
            "Avg {}: {}, Avg {}: {} | Not enough data for a significance test",
            y1,
            mean(&a),
            y2,
            mean(&b)
        ),
    };
    Ok(ToolOutput::text(message))
}

fn column_value(record: &TransactionRecord, column: &str) -> Option<Option<f64>> {
    match column.trim().to_lowercase().as_str() {
        "expense" | "amount" => Some(Some(record.amount)),
        "onetime" => Some(Some(if record.is_one_time { 1.0 } else { 0.0 })),
        "for others" => Some(Some(if record.is_for_others { 1.0 } else { 0.0 })),
        _ => {
            let (_, cell) = record
                .extra
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column.trim()))?;
            Some(match cell {
                RawCell::Number(n) => Some(*n),
                RawCell::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                RawCell::Text(_) => {
                    let parsed = parse_amount_cell(cell);
                    (parsed != 0.0).then_some(parsed)
                }
                _ => None,
            })
        }
    }
}

fn run_correlation(args: CorrelationArgs, ctx: &ToolContext<'_>) -> Result<ToolOutput> {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut seen = (false, false);

    for record in ctx.records {
        let x = column_value(record, &args.col1);
        let y = column_value(record, &args.col2);
        seen.0 |= x.is_some();
        seen.1 |= y.is_some();
        if let (Some(Some(x)), Some(Some(y))) = (x, y) {
            xs.push(x);
            ys.push(y);
        }
    }

    for (present, column) in [(seen.0, &args.col1), (seen.1, &args.col2)] {
        if !present && !ctx.records.is_empty() {
            return Err(ExpenseError::InvalidToolArguments {
                tool: Tool::RunCorrelation.name().to_string(),
                details: format!("unknown numeric column '{}'", column),
            });
        }
    }

    let message = match pearson(&xs, &ys) {
        Some(r) => format!(
            "Correlation between {} and {}: {}",
            args.col1,
            args.col2,
            round_repr(r, 4)
        ),
        None => format!(
            "Correlation between {} and {}: not applicable",
            args.col1, args.col2
        ),
    };
    Ok(ToolOutput::text(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn records() -> Vec<TransactionRecord> {
        vec![
            TransactionRecord::new(date(2023, 3, 1), 800.0, "grocery", "Food"),
            TransactionRecord::new(date(2023, 3, 9), 1200.0, "grocery", "Food"),
            TransactionRecord::new(date(2023, 4, 2), 300.0, "taxi", "Transportation"),
            TransactionRecord::new(date(2024, 1, 1), 1000.0, "grocery", "Food"),
            TransactionRecord::new(date(2024, 1, 1), 500.0, "snacks", "Food")
                .with_remark("Convenience store"),
            TransactionRecord::new(date(2024, 2, 5), 2000.0, "housing", "Housing and Utilities"),
        ]
    }

    fn run(tool: Tool, arguments: Value, records: &[TransactionRecord]) -> Result<ToolOutput> {
        let ctx = ToolContext {
            records,
            today: date(2024, 3, 1),
            currency: "JPY",
        };
        let Value::Object(map) = arguments else {
            panic!("arguments must be an object");
        };
        tool.run(map, &ctx)
    }

    #[test]
    fn test_calculate_sum_messages() {
        let data = records();
        let out = run(Tool::CalculateSum, json!({"category": "grocery", "year": 2024}), &data).unwrap();
        assert_eq!(out.message, "Total grocery in 2024: 1000.0");
        assert!(out.fig.is_none());

        let out = run(Tool::CalculateSum, json!({"remarks": "convenience"}), &data).unwrap();
        assert_eq!(out.message, "Total convenience in all time: 500.0");

        let out = run(Tool::CalculateSum, json!({"category": "gym", "year": "2024"}), &data).unwrap();
        assert_eq!(out.message, "No transactions found for gym in 2024.");
    }

    #[test]
    fn test_blank_category_means_all() {
        let data = vec![
            TransactionRecord::new(date(2024, 1, 1), 100.0, "grocery", "Food"),
            TransactionRecord::new(date(2024, 1, 2), 50.0, "taxi", "Transportation"),
        ];
        let out = run(Tool::CalculateSum, json!({"category": "", "year": 2024}), &data).unwrap();
        assert_eq!(out.message, "Total Total in 2024: 150.0");

        let out = run(
            Tool::CalculateAverage,
            json!({"major_category": " ", "remarks": ""}),
            &data,
        )
        .unwrap();
        assert_eq!(out.message, "Average Total in all time: 75.0");

        let out = run(Tool::PlotPieChart, json!({"category": "", "major_category": ""}), &data).unwrap();
        assert_eq!(out.fig.unwrap().point_count(), 2);

        let out = run(
            Tool::RunSignificanceTest,
            json!({"category": "", "major_category": "Food", "y1": 2023, "y2": 2024}),
            &data,
        )
        .unwrap();
        assert!(out.message.starts_with("Avg 2023: n/a, Avg 2024: 100.0"));
    }

    #[test]
    fn test_category_falls_back_to_major() {
        let data = records();
        let out = run(
            Tool::CalculateAverage,
            json!({"category": "bento", "major_category": "food", "year": 2023}),
            &data,
        )
        .unwrap();
        assert_eq!(out.message, "Average bento in 2023: 1000.0");
    }

    #[test]
    fn test_time_series_months_window() {
        let data = records();
        let out = run(Tool::PlotTimeSeries, json!({"months": 3}), &data).unwrap();
        let fig = out.fig.unwrap();
        assert_eq!(fig.kind, ChartKind::Line);
        assert_eq!(fig.title, "Total Spending Over Time (JPY)");
        assert_eq!(fig.point_count(), 2);
        assert_eq!(
            out.message,
            "Time-series plot for Total expenses for the past 3 months has been generated."
        );
    }

    #[test]
    fn test_pie_chart_groups() {
        let data = records();
        let out = run(Tool::PlotPieChart, json!({"year": 2024}), &data).unwrap();
        let fig = out.fig.unwrap();
        assert_eq!(fig.series[0].points[0].x, "Housing and Utilities");
        assert_eq!(fig.series[0].total(), 3500.0);
        assert_eq!(out.message, "Pie chart showing major category breakdown for 2024 has been generated.");

        let out = run(Tool::PlotPieChart, json!({"major_category": "Fitness"}), &data).unwrap();
        assert!(out.fig.is_none());
        assert_eq!(out.message, "No data found to create a pie chart for Fitness.");
    }

    #[test]
    fn test_stacked_bar_modes() {
        let data = records();
        let out = run(Tool::PlotStackedBar, json!({"mode": "yearly", "y1": 2023, "y2": 2024}), &data).unwrap();
        let fig = out.fig.unwrap();
        assert_eq!(fig.series.len(), 3);
        assert_eq!(fig.title, "2023 vs 2024 Breakdown (JPY)");

        let out = run(Tool::PlotStackedBar, json!({"mode": "yearly"}), &data).unwrap();
        assert_eq!(out.message, "Invalid parameters for stacked bar");
    }

    #[test]
    fn test_comparison_requires_years() {
        let data = records();
        let err = run(Tool::PlotComparison, json!({"y1": 2023}), &data).unwrap_err();
        assert!(matches!(err, ExpenseError::InvalidToolArguments { .. }));

        let out = run(Tool::PlotComparison, json!({"major_category": "Food", "y1": 2023, "y2": 2024}), &data).unwrap();
        assert_eq!(out.fig.unwrap().series.len(), 2);
    }

    #[test]
    fn test_significance_and_correlation() {
        let data = records();
        let out = run(Tool::RunSignificanceTest, json!({"category": "grocery", "y1": 2023, "y2": 2024}), &data).unwrap();
        assert_eq!(
            out.message,
            "Avg 2023: 1000.0, Avg 2024: 1000.0 | Not enough data for a significance test"
        );

        let out = run(Tool::RunCorrelation, json!({"col1": "Expense", "col2": "onetime"}), &data).unwrap();
        assert!(out.message.starts_with("Correlation between Expense and onetime: "));

        let err = run(Tool::RunCorrelation, json!({"col1": "Expense", "col2": "mood"}), &data).unwrap_err();
        assert!(matches!(err, ExpenseError::InvalidToolArguments { .. }));
    }

    #[test]
    fn test_unknown_argument_is_rejected() {
        let data = records();
        let err = run(Tool::CalculateSum, json!({"colour": "red"}), &data).unwrap_err();
        assert!(matches!(err, ExpenseError::InvalidToolArguments { tool, .. } if tool == "calculate_sum"));
    }

    #[test]
    fn test_tool_definitions() {
        let definitions = tool_definitions().unwrap();
        let definitions = definitions.as_array().unwrap();
        assert_eq!(definitions.len(), 8);
        let sum = &definitions[4]["function"];
        assert_eq!(sum["name"], "calculate_sum");
        assert_eq!(sum["parameters"]["type"], "object");
        assert!(sum["parameters"]["properties"]["remarks"].is_object());
        assert!(sum["parameters"].get("$schema").is_none());
    }

    #[test]
    fn test_round_repr() {
        assert_eq!(round_repr(1500.0, 2), "1500.0");
        assert_eq!(round_repr(1234.5678, 2), "1234.57");
        assert_eq!(round_repr(0.123456, 4), "0.1235");
    }
}
