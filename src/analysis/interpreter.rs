use super::chart::ChartSpec;
use super::parser::{parse_snippet, Argument, Expression, Statement, ToolCall};
use super::tools::{Tool, ToolContext};
use crate::error::{ExpenseError, Result};
use crate::schema::TransactionRecord;
use chrono::NaiveDate;
use log::debug;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Name the loaded records are bound to inside a snippet.
pub const FRAME_NAME: &str = "df";

#[derive(Debug, Clone, PartialEq)]
enum Binding {
    Frame,
    Text(String),
    Chart(ChartSpec),
    Nothing,
}

/// What a snippet left in its `result` and `fig` variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub result: Option<String>,
    pub fig: Option<ChartSpec>,
}

/// Runs analysis snippets against one loaded set of records.
///
/// Only the tool catalogue is callable; a snippet cannot reach anything else.
#[derive(Debug, Clone)]
pub struct Interpreter {
    records: Vec<TransactionRecord>,
    today: NaiveDate,
    currency: String,
}

impl Interpreter {
    pub fn new(records: Vec<TransactionRecord>, today: NaiveDate) -> Self {
        Self {
            records,
            today,
            currency: "JPY".to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn execute(&self, code: &str) -> Result<Execution> {
        let snippet = parse_snippet(code)?;
        let ctx = ToolContext {
            records: &self.records,
            today: self.today,
            currency: &self.currency,
        };

        let mut scope: HashMap<String, Binding> = HashMap::new();
        scope.insert(FRAME_NAME.to_string(), Binding::Frame);

        for statement in &snippet.statements {
            self.run_statement(statement, &ctx, &mut scope)?;
        }

        let result = match scope.remove("result") {
            Some(Binding::Text(text)) => Some(text),
            Some(Binding::Chart(chart)) => Some(chart.title),
            _ => None,
        };
        let fig = match scope.remove("fig") {
            Some(Binding::Chart(chart)) => Some(chart),
            _ => None,
        };
        Ok(Execution { result, fig })
    }

    fn run_statement(
        &self,
        statement: &Statement,
        ctx: &ToolContext<'_>,
        scope: &mut HashMap<String, Binding>,
    ) -> Result<()> {
        let values = match &statement.expression {
            Expression::Call(call) if call.name == "print" => {
                debug!("Ignoring print on line {}", statement.line);
                return Ok(());
            }
            Expression::Call(call) => {
                let tool = Tool::from_name(&call.name)
                    .ok_or_else(|| ExpenseError::UnknownTool(call.name.clone()))?;
                let arguments = bind_arguments(tool, call)?;
                debug!("Line {}: {}({:?})", statement.line, tool.name(), arguments);
                let output = tool.run(arguments, ctx)?;
                let fig = output.fig.map(Binding::Chart).unwrap_or(Binding::Nothing);
                vec![fig, Binding::Text(output.message)]
            }
            Expression::Literal(value) => vec![literal_binding(value)],
            Expression::Name(name) => {
                let bound = scope.get(name).cloned().ok_or_else(|| ExpenseError::SnippetParse {
                    line: statement.line,
                    column: 1,
                    message: format!("name '{}' is not defined", name),
                })?;
                vec![bound]
            }
        };

        assign(statement, values, scope)
    }
}

fn literal_binding(value: &Value) -> Binding {
    match value {
        Value::Null => Binding::Nothing,
        Value::String(s) => Binding::Text(s.clone()),
        other => Binding::Text(other.to_string()),
    }
}

/// Tool calls yield `(fig, message)`. A single target takes the message
/// unless it is named `fig`.
fn assign(
    statement: &Statement,
    mut values: Vec<Binding>,
    scope: &mut HashMap<String, Binding>,
) -> Result<()> {
    let targets = &statement.targets;
    match (targets.len(), values.len()) {
        (0, _) => Ok(()),
        (1, 2) => {
            let message = values.pop().unwrap_or(Binding::Nothing);
            let fig = values.pop().unwrap_or(Binding::Nothing);
            let value = if targets[0] == "fig" { fig } else { message };
            bind(scope, &targets[0], value);
            Ok(())
        }
        (n, m) if n == m => {
            for (target, value) in targets.iter().zip(values) {
                bind(scope, target, value);
            }
            Ok(())
        }
        (n, m) => Err(ExpenseError::SnippetParse {
            line: statement.line,
            column: 1,
            message: format!("cannot unpack {} value(s) into {} target(s)", m, n),
        }),
    }
}

fn bind(scope: &mut HashMap<String, Binding>, target: &str, value: Binding) {
    if target != "_" {
        scope.insert(target.to_string(), value);
    }
}

/// Merges positional and keyword arguments into one keyword map.
fn bind_arguments(tool: Tool, call: &ToolCall) -> Result<Map<String, Value>> {
    let invalid = |details: String| ExpenseError::InvalidToolArguments {
        tool: tool.name().to_string(),
        details,
    };

    let mut positional = call.positional.iter().peekable();
    if matches!(positional.peek(), Some(Argument::Name(name)) if name == FRAME_NAME) {
        positional.next();
    }

    let params = tool.positional_params();
    let mut arguments = Map::new();
    for (idx, argument) in positional.enumerate() {
        let value = match argument {
            Argument::Literal(value) => value.clone(),
            Argument::Name(name) if name == FRAME_NAME => {
                return Err(invalid(format!("'{}' may only be the first argument", FRAME_NAME)))
            }
            Argument::Name(name) => return Err(invalid(format!("name '{}' is not defined", name))),
        };
        let param = params
            .get(idx)
            .ok_or_else(|| invalid(format!("takes at most {} positional arguments", params.len())))?;
        arguments.insert(param.to_string(), value);
    }

    for (key, value) in &call.keywords {
        if arguments.contains_key(key) {
            return Err(invalid(format!("got multiple values for argument '{}'", key)));
        }
        arguments.insert(key.clone(), value.clone());
    }
    Ok(arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::chart::ChartKind;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn interpreter() -> Interpreter {
        Interpreter::new(
            vec![
                TransactionRecord::new(date(2024, 1, 1), 1000.0, "grocery", "Food"),
                TransactionRecord::new(date(2024, 1, 1), 500.0, "snacks", "Food"),
                TransactionRecord::new(date(2024, 1, 9), 300.0, "taxi", "Transportation"),
            ],
            date(2024, 2, 1),
        )
    }

    #[test]
    fn test_captures_result_and_fig() {
        let execution = interpreter()
            .execute("```python\nfig, result = plot_pie_chart(df, year=2024)\n```")
            .unwrap();
        assert_eq!(execution.fig.unwrap().kind, ChartKind::Pie);
        assert_eq!(
            execution.result.as_deref(),
            Some("Pie chart showing major category breakdown for 2024 has been generated.")
        );
    }

    #[test]
    fn test_single_target_takes_message() {
        let execution = interpreter()
            .execute("result = calculate_sum(df, 'grocery', None, 2024)")
            .unwrap();
        assert_eq!(execution.result.as_deref(), Some("Total grocery in 2024: 1000.0"));
        assert!(execution.fig.is_none());
    }

    #[test]
    fn test_later_statements_overwrite() {
        let execution = interpreter()
            .execute(
                "fig, result = plot_time_series(df, major_category='Food')\n_, result = calculate_average(df)\nprint(result)",
            )
            .unwrap();
        assert!(execution.fig.is_some());
        assert_eq!(execution.result.as_deref(), Some("Average Total in all time: 600.0"));
    }

    #[test]
    fn test_literal_and_name_assignment() {
        let execution = interpreter().execute("answer = 'done'\nresult = answer").unwrap();
        assert_eq!(execution.result.as_deref(), Some("done"));

        let err = interpreter().execute("result = missing").unwrap_err();
        assert!(matches!(err, ExpenseError::SnippetParse { line: 1, .. }));
    }

    #[test]
    fn test_execution_errors() {
        let err = interpreter().execute("result = os_system(df)").unwrap_err();
        assert!(matches!(err, ExpenseError::UnknownTool(name) if name == "os_system"));

        let err = interpreter()
            .execute("result = calculate_sum(df, 'grocery', category='snacks')")
            .unwrap_err();
        assert!(matches!(err, ExpenseError::InvalidToolArguments { .. }));

        let err = interpreter().execute("a, b, c = calculate_sum(df)").unwrap_err();
        assert!(matches!(err, ExpenseError::SnippetParse { .. }));
    }

    #[test]
    fn test_json_tool_call() {
        let execution = interpreter()
            .execute(r#"{"name": "calculate_sum", "arguments": {"major_category": "Transportation"}}"#)
            .unwrap();
        assert_eq!(
            execution.result.as_deref(),
            Some("Total Transportation in all time: 300.0")
        );
    }
}
