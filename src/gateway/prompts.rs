// Prompts for the local analysis stage

use crate::analysis::tool_definitions;
use crate::error::Result;
use chrono::NaiveDate;

pub const SYSTEM_PROMPT_ANALYSIS: &str = r#"
You are an expense analysis assistant. You answer questions about a personal
expense dataset by writing a short analysis snippet that calls the tools below.

## DATASET
The records are already loaded as `df`. Column names and types, the raw
categories and the major categories present in the data:

{metadata}

Every `Expense` value is in {currency}. Today's date is {current_date}.
"This year" means {current_year}; "last year" means {last_year}.

## TOOLS
{tools}

## OUTPUT FORMAT
- Reply with code only, inside one ```python block.
- Each line is an assignment of a single tool call, for example:
  fig, result = plot_pie_chart(df, year=2024)
  _, result = calculate_sum(df, category='grocery', year=2024)
- Always pass `df` as the first argument.
- Use only string, integer, float, True, False and None literals as arguments.
- Store the answer in `result` and any chart in `fig`.
- Use raw category names from the list above for `category` and major
  category names for `major_category`.

## QUESTION
{prompt}
"#;

pub const SYSTEM_PROMPT_SUMMARY: &str = r#"
You turn the output of an expense analysis into a short answer for the user.

- Answer in one paragraph of at most three sentences.
- Quote amounts exactly as they appear in the result and state them in {currency}.
- Do not invent numbers that are not in the result.
- If the result says there is not enough data, say so plainly.

Result:
{result}
"#;

/// Replaces each `{key}` of `template` in a single pass, so substituted
/// values are never scanned for further placeholders.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let filled = values.iter().find_map(|(key, value)| {
            after
                .strip_prefix(key)
                .and_then(|tail| tail.strip_prefix('}'))
                .map(|tail| (*value, tail))
        });
        match filled {
            Some((value, tail)) => {
                out.push_str(value);
                rest = tail;
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Fills in the code-generation prompt.
pub fn render_analysis_prompt(
    metadata: &str,
    prompt: &str,
    currency: &str,
    today: NaiveDate,
) -> Result<String> {
    let tools = serde_json::to_string_pretty(&tool_definitions()?)?;
    let year = chrono::Datelike::year(&today);
    let current_date = today.format("%Y-%m-%d").to_string();
    let current_year = year.to_string();
    let last_year = (year - 1).to_string();
    let rendered = fill(
        SYSTEM_PROMPT_ANALYSIS,
        &[
            ("metadata", metadata),
            ("currency", currency),
            ("current_date", &current_date),
            ("current_year", &current_year),
            ("last_year", &last_year),
            ("tools", &tools),
            ("prompt", prompt),
        ],
    );
    Ok(rendered.trim().to_string())
}

pub fn render_summary_prompt(result: &str, currency: &str) -> String {
    fill(
        SYSTEM_PROMPT_SUMMARY,
        &[("currency", currency), ("result", result)],
    )
    .trim()
    .to_string()
}

/// User turn of the summary exchange.
pub fn summary_user_message(question: &str, result: &str) -> String {
    format!("Question: {}\nResult: {}", question, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_prompt_fills_placeholders() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let rendered =
            render_analysis_prompt("{\"columns\": []}", "Food spend this year?", "JPY", today)
                .unwrap();

        assert!(rendered.contains("Today's date is 2025-03-14."));
        assert!(rendered.contains("\"This year\" means 2025"));
        assert!(rendered.contains("\"last year\" means 2024"));
        assert!(rendered.contains("run_significance_test"));
        assert!(rendered.ends_with("Food spend this year?"));
        assert!(!rendered.contains("{metadata}"));
    }

    #[test]
    fn test_user_text_is_inserted_verbatim() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let metadata = "{\"categories\": [\"{tools}\", \"{currency}\"]}";
        let rendered = render_analysis_prompt(metadata, "What is {prompt}?", "JPY", today).unwrap();

        assert!(rendered.contains("[\"{tools}\", \"{currency}\"]"));
        assert!(rendered.ends_with("What is {prompt}?"));
        assert_eq!(rendered.matches("run_significance_test").count(), 1);

        let summary = render_summary_prompt("Total {currency} in 2024: 5.0", "USD");
        assert!(summary.ends_with("Total {currency} in 2024: 5.0"));
    }

    #[test]
    fn test_summary_prompt() {
        let rendered = render_summary_prompt("Correlation between a and b: 0.5", "USD");
        assert!(rendered.contains("in USD"));
        assert!(rendered.ends_with("Correlation between a and b: 0.5"));
        assert_eq!(
            summary_user_message("Is it related?", "0.5"),
            "Question: Is it related?\nResult: 0.5"
        );
    }
}
