use crate::analysis::ChartSpec;
use crate::error::Result;
use crate::ingestion::Dataset;
use crate::schema::TransactionRecord;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_CURRENCY: &str = "JPY";
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 60;

/// Sampling options forwarded verbatim to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub data: Vec<TransactionRecord>,
    pub prompt: String,
    /// Pretty-printed dataset metadata.
    pub metadata: String,
    pub currency: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnalysisOptions>,
}

impl AnalysisRequest {
    pub fn new(
        dataset: &Dataset,
        prompt: impl Into<String>,
        currency: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            data: dataset.records().to_vec(),
            prompt: prompt.into(),
            metadata: dataset.metadata().to_prompt_string()?,
            currency: currency.into(),
            model: model.into(),
            chat_model: None,
            options: None,
        })
    }

    pub fn with_chat_model(mut self, chat_model: impl Into<String>) -> Self {
        self.chat_model = Some(chat_model.into());
        self
    }

    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Model used for the summary step; the code model when none is set.
    pub fn summary_model(&self) -> &str {
        self.chat_model.as_deref().unwrap_or(&self.model)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub result: Option<String>,
    /// Serialized chart specification.
    #[serde(default)]
    pub fig: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalysisResponse {
    pub fn execution_error(message: impl std::fmt::Display, code: impl Into<String>) -> Self {
        Self {
            error: Some(format!("Execution error: {}", message)),
            code: Some(code.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Decodes `fig` when it holds a chart produced by the local sandbox.
    pub fn chart(&self) -> Option<ChartSpec> {
        self.fig
            .as_deref()
            .and_then(|json| ChartSpec::from_json(json).ok())
    }
}

/// Why the remote stage handed over to local execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    #[error("no remote analysis backend is configured")]
    NotConfigured,

    #[error("remote backend unreachable: {message}")]
    Unreachable { message: String },

    #[error("remote backend timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("remote backend answered with status {status}")]
    BadStatus { status: u16, body: String },
}

/// Outcome of the first stage. `Fallback` means the caller should run the
/// local stage next.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStage {
    Completed(AnalysisResponse),
    Fallback(FallbackReason),
}

/// Progress of one query; every event carries the time since the query began.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    RemoteStarted { elapsed_ms: u64 },
    RemoteCompleted { elapsed_ms: u64 },
    FallingBack { reason: FallbackReason, elapsed_ms: u64 },
    SandboxReady { elapsed_ms: u64 },
    GeneratingCode { elapsed_ms: u64 },
    Executing { elapsed_ms: u64 },
    Summarizing { elapsed_ms: u64 },
    Completed { elapsed_ms: u64 },
    Failed { reason: String, elapsed_ms: u64 },
}

impl GatewayEvent {
    pub fn elapsed_ms(&self) -> u64 {
        match self {
            GatewayEvent::RemoteStarted { elapsed_ms }
            | GatewayEvent::RemoteCompleted { elapsed_ms }
            | GatewayEvent::FallingBack { elapsed_ms, .. }
            | GatewayEvent::SandboxReady { elapsed_ms }
            | GatewayEvent::GeneratingCode { elapsed_ms }
            | GatewayEvent::Executing { elapsed_ms }
            | GatewayEvent::Summarizing { elapsed_ms }
            | GatewayEvent::Completed { elapsed_ms }
            | GatewayEvent::Failed { elapsed_ms, .. } => *elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// `None` skips the remote stage entirely.
    pub backend_url: Option<String>,
    pub ollama_host: String,
    pub model: String,
    pub chat_model: Option<String>,
    pub backend_timeout: Duration,
    pub sandbox_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            chat_model: None,
            backend_timeout: Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS),
            sandbox_timeout: Duration::from_secs(DEFAULT_SANDBOX_TIMEOUT_SECS),
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = env_non_empty(name)
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl GatewayConfig {
    /// Reads `EXPENSE_BACKEND_URL`, `OLLAMA_HOST`, `OLLAMA_MODEL`,
    /// `OLLAMA_CHAT_MODEL`, `EXPENSE_BACKEND_TIMEOUT_SECS` and
    /// `EXPENSE_SANDBOX_TIMEOUT_SECS`; unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self {
            backend_url: env_non_empty("EXPENSE_BACKEND_URL"),
            ollama_host: env_non_empty("OLLAMA_HOST")
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            model: env_non_empty("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            chat_model: env_non_empty("OLLAMA_CHAT_MODEL"),
            backend_timeout: env_secs("EXPENSE_BACKEND_TIMEOUT_SECS", DEFAULT_BACKEND_TIMEOUT_SECS),
            sandbox_timeout: env_secs("EXPENSE_SANDBOX_TIMEOUT_SECS", DEFAULT_SANDBOX_TIMEOUT_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_request_wire_shape() {
        let record = TransactionRecord::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            1000.0,
            "grocery",
            "Food",
        );
        let dataset = Dataset::from_records(vec![record]);
        let request = AnalysisRequest::new(&dataset, "How much on food?", "JPY", "llama3.2")
            .unwrap()
            .with_options(AnalysisOptions {
                temperature: Some(0.1),
                ..AnalysisOptions::default()
            });

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["data"][0]["Expense"], 1000.0);
        assert_eq!(json["data"][0]["major category"], "Food");
        assert_eq!(json["options"]["temperature"], 0.1);
        assert!(json["options"].get("top_k").is_none());
        assert!(json.get("chat_model").is_none());
        assert_eq!(request.summary_model(), "llama3.2");
        assert!(request.metadata.contains("\"grocery\""));
    }

    #[test]
    fn test_response_decoding() {
        let response: AnalysisResponse =
            serde_json::from_str(r#"{"result": "Total grocery in 2024: 1000.0", "fig": null, "code": "x"}"#)
                .unwrap();
        assert!(!response.is_error());
        assert!(response.chart().is_none());

        let failed = AnalysisResponse::execution_error("boom", "result = f(df)");
        assert_eq!(failed.error.as_deref(), Some("Execution error: boom"));
    }

    #[test]
    fn test_event_elapsed() {
        let event = GatewayEvent::FallingBack {
            reason: FallbackReason::NotConfigured,
            elapsed_ms: 42,
        };
        assert_eq!(event.elapsed_ms(), 42);
    }
}
