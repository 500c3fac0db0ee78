use super::prompts::{render_analysis_prompt, render_summary_prompt, summary_user_message};
use super::types::{AnalysisOptions, AnalysisRequest, AnalysisResponse, DEFAULT_MODEL};
use crate::error::{ExpenseError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Remote service that runs a whole analysis request.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse>;

    /// `true` when the backend answers its health endpoint.
    async fn health(&self) -> bool;
}

/// Language-model service that writes analysis snippets and summaries.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate_snippet(&self, request: &AnalysisRequest, today: NaiveDate)
        -> Result<String>;

    async fn summarize(&self, request: &AnalysisRequest, result: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct HttpAnalysisBackend {
    client: Client,
    base_url: String,
}

impl HttpAnalysisBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
}

#[async_trait]
impl AnalysisBackend for HttpAnalysisBackend {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse> {
        let url = format!("{}/analyze", self.base_url);
        debug!("POST {} ({} records)", url, request.data.len());

        let res = self.client.post(&url).json(request).send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await?;
            return Err(ExpenseError::BackendStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(res.json::<AnalysisResponse>().await?)
    }

    async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(res) if res.status().is_success() => res
                .json::<HealthBody>()
                .await
                .map(|body| body.status == "ok")
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a AnalysisOptions>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Ollama chat client (`POST {host}/api/chat`, non-streaming).
#[derive(Clone)]
pub struct OllamaCodeGenerator {
    client: Client,
    base_url: String,
}

impl OllamaCodeGenerator {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Reads `OLLAMA_HOST`; `None` when it is unset.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        Some(Self::new(&host))
    }

    async fn chat(
        &self,
        model: &str,
        system: &str,
        user: &str,
        options: Option<&AnalysisOptions>,
    ) -> Result<String> {
        let model = if model.trim().is_empty() {
            DEFAULT_MODEL
        } else {
            model
        };
        let body = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
            options,
        };

        let res = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await?;
            return Err(ExpenseError::CodeGeneration(format!(
                "chat request failed (status {}): {}",
                status, body
            )));
        }

        let parsed: ChatResponse = res.json().await?;
        Ok(parsed.message.content.trim().to_string())
    }
}

#[async_trait]
impl CodeGenerator for OllamaCodeGenerator {
    async fn generate_snippet(
        &self,
        request: &AnalysisRequest,
        today: NaiveDate,
    ) -> Result<String> {
        let system =
            render_analysis_prompt(&request.metadata, &request.prompt, &request.currency, today)?;
        debug!("Requesting snippet from {}", request.model);
        self.chat(
            &request.model,
            &system,
            &request.prompt,
            request.options.as_ref(),
        )
        .await
    }

    async fn summarize(&self, request: &AnalysisRequest, result: &str) -> Result<String> {
        let system = render_summary_prompt(result, &request.currency);
        let user = summary_user_message(&request.prompt, result);
        debug!("Summarizing with {}", request.summary_model());
        self.chat(
            request.summary_model(),
            &system,
            &user,
            request.options.as_ref(),
        )
        .await
    }
}
