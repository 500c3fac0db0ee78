use super::client::{AnalysisBackend, CodeGenerator, HttpAnalysisBackend, OllamaCodeGenerator};
use super::sandbox::{execute_on, SandboxSlot};
use super::types::{
    AnalysisRequest, AnalysisResponse, FallbackReason, GatewayConfig, GatewayEvent, RemoteStage,
};
use crate::analysis::strip_code_fences;
use crate::error::{ExpenseError, Result};
use crate::ingestion::Dataset;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Sender;
use tokio::time::timeout;

const NO_RESULT: &str = "Analysis complete.";

/// Releases the in-flight flag when the query finishes or its future is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Runs natural-language queries: remote backend first, local sandbox second.
pub struct ExecutionGateway {
    config: GatewayConfig,
    backend: Option<Arc<dyn AnalysisBackend>>,
    generator: Arc<dyn CodeGenerator>,
    sandbox: SandboxSlot,
    in_flight: AtomicBool,
    fixed_date: Option<NaiveDate>,
}

impl ExecutionGateway {
    pub fn new(
        config: GatewayConfig,
        backend: Option<Arc<dyn AnalysisBackend>>,
        generator: Arc<dyn CodeGenerator>,
    ) -> Self {
        Self {
            config,
            backend,
            generator,
            sandbox: SandboxSlot::new(),
            in_flight: AtomicBool::new(false),
            fixed_date: None,
        }
    }

    /// HTTP backend when `backend_url` is set, Ollama for code generation.
    pub fn from_config(config: GatewayConfig) -> Self {
        let backend = config
            .backend_url
            .as_deref()
            .map(|url| Arc::new(HttpAnalysisBackend::new(url)) as Arc<dyn AnalysisBackend>);
        let generator = Arc::new(OllamaCodeGenerator::new(&config.ollama_host));
        Self::new(config, backend, generator)
    }

    /// Pins "today" for prompts and relative dates.
    pub fn with_fixed_date(mut self, date: NaiveDate) -> Self {
        self.fixed_date = Some(date);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &SandboxSlot {
        &self.sandbox
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn today(&self) -> NaiveDate {
        self.fixed_date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// Builds a request with the configured models.
    pub fn request(&self, dataset: &Dataset, prompt: &str, currency: &str) -> Result<AnalysisRequest> {
        let mut request = AnalysisRequest::new(dataset, prompt, currency, self.config.model.as_str())?;
        request.chat_model = self.config.chat_model.clone();
        Ok(request)
    }

    /// First stage. Any failure of the remote backend becomes a fallback.
    pub async fn try_remote(&self, request: &AnalysisRequest) -> RemoteStage {
        let Some(backend) = &self.backend else {
            return RemoteStage::Fallback(FallbackReason::NotConfigured);
        };

        let limit = self.config.backend_timeout;
        match timeout(limit, backend.analyze(request)).await {
            Ok(Ok(response)) => RemoteStage::Completed(response),
            Ok(Err(ExpenseError::BackendStatus { status, body })) => {
                RemoteStage::Fallback(FallbackReason::BadStatus { status, body })
            }
            Ok(Err(e)) => RemoteStage::Fallback(FallbackReason::Unreachable {
                message: e.to_string(),
            }),
            Err(_) => RemoteStage::Fallback(FallbackReason::TimedOut {
                seconds: limit.as_secs(),
            }),
        }
    }

    fn begin_query(&self) -> Result<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ExpenseError::QueryInFlight)?;
        Ok(InFlightGuard(&self.in_flight))
    }

    /// Second stage: generate a snippet, run it in the sandbox, summarize.
    /// Shares the one-query-in-flight rule with [`Self::analyze`].
    pub async fn run_local(&self, request: &AnalysisRequest) -> Result<AnalysisResponse> {
        let _guard = self.begin_query()?;
        self.run_local_with_events(request, &None, Instant::now())
            .await
    }

    async fn run_local_with_events(
        &self,
        request: &AnalysisRequest,
        progress: &Option<Sender<GatewayEvent>>,
        started: Instant,
    ) -> Result<AnalysisResponse> {
        let today = self.today();
        let limit = self.config.sandbox_timeout;

        let sandbox = self.sandbox.init(today).await;
        let snapshot = sandbox
            .load(request.data.clone(), &request.currency, today)
            .await;
        self.send_event(
            progress,
            GatewayEvent::SandboxReady {
                elapsed_ms: elapsed_ms(started),
            },
        )
        .await;

        self.send_event(
            progress,
            GatewayEvent::GeneratingCode {
                elapsed_ms: elapsed_ms(started),
            },
        )
        .await;
        let raw = timeout(limit, self.generator.generate_snippet(request, today))
            .await
            .map_err(|_| ExpenseError::Timeout {
                stage: "Code generation".to_string(),
                seconds: limit.as_secs(),
            })??;
        let code = strip_code_fences(&raw);
        info!("Generated snippet:\n{}", code);

        self.send_event(
            progress,
            GatewayEvent::Executing {
                elapsed_ms: elapsed_ms(started),
            },
        )
        .await;
        let execution = match timeout(limit, execute_on(snapshot, &code)).await {
            Ok(Ok(execution)) => execution,
            Ok(Err(e)) => {
                warn!("Execution error: {}", e);
                return Ok(AnalysisResponse::execution_error(e, code));
            }
            Err(_) => {
                warn!("Snippet did not finish within {}s", limit.as_secs());
                let e = ExpenseError::Timeout {
                    stage: "Sandbox execution".to_string(),
                    seconds: limit.as_secs(),
                };
                return Ok(AnalysisResponse::execution_error(e, code));
            }
        };
        debug!("Raw snippet result: {:?}", execution.result);

        let fig = execution.fig.as_ref().map(|chart| chart.to_json()).transpose()?;

        let summarize = match (&execution.fig, &execution.result) {
            (None, Some(result)) => !result.starts_with("Total") && !result.starts_with("Average"),
            _ => false,
        };

        let result = match execution.result {
            Some(raw_result) if summarize => {
                self.send_event(
                    progress,
                    GatewayEvent::Summarizing {
                        elapsed_ms: elapsed_ms(started),
                    },
                )
                .await;
                match timeout(limit, self.generator.summarize(request, &raw_result)).await {
                    Ok(Ok(summary)) if !summary.trim().is_empty() => summary.trim().to_string(),
                    Ok(Ok(_)) => raw_result,
                    Ok(Err(e)) => {
                        warn!("Summary failed, keeping raw result: {}", e);
                        raw_result
                    }
                    Err(_) => {
                        warn!("Summary timed out, keeping raw result");
                        raw_result
                    }
                }
            }
            Some(raw_result) => {
                debug!("Skipping summary, using tool result directly");
                raw_result
            }
            None => NO_RESULT.to_string(),
        };

        Ok(AnalysisResponse {
            result: Some(result),
            fig,
            code: Some(code),
            error: None,
        })
    }

    /// Runs both stages. Only one query may be in flight; a second concurrent
    /// call fails with [`ExpenseError::QueryInFlight`]. Dropping the future
    /// cancels whichever stage is outstanding.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        progress: Option<Sender<GatewayEvent>>,
    ) -> Result<AnalysisResponse> {
        let _guard = self.begin_query()?;
        let started = Instant::now();

        info!("New analysis query: {}", request.prompt);
        self.send_event(
            &progress,
            GatewayEvent::RemoteStarted {
                elapsed_ms: elapsed_ms(started),
            },
        )
        .await;

        let reason = match self.try_remote(request).await {
            RemoteStage::Completed(response) => {
                info!("Remote backend answered in {}ms", elapsed_ms(started));
                self.send_event(
                    &progress,
                    GatewayEvent::RemoteCompleted {
                        elapsed_ms: elapsed_ms(started),
                    },
                )
                .await;
                self.send_event(
                    &progress,
                    GatewayEvent::Completed {
                        elapsed_ms: elapsed_ms(started),
                    },
                )
                .await;
                return Ok(response);
            }
            RemoteStage::Fallback(reason) => reason,
        };

        warn!("Falling back to local sandbox: {}", reason);
        self.send_event(
            &progress,
            GatewayEvent::FallingBack {
                reason,
                elapsed_ms: elapsed_ms(started),
            },
        )
        .await;

        match self.run_local_with_events(request, &progress, started).await {
            Ok(response) => {
                info!("Local analysis finished in {}ms", elapsed_ms(started));
                self.send_event(
                    &progress,
                    GatewayEvent::Completed {
                        elapsed_ms: elapsed_ms(started),
                    },
                )
                .await;
                Ok(response)
            }
            Err(e) => {
                self.send_event(
                    &progress,
                    GatewayEvent::Failed {
                        reason: e.to_string(),
                        elapsed_ms: elapsed_ms(started),
                    },
                )
                .await;
                Err(e)
            }
        }
    }

    async fn send_event(&self, sender: &Option<Sender<GatewayEvent>>, event: GatewayEvent) {
        if let Some(tx) = sender {
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ChartKind;
    use crate::schema::TransactionRecord;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct MockBackend {
        outcome: std::result::Result<AnalysisResponse, u16>,
        delay: Duration,
    }

    impl MockBackend {
        fn ok(result: &str) -> Self {
            Self {
                outcome: Ok(AnalysisResponse {
                    result: Some(result.to_string()),
                    ..AnalysisResponse::default()
                }),
                delay: Duration::ZERO,
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                outcome: Err(status),
                delay: Duration::ZERO,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::ok("too late")
            }
        }
    }

    #[async_trait]
    impl AnalysisBackend for MockBackend {
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResponse> {
            tokio::time::sleep(self.delay).await;
            match &self.outcome {
                Ok(response) => Ok(response.clone()),
                Err(status) => Err(ExpenseError::BackendStatus {
                    status: *status,
                    body: "detail".to_string(),
                }),
            }
        }

        async fn health(&self) -> bool {
            self.outcome.is_ok()
        }
    }

    struct MockGenerator {
        snippet: String,
        summary: Option<String>,
        summaries: AtomicUsize,
    }

    impl MockGenerator {
        fn new(snippet: &str) -> Self {
            Self {
                snippet: snippet.to_string(),
                summary: Some("Spending on food and taxis moves together.".to_string()),
                summaries: AtomicUsize::new(0),
            }
        }

        fn without_summary(mut self) -> Self {
            self.summary = None;
            self
        }
    }

    #[async_trait]
    impl CodeGenerator for MockGenerator {
        async fn generate_snippet(
            &self,
            _request: &AnalysisRequest,
            _today: NaiveDate,
        ) -> Result<String> {
            Ok(self.snippet.clone())
        }

        async fn summarize(&self, _request: &AnalysisRequest, _result: &str) -> Result<String> {
            self.summaries.fetch_add(1, Ordering::SeqCst);
            self.summary
                .clone()
                .ok_or_else(|| ExpenseError::CodeGeneration("model offline".to_string()))
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dataset() -> Dataset {
        Dataset::from_records(vec![
            TransactionRecord::new(date(2024, 1, 1), 1000.0, "grocery", "Food"),
            TransactionRecord::new(date(2024, 1, 1), 500.0, "convenience", "Food"),
            TransactionRecord::new(date(2024, 1, 9), 300.0, "taxi", "Transportation"),
        ])
    }

    fn gateway(
        backend: Option<MockBackend>,
        generator: Arc<MockGenerator>,
    ) -> ExecutionGateway {
        let backend = backend.map(|b| Arc::new(b) as Arc<dyn AnalysisBackend>);
        ExecutionGateway::new(GatewayConfig::default(), backend, generator)
            .with_fixed_date(date(2024, 6, 1))
    }

    #[tokio::test]
    async fn test_remote_result_is_returned_verbatim() {
        let gw = gateway(
            Some(MockBackend::ok("Total grocery in 2024: 1000.0")),
            Arc::new(MockGenerator::new("result = calculate_sum(df)")),
        );
        let request = gw.request(&dataset(), "grocery?", "JPY").unwrap();

        let response = gw.analyze(&request, None).await.unwrap();
        assert_eq!(response.result.as_deref(), Some("Total grocery in 2024: 1000.0"));
        assert!(!gw.sandbox().is_initialized());
    }

    #[tokio::test]
    async fn test_falls_back_on_bad_status() {
        let gw = gateway(
            Some(MockBackend::failing(500)),
            Arc::new(MockGenerator::new(
                "```python\n_, result = calculate_sum(df, category='grocery', year=2024)\n```",
            )),
        );
        let request = gw.request(&dataset(), "grocery?", "JPY").unwrap();

        match gw.try_remote(&request).await {
            RemoteStage::Fallback(FallbackReason::BadStatus { status, .. }) => {
                assert_eq!(status, 500)
            }
            other => panic!("unexpected stage: {:?}", other),
        }

        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        let response = gw.analyze(&request, Some(tx)).await.unwrap();
        assert_eq!(response.result.as_deref(), Some("Total grocery in 2024: 1000.0"));
        assert_eq!(
            response.code.as_deref(),
            Some("_, result = calculate_sum(df, category='grocery', year=2024)")
        );

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(GatewayEvent::RemoteStarted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, GatewayEvent::FallingBack { .. })));
        assert!(matches!(events.last(), Some(GatewayEvent::Completed { .. })));
        assert!(events
            .windows(2)
            .all(|w| w[0].elapsed_ms() <= w[1].elapsed_ms()));
    }

    #[tokio::test]
    async fn test_remote_timeout_falls_back() {
        let mut gw = gateway(
            Some(MockBackend::slow(Duration::from_secs(5))),
            Arc::new(MockGenerator::new("result = calculate_average(df)")),
        );
        gw.config.backend_timeout = Duration::from_millis(20);
        let request = gw.request(&dataset(), "average?", "JPY").unwrap();

        assert_eq!(
            gw.try_remote(&request).await,
            RemoteStage::Fallback(FallbackReason::TimedOut { seconds: 0 })
        );
        let response = gw.analyze(&request, None).await.unwrap();
        assert_eq!(response.result.as_deref(), Some("Average Total in all time: 600.0"));
    }

    #[tokio::test]
    async fn test_sandbox_error_becomes_response() {
        let gw = gateway(None, Arc::new(MockGenerator::new("result = drop_table(df)")));
        let request = gw.request(&dataset(), "??", "JPY").unwrap();

        let response = gw.analyze(&request, None).await.unwrap();
        assert!(response.result.is_none());
        assert_eq!(
            response.error.as_deref(),
            Some("Execution error: Unknown analysis tool: drop_table")
        );
        assert_eq!(response.code.as_deref(), Some("result = drop_table(df)"));
        assert!(!gw.is_busy());
    }

    #[tokio::test]
    async fn test_summary_rules() {
        let generator = Arc::new(MockGenerator::new(
            "_, result = run_correlation(df, 'Expense', 'onetime')",
        ));
        let gw = gateway(None, generator.clone());
        let request = gw.request(&dataset(), "related?", "JPY").unwrap();
        let response = gw.run_local(&request).await.unwrap();
        assert_eq!(
            response.result.as_deref(),
            Some("Spending on food and taxis moves together.")
        );
        assert_eq!(generator.summaries.load(Ordering::SeqCst), 1);

        // Charts skip the summary.
        let generator = Arc::new(MockGenerator::new("fig, result = plot_pie_chart(df)"));
        let gw = gateway(None, generator.clone());
        let response = gw.run_local(&request).await.unwrap();
        assert_eq!(response.chart().unwrap().kind, ChartKind::Pie);
        assert_eq!(generator.summaries.load(Ordering::SeqCst), 0);

        // A failed summary keeps the raw result.
        let generator = Arc::new(
            MockGenerator::new("_, result = run_correlation(df, 'Expense', 'onetime')")
                .without_summary(),
        );
        let gw = gateway(None, generator);
        let response = gw.run_local(&request).await.unwrap();
        assert!(response.result.unwrap().starts_with("Correlation"));

        // Nothing assigned to result.
        let gw = gateway(None, Arc::new(MockGenerator::new("calculate_sum(df)")));
        let response = gw.run_local(&request).await.unwrap();
        assert_eq!(response.result.as_deref(), Some("Analysis complete."));
    }

    struct SlowGenerator(Duration);

    #[async_trait]
    impl CodeGenerator for SlowGenerator {
        async fn generate_snippet(
            &self,
            _request: &AnalysisRequest,
            _today: NaiveDate,
        ) -> Result<String> {
            tokio::time::sleep(self.0).await;
            Ok("result = calculate_sum(df)".to_string())
        }

        async fn summarize(&self, _request: &AnalysisRequest, result: &str) -> Result<String> {
            Ok(result.to_string())
        }
    }

    #[tokio::test]
    async fn test_local_stage_keeps_its_own_dataset() {
        let gw = Arc::new(
            ExecutionGateway::new(
                GatewayConfig::default(),
                None,
                Arc::new(SlowGenerator(Duration::from_millis(200))),
            )
            .with_fixed_date(date(2024, 6, 1)),
        );
        let small = Dataset::from_records(vec![TransactionRecord::new(
            date(2024, 1, 1),
            100.0,
            "grocery",
            "Food",
        )]);
        let large = Dataset::from_records(vec![TransactionRecord::new(
            date(2024, 1, 1),
            999.0,
            "taxi",
            "Transportation",
        )]);
        let first_request = gw.request(&small, "total?", "JPY").unwrap();
        let second_request = gw.request(&large, "total?", "JPY").unwrap();

        let first = {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move { gw.run_local(&first_request).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = gw.run_local(&second_request).await;
        assert!(matches!(second, Err(ExpenseError::QueryInFlight)));
        let second = gw.analyze(&second_request, None).await;
        assert!(matches!(second, Err(ExpenseError::QueryInFlight)));

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.result.as_deref(), Some("Total Total in all time: 100.0"));
        assert!(!gw.is_busy());

        // Once the first query is done the sandbox takes the next dataset.
        let second = gw.run_local(&second_request).await.unwrap();
        assert_eq!(second.result.as_deref(), Some("Total Total in all time: 999.0"));
    }

    #[tokio::test]
    async fn test_one_query_in_flight() {
        let gw = Arc::new(gateway(
            Some(MockBackend::slow(Duration::from_millis(200))),
            Arc::new(MockGenerator::new("result = calculate_sum(df)")),
        ));
        let request = gw.request(&dataset(), "total?", "JPY").unwrap();

        let first = {
            let gw = Arc::clone(&gw);
            let request = request.clone();
            tokio::spawn(async move { gw.analyze(&request, None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = gw.analyze(&request, None).await;
        assert!(matches!(second, Err(ExpenseError::QueryInFlight)));

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.result.as_deref(), Some("too late"));
        assert!(!gw.is_busy());
    }
}
