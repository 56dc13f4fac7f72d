//! Oracle transport trait and implementations.
//!
//! The oracle is the language model behind the engine: it turns user
//! prompts into DSL, fills slots from answers, and proposes repairs for
//! failed intents. The engine treats it as a pure request/response
//! function; each call is logged into the session's resolution context
//! by the caller.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Default request timeout (local adapters can be slow to warm up).
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Token budget for a single oracle completion.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// One oracle round trip: a phase-specific system prompt plus the
/// assembled context block for this call.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    /// Short label of the calling phase, for logs ("intent_sequencer",
    /// "query_fill", ...).
    pub description: String,
    /// Adapter the server should apply for this phase.
    pub adapter: String,
    /// Phase system prompt.
    pub system_prompt: String,
    /// Assembled context block sent as the user turn.
    pub user_prompt: String,
    /// Completion token budget.
    pub max_tokens: u32,
}

impl OracleRequest {
    /// Create a request with the default token budget.
    pub fn new(
        description: impl Into<String>,
        adapter: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            adapter: adapter.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Trait for oracle providers.
///
/// Responses are plain text; the caller parses them into DSL or into
/// the structured field shapes the phases expect.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Execute a completion request and return the raw response text.
    async fn complete(&self, request: OracleRequest) -> Result<String>;

    /// Get the name of this oracle.
    fn name(&self) -> &str;
}

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on network errors; every other error kind is returned
/// immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    oracle_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error = None;
    let mut backoff = initial_backoff;

    for attempt in 0..=max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !matches!(e, EngineError::Network(_)) {
                    return Err(e);
                }

                last_error = Some(e);

                if attempt < max_retries {
                    tracing::warn!(
                        oracle = oracle_name,
                        attempt = attempt + 1,
                        max_retries = max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap())
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP oracle
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the HTTP oracle.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Base URL of an OpenAI-compatible chat endpoint.
    pub base_url: String,

    /// Model name sent with every request.
    pub model: String,

    /// Container hosting the model, for servers that multiplex several.
    pub container: Option<String>,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "phi-4-mini-instruct".to_string(),
            container: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl OracleConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set max retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Name the container hosting the model.
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

/// Oracle backed by an OpenAI-compatible chat-completions server.
///
/// The per-phase adapter name is forwarded alongside the model so
/// servers hosting phase-tuned adapters can switch on it; servers
/// without adapter support ignore the field.
pub struct HttpOracle {
    client: reqwest::Client,
    config: OracleConfig,
}

impl HttpOracle {
    /// Create a new HTTP oracle with the given configuration.
    pub fn new(config: OracleConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn complete_once(&self, request: &OracleRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let mut body = serde_json::json!({
            "model": self.config.model,
            "adapter": request.adapter,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "max_tokens": request.max_tokens,
            "temperature": 0.0,
        });
        if let Some(container) = &self.config.container {
            body["container"] = serde_json::json!(container);
        }

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Oracle(format!(
                "oracle returned HTTP {status}: {text}"
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::Oracle("response is missing choices[0].message.content".to_string())
            })
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn complete(&self, request: OracleRequest) -> Result<String> {
        let start = std::time::Instant::now();
        let result = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            || self.complete_once(&request),
        )
        .await;

        match &result {
            Ok(answer) => {
                tracing::debug!(
                    phase = %request.description,
                    answer_chars = answer.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Oracle completion successful"
                );
            }
            Err(e) => {
                tracing::warn!(
                    phase = %request.description,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Oracle completion failed"
                );
            }
        }

        result
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock oracle
// ─────────────────────────────────────────────────────────────────────────────

/// A mock oracle for testing purposes.
///
/// Returns pre-configured responses in order and records every request,
/// which keeps resolution runs fully deterministic in tests.
#[derive(Debug, Default)]
pub struct MockOracle {
    responses: std::sync::Mutex<Vec<String>>,
    request_log: std::sync::Mutex<Vec<OracleRequest>>,
}

impl MockOracle {
    /// Create a mock oracle answering with `responses`, in order.
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: std::sync::Mutex::new(
                responses.into_iter().map(str::to_string).collect(),
            ),
            request_log: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create a mock oracle with a single response.
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            responses: std::sync::Mutex::new(vec![response.into()]),
            request_log: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all requests that were made to this oracle.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.request_log.lock().unwrap().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().unwrap().len()
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn complete(&self, request: OracleRequest) -> Result<String> {
        self.request_log.lock().unwrap().push(request);

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(EngineError::Oracle(
                "MockOracle: no more responses available".to_string(),
            ));
        }
        Ok(responses.remove(0))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
