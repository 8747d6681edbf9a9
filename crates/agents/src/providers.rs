//! External text-generation providers.
//!
//! Each adapter turns a prompt into a completion or a [`ProviderError`]. The
//! [`ProviderChain`] tries them in priority order, retrying transient failures
//! with exponential backoff, and bounds the whole attempt with one timeout.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const PERPLEXITY_BASE_URL: &str = "https://api.perplexity.ai";

const MAX_OUTPUT_TOKENS: u32 = 512;
const TEMPERATURE: f32 = 0.4;
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider returned an empty completion")]
    EmptyResponse,
    #[error("malformed provider response: {0}")]
    Malformed(String),
    #[error("provider request timed out")]
    Timeout,
}

impl ProviderError {
    /// Network failures, timeouts, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout => true,
            Self::Status { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            Self::EmptyResponse | Self::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::Malformed(error.to_string())
        } else {
            Self::Http(error.to_string())
        }
    }
}

#[async_trait]
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

async fn checked_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|error| ProviderError::Malformed(error.to_string()))
}

fn status_error(status: StatusCode, body: &str) -> ProviderError {
    ProviderError::Status {
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}

fn non_empty(text: Option<String>) -> Result<String, ProviderError> {
    text.map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or(ProviderError::EmptyResponse)
}

/// Google Gemini `generateContent`.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(client: Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[async_trait]
impl TextProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
                "temperature": TEMPERATURE,
            },
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let parsed: GeminiResponse = checked_json(response).await?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            });
        non_empty(text)
    }
}

/// Any `/chat/completions` endpoint: OpenAI and Perplexity both speak it.
pub struct ChatCompletionsProvider {
    name: String,
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl ChatCompletionsProvider {
    pub fn new(
        name: impl Into<String>,
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn openai(client: Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("openai", client, OPENAI_BASE_URL, api_key, model)
    }

    pub fn perplexity(client: Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("perplexity", client, PERPLEXITY_BASE_URL, api_key, model)
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [CompletionMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionContent,
}

#[derive(Deserialize)]
struct CompletionContent {
    content: Option<String>,
}

#[async_trait]
impl TextProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.model,
            messages: [CompletionMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let parsed: CompletionResponse = checked_json(response).await?;

        non_empty(
            parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content),
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Wait before `attempt` (1-based); the first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.base_delay * 2u32.saturating_pow(attempt - 2)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub provider: String,
    pub text: String,
    /// Providers that failed before this one answered.
    pub failed: Vec<String>,
}

#[derive(Debug, Error)]
#[error("no provider produced a reply ({} failed)", .failures.len())]
pub struct ChainError {
    pub failures: Vec<(String, ProviderError)>,
    pub timed_out: bool,
}

/// Providers in fixed priority order.
#[derive(Clone)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn TextProvider>>,
    retry: RetryPolicy,
    overall_timeout: Duration,
}

impl ProviderChain {
    pub fn new(
        providers: Vec<Arc<dyn TextProvider>>,
        retry: RetryPolicy,
        overall_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            retry,
            overall_timeout,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), RetryPolicy::default(), Duration::from_secs(30))
    }

    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("failed building provider http client")?;

        let mut providers: Vec<Arc<dyn TextProvider>> = Vec::new();
        if let Some(key) = &settings.google_api_key {
            providers.push(Arc::new(GeminiProvider::new(
                client.clone(),
                key,
                &settings.gemini_model,
            )));
        }
        if let Some(key) = &settings.openai_api_key {
            providers.push(Arc::new(ChatCompletionsProvider::openai(
                client.clone(),
                key,
                &settings.openai_model,
            )));
        }
        if let Some(key) = &settings.perplexity_api_key {
            providers.push(Arc::new(ChatCompletionsProvider::perplexity(
                client,
                key,
                &settings.perplexity_model,
            )));
        }

        Ok(Self::new(providers, settings.retry, settings.overall_timeout))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|provider| provider.name().to_string())
            .collect()
    }

    pub async fn generate(&self, prompt: &str) -> Result<ProviderReply, ChainError> {
        let mut failures = Vec::new();
        let outcome = tokio::time::timeout(self.overall_timeout, self.run(prompt, &mut failures)).await;

        match outcome {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(ChainError {
                failures,
                timed_out: false,
            }),
            Err(_) => {
                warn!(
                    timeout_ms = self.overall_timeout.as_millis() as u64,
                    "provider chain timed out"
                );
                Err(ChainError {
                    failures,
                    timed_out: true,
                })
            }
        }
    }

    async fn run(
        &self,
        prompt: &str,
        failures: &mut Vec<(String, ProviderError)>,
    ) -> Option<ProviderReply> {
        for provider in &self.providers {
            match self.call_with_retry(provider.as_ref(), prompt).await {
                Ok(text) => {
                    return Some(ProviderReply {
                        provider: provider.name().to_string(),
                        text,
                        failed: failures.iter().map(|(name, _)| name.clone()).collect(),
                    })
                }
                Err(error) => {
                    warn!(provider = provider.name(), error = %error, "provider failed, trying next");
                    failures.push((provider.name().to_string(), error));
                }
            }
        }
        None
    }

    async fn call_with_retry(
        &self,
        provider: &dyn TextProvider,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let delay = self.retry.delay_before(attempt);
            if !delay.is_zero() {
                warn!(
                    provider = provider.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying provider request"
                );
                tokio::time::sleep(delay).await;
            }

            match provider.generate(prompt).await {
                Ok(text) => {
                    debug!(provider = provider.name(), attempt, "provider replied");
                    return Ok(text);
                }
                Err(error) if error.is_retryable() && attempt < attempts => attempt += 1,
                Err(error) => return Err(error),
            }
        }
    }
}

/// Provider credentials and limits from the environment.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub google_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub perplexity_api_key: Option<String>,
    pub gemini_model: String,
    pub openai_model: String,
    pub perplexity_model: String,
    pub request_timeout: Duration,
    pub overall_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            google_api_key: None,
            openai_api_key: None,
            perplexity_api_key: None,
            gemini_model: "gemini-1.5-flash".to_string(),
            openai_model: "gpt-3.5-turbo".to_string(),
            perplexity_model: "sonar".to_string(),
            request_timeout: Duration::from_secs(20),
            overall_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            google_api_key: secret("GOOGLE_API_KEY"),
            openai_api_key: secret("OPENAI_API_KEY"),
            perplexity_api_key: secret("PERPLEXITY_API_KEY"),
            gemini_model: env::var("ENQUIRY_GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            openai_model: env::var("ENQUIRY_OPENAI_MODEL").unwrap_or(defaults.openai_model),
            perplexity_model: env::var("ENQUIRY_PERPLEXITY_MODEL")
                .unwrap_or(defaults.perplexity_model),
            request_timeout: env::var("ENQUIRY_PROVIDER_TIMEOUT_SECONDS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            overall_timeout: env::var("ENQUIRY_ESCALATION_TIMEOUT_SECONDS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.overall_timeout),
            retry: RetryPolicy {
                max_attempts: env::var("ENQUIRY_PROVIDER_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|value| value.parse::<u32>().ok())
                    .unwrap_or(defaults.retry.max_attempts),
                base_delay: env::var("ENQUIRY_PROVIDER_BASE_DELAY_MS")
                    .ok()
                    .and_then(|value| value.parse::<u64>().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
            },
        }
    }
}

fn secret(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    enum Script {
        Succeed(&'static str),
        FailThenSucceed(u32, &'static str),
        Always(fn() -> ProviderError),
        Hang,
    }

    struct FakeProvider {
        name: &'static str,
        script: Script,
        calls: AtomicU32,
    }

    impl FakeProvider {
        fn shared(name: &'static str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                name,
                script,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TextProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match &self.script {
                Script::Succeed(text) => Ok(text.to_string()),
                Script::FailThenSucceed(failures, text) if call > *failures => Ok(text.to_string()),
                Script::FailThenSucceed(..) => Err(ProviderError::Status {
                    status: 503,
                    body: "busy".into(),
                }),
                Script::Always(error) => Err(error()),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok("too late".into())
                }
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn chain(providers: Vec<Arc<dyn TextProvider>>) -> ProviderChain {
        ProviderChain::new(providers, fast_retry(), Duration::from_secs(5))
    }

    #[test]
    fn backoff_doubles() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_before(1), Duration::ZERO);
        assert_eq!(retry.delay_before(2), Duration::from_millis(500));
        assert_eq!(retry.delay_before(3), Duration::from_millis(1000));
        assert_eq!(retry.delay_before(4), Duration::from_millis(2000));
    }

    #[test]
    fn retryable_errors() {
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::Http("reset".into()).is_retryable());
        assert!(ProviderError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!ProviderError::Status { status: 401, body: String::new() }.is_retryable());
        assert!(!ProviderError::EmptyResponse.is_retryable());
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let first = FakeProvider::shared("gemini", Script::Succeed("from gemini"));
        let second = FakeProvider::shared("openai", Script::Succeed("from openai"));
        let reply = chain(vec![first.clone(), second.clone()])
            .generate("hi")
            .await
            .unwrap();

        assert_eq!(reply.provider, "gemini");
        assert_eq!(reply.text, "from gemini");
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let flaky = FakeProvider::shared("gemini", Script::FailThenSucceed(2, "third time"));
        let reply = chain(vec![flaky.clone()]).generate("hi").await.unwrap();
        assert_eq!(reply.text, "third time");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_or_fatal_errors_fall_through_without_retry() {
        let empty = FakeProvider::shared("gemini", Script::Always(|| ProviderError::EmptyResponse));
        let denied = FakeProvider::shared(
            "openai",
            Script::Always(|| ProviderError::Status {
                status: 401,
                body: "bad key".into(),
            }),
        );
        let last = FakeProvider::shared("perplexity", Script::Succeed("answer"));

        let reply = chain(vec![empty.clone(), denied.clone(), last])
            .generate("hi")
            .await
            .unwrap();
        assert_eq!(reply.provider, "perplexity");
        assert_eq!(reply.failed, vec!["gemini", "openai"]);
        assert_eq!(empty.calls.load(Ordering::SeqCst), 1);
        assert_eq!(denied.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_every_failure() {
        let down = FakeProvider::shared("gemini", Script::Always(|| ProviderError::Timeout));
        let error = chain(vec![down.clone()]).generate("hi").await.unwrap_err();
        assert!(!error.timed_out);
        assert_eq!(error.failures.len(), 1);
        assert_eq!(down.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn overall_timeout_bounds_the_chain() {
        let stuck = FakeProvider::shared("gemini", Script::Hang);
        let chain = ProviderChain::new(vec![stuck], fast_retry(), Duration::from_millis(50));
        let error = chain.generate("hi").await.unwrap_err();
        assert!(error.timed_out);
    }

    #[test]
    fn settings_enable_only_configured_providers() {
        let settings = ProviderSettings {
            openai_api_key: Some("sk-test".into()),
            ..ProviderSettings::default()
        };
        let chain = ProviderChain::from_settings(&settings).unwrap();
        assert_eq!(chain.names(), vec!["openai"]);
        assert!(ProviderChain::from_settings(&ProviderSettings::default())
            .unwrap()
            .is_empty());
    }

    /// Serves one canned status and body for every path on a loopback port.
    async fn stub_server(status: u16, body: &'static str) -> String {
        let status = axum::http::StatusCode::from_u16(status).unwrap();
        let app = axum::Router::new().fallback(move || async move { (status, body) });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn gemini_against(status: u16, body: &'static str) -> Result<String, ProviderError> {
        let base = stub_server(status, body).await;
        GeminiProvider::new(Client::new(), "test-key", "gemini-test")
            .with_base_url(base)
            .generate("hi")
            .await
    }

    async fn completions_against(
        status: u16,
        body: &'static str,
    ) -> Result<String, ProviderError> {
        let base = stub_server(status, body).await;
        ChatCompletionsProvider::new("openai", Client::new(), base, "sk-test", "gpt-test")
            .generate("hi")
            .await
    }

    fn rupee_body() -> &'static str {
        let mut body = "x".repeat(299);
        body.push_str("₹ fee error");
        Box::leak(body.into_boxed_str())
    }

    #[test]
    fn error_bodies_truncate_on_char_boundaries() {
        let body = rupee_body();
        match status_error(StatusCode::SERVICE_UNAVAILABLE, body) {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body.chars().count(), MAX_ERROR_BODY_CHARS);
                assert!(body.ends_with('₹'));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn gemini_joins_candidate_parts() {
        let text = gemini_against(
            200,
            r#"{"candidates":[{"content":{"parts":[{"text":"Admissions "},{"text":"open in June. "}]}}]}"#,
        )
        .await
        .unwrap();
        assert_eq!(text, "Admissions open in June.");
    }

    #[tokio::test]
    async fn gemini_maps_http_failures() {
        let error = gemini_against(503, "overloaded").await.unwrap_err();
        assert!(matches!(error, ProviderError::Status { status: 503, .. }));
        assert!(error.is_retryable());

        let error = gemini_against(400, rupee_body()).await.unwrap_err();
        match &error {
            ProviderError::Status { status, body } => {
                assert_eq!(*status, 400);
                assert_eq!(body.chars().count(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn gemini_maps_bad_payloads() {
        let error = gemini_against(200, "<html>not json</html>").await.unwrap_err();
        assert!(matches!(error, ProviderError::Malformed(_)));
        assert!(!error.is_retryable());

        let error = gemini_against(200, r#"{"candidates":[]}"#).await.unwrap_err();
        assert!(matches!(error, ProviderError::EmptyResponse));
    }

    #[tokio::test]
    async fn completions_read_first_choice() {
        let text = completions_against(
            200,
            r#"{"choices":[{"message":{"content":"  Hostel fee is listed.  "}}]}"#,
        )
        .await
        .unwrap();
        assert_eq!(text, "Hostel fee is listed.");

        let error = completions_against(200, r#"{"choices":[]}"#).await.unwrap_err();
        assert!(matches!(error, ProviderError::EmptyResponse));

        let error = completions_against(429, r#"{"error":"slow down"}"#).await.unwrap_err();
        assert!(matches!(error, ProviderError::Status { status: 429, .. }));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn non_ascii_error_body_falls_through_to_next_provider() {
        let base = stub_server(400, rupee_body()).await;
        let gemini: Arc<dyn TextProvider> = Arc::new(
            GeminiProvider::new(Client::new(), "test-key", "gemini-test").with_base_url(base),
        );
        let openai: Arc<dyn TextProvider> =
            FakeProvider::shared("openai", Script::Succeed("from openai"));

        let reply = chain(vec![gemini, openai]).generate("hi").await.unwrap();
        assert_eq!(reply.provider, "openai");
        assert_eq!(reply.text, "from openai");
        assert_eq!(reply.failed, vec!["gemini"]);
    }
}
