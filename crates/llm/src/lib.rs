use anyhow::{anyhow, Context, Result};
use rand::Rng;
use reqwest::{header::HeaderValue, Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::time::sleep;

const MAX_ATTEMPTS: usize = 5;
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Anthropic,
    OpenAi,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "anthropic" => Some(LlmProvider::Anthropic),
            "openai" => Some(LlmProvider::OpenAi),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    Anthropic(AnthropicConfig),
    OpenAi(OpenAiConfig),
    Local,
}

#[derive(Clone)]
struct AnthropicConfig {
    api_key: String,
    max_tokens: u32,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")?;
        let config = match provider {
            LlmProvider::Anthropic => ProviderConfig::Anthropic(AnthropicConfig {
                api_key: read_api_key("ANTHROPIC_API_KEY")?,
                max_tokens: env::var("ANTHROPIC_MAX_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1024),
            }),
            LlmProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http,
            provider,
            model,
            config,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Every provider is treated as unreliable: transport errors, rate
    /// limits, and server errors are retried with capped exponential
    /// backoff plus jitter before the error surfaces to the caller.
    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        if matches!(self.config, ProviderConfig::Local) {
            return Ok(self.chat_local(req));
        }
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.send_once(req).await {
                Ok(response) => return Ok(response),
                Err(SendError::Fatal(err)) => return Err(err),
                Err(SendError::Retryable { err, retry_after }) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(err.context(format!(
                            "{} request failed after {MAX_ATTEMPTS} attempts",
                            self.provider.as_str()
                        )));
                    }
                    sleep(backoff_delay(attempt, retry_after.as_ref())).await;
                }
            }
        }
    }

    pub fn chat_blocking(&self, req: &LlmRequest) -> Result<LlmResponse> {
        let rt = Runtime::new().context("failed to create tokio runtime")?;
        rt.block_on(self.chat(req))
    }

    async fn send_once(&self, req: &LlmRequest) -> std::result::Result<LlmResponse, SendError> {
        match &self.config {
            ProviderConfig::Anthropic(cfg) => self.send_anthropic(cfg, req).await,
            ProviderConfig::OpenAi(cfg) => self.send_openai(cfg, req).await,
            ProviderConfig::Local => Ok(self.chat_local(req)),
        }
    }

    async fn send_anthropic(
        &self,
        cfg: &AnthropicConfig,
        req: &LlmRequest,
    ) -> std::result::Result<LlmResponse, SendError> {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": cfg.max_tokens,
            "messages": [ { "role": "user", "content": req.user } ],
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &cfg.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .map_err(|err| SendError::retryable(anyhow!(err).context("anthropic request failed")))?;
        let response = classify_status(response)?;
        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|err| SendError::Fatal(anyhow!(err).context("failed to decode anthropic response")))?;
        let text = parsed
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| SendError::Fatal(anyhow!("missing text in Anthropic response")))?;
        let usage = parsed.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }

    async fn send_openai(
        &self,
        cfg: &OpenAiConfig,
        req: &LlmRequest,
    ) -> std::result::Result<LlmResponse, SendError> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": req.user }));
        let payload = json!({
            "model": self.model,
            "messages": messages,
        });
        let response = self
            .http
            .post(&url)
            .bearer_auth(&cfg.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| SendError::retryable(anyhow!(err).context("openai request failed")))?;
        let response = classify_status(response)?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| SendError::Fatal(anyhow!(err).context("failed to decode openai response")))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| SendError::Fatal(anyhow!("missing text in OpenAI response")))?;
        let usage = parsed.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    fn chat_local(&self, req: &LlmRequest) -> LlmResponse {
        LlmResponse {
            content: synthesize_local_response(req),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

enum SendError {
    Retryable {
        err: anyhow::Error,
        retry_after: Option<HeaderValue>,
    },
    Fatal(anyhow::Error),
}

impl SendError {
    fn retryable(err: anyhow::Error) -> Self {
        SendError::Retryable {
            err,
            retry_after: None,
        }
    }
}

fn classify_status(response: reqwest::Response) -> std::result::Result<reqwest::Response, SendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response.headers().get("retry-after").cloned();
    let err = anyhow!("provider returned status {status}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(SendError::Retryable { err, retry_after })
    } else {
        Err(SendError::Fatal(err))
    }
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    let base_ms = 1000u64 << capped;
    let jitter_ms = rand::thread_rng().gen_range(0..500);
    Duration::from_millis(base_ms + jitter_ms)
}

/// Deterministic offline responses keyed on the prompt contracts the
/// pipeline actually sends, so a `local` run produces parseable output.
fn synthesize_local_response(req: &LlmRequest) -> String {
    let user_lower = req.user.to_lowercase();
    if user_lower.contains("required metrics") {
        return r#"{"metrics": {}}"#.to_string();
    }
    if user_lower.contains("identify and categorize risks") {
        return r#"{"risks": []}"#.to_string();
    }
    if user_lower.contains("format your response as json") {
        let snippet = summarize_text(&req.user, 40);
        return json!({
            "answer": snippet,
            "confidence": "LOW",
            "caveats": ["offline stub response"],
        })
        .to_string();
    }
    summarize_text(&req.user, 40)
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| anyhow!(format!("{var} is not set")))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    if var.contains("ANTHROPIC") && !value.starts_with("sk-ant-") {
        return Err(anyhow!(format!("{} must start with 'sk-ant-'", var)));
    }
    if var.contains("OPENAI") && !value.starts_with("sk-") {
        return Err(anyhow!(format!("{} must start with 'sk-'", var)));
    }
    Ok(())
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_roundtrips_names() {
        assert_eq!(LlmProvider::from_str("Anthropic"), Some(LlmProvider::Anthropic));
        assert_eq!(LlmProvider::from_str("nope"), None);
        assert_eq!(LlmProvider::OpenAi.as_str(), "openai");
    }

    #[test]
    fn local_provider_answers_metric_prompts_with_empty_contract() {
        let client = LlmClient::new(LlmProvider::Local, "stub").unwrap();
        let response = client
            .chat_blocking(&LlmRequest {
                system: None,
                user: "Required metrics (extract actual values): revenue".to_string(),
            })
            .unwrap();
        assert_eq!(response.content, r#"{"metrics": {}}"#);
    }

    #[test]
    fn backoff_honors_retry_after_header() {
        let header = HeaderValue::from_static("7");
        assert_eq!(backoff_delay(1, Some(&header)), Duration::from_secs(7));
        let unparsed = HeaderValue::from_static("soon");
        assert!(backoff_delay(1, Some(&unparsed)) >= Duration::from_secs(2));
    }

    #[test]
    fn api_key_prefixes_are_validated() {
        assert!(validate_api_key("ANTHROPIC_API_KEY", "sk-ant-abc").is_ok());
        assert!(validate_api_key("ANTHROPIC_API_KEY", "sk-abc").is_err());
        assert!(validate_api_key("OPENAI_API_KEY", "sk-abc").is_ok());
    }
}
