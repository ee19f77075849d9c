//! Language-model client abstraction and HTTP providers.
//!
//! Defines the [`ModelClient`] trait and concrete implementations:
//! - **[`DisabledClient`]**: fails every request; used when `model.provider = "disabled"`.
//! - **[`AnthropicClient`]**: calls the Anthropic Messages API.
//! - **[`OpenAIClient`]**: calls the OpenAI Chat Completions API.
//!
//! Every request carries a system role (fixed instructions plus opaque style
//! text) and a user role (task data). Responses are plain text; callers run
//! them through [`artisync_core::extract`] before trusting anything in them.
//!
//! # Retry Strategy
//!
//! Both HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors (including request timeouts) → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use artisync_core::billing::TokenUsage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::SyncError;
use crate::prompts;
use crate::usage::UsageLedger;

/// Why a request is being made. Used for logging and by test doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestPurpose {
    Generate,
    ProposeEdits,
    Classify,
    DomainJudge,
    Triage,
}

impl RequestPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPurpose::Generate => "generate",
            RequestPurpose::ProposeEdits => "propose_edits",
            RequestPurpose::Classify => "classify",
            RequestPurpose::DomainJudge => "domain_judge",
            RequestPurpose::Triage => "triage",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub purpose: RequestPurpose,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// A text-completion backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier recorded in artifact metadata.
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse>;
}

/// Instantiate the client named by `model.provider`.
pub fn create_client(config: &ModelConfig) -> Result<Arc<dyn ModelClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledClient)),
        "anthropic" => Ok(Arc::new(AnthropicClient::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIClient::new(config)?)),
        other => bail!("Unknown model provider: {}", other),
    }
}

// ============ Disabled Client ============

pub struct DisabledClient;

#[async_trait]
impl ModelClient for DisabledClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &ModelRequest) -> Result<ModelResponse> {
        bail!("Model provider is disabled; set model.provider in the config")
    }
}

// ============ Shared HTTP plumbing ============

struct HttpTransport {
    client: reqwest::Client,
    max_retries: u32,
    label: &'static str,
}

impl HttpTransport {
    fn new(config: &ModelConfig, label: &'static str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
            label,
        })
    }

    /// POST `body` to `url` with retry/backoff and return the parsed JSON.
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(provider = self.label, attempt, delay_secs = delay.as_secs(), "retrying model request");
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(url).header("Content-Type", "application/json");
            for (name, value) in headers {
                req = req.header(*name, value);
            }

            match req.json(body).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(provider = self.label, %status, attempt, "transient model API error");
                        last_err = Some(anyhow::anyhow!(
                            "{} API error {}: {}",
                            self.label,
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429), don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("{} API error {}: {}", self.label, status, body_text);
                }
                Err(e) => {
                    warn!(provider = self.label, attempt, error = %e, "model request failed");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", self.label)))
    }
}

fn require_model(config: &ModelConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("model.model required for {} provider", config.provider))
}

fn require_env(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))
}

// ============ Anthropic Client ============

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for `POST /v1/messages`. Requires `ANTHROPIC_API_KEY`.
pub struct AnthropicClient {
    model: String,
    api_key: String,
    url: String,
    transport: HttpTransport,
}

impl AnthropicClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = require_model(config)?;
        let api_key = require_env("ANTHROPIC_API_KEY")?;
        let url = match &config.base_url {
            Some(base) => format!("{}/v1/messages", base.trim_end_matches('/')),
            None => ANTHROPIC_URL.to_string(),
        };
        Ok(Self {
            model,
            api_key,
            url,
            transport: HttpTransport::new(config, "Anthropic")?,
        })
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": [{"role": "user", "content": request.user}],
        });
        let headers = [
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ];
        debug!(purpose = request.purpose.as_str(), model = %self.model, "anthropic request");
        let json = self.transport.post_json(&self.url, &headers, &body).await?;
        parse_anthropic_response(&json, &self.model)
    }
}

/// Concatenate `content[].text` blocks and read `usage`.
fn parse_anthropic_response(json: &serde_json::Value, model: &str) -> Result<ModelResponse> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Anthropic response: missing content array"))?;

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");

    let usage = json.get("usage");
    let count = |field: &str| {
        usage
            .and_then(|u| u.get(field))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };

    Ok(ModelResponse {
        text,
        usage: TokenUsage::new(count("input_tokens"), count("output_tokens")),
        model: json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string(),
    })
}

// ============ OpenAI Client ============

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Client for `POST /v1/chat/completions`. Requires `OPENAI_API_KEY`.
pub struct OpenAIClient {
    model: String,
    api_key: String,
    url: String,
    transport: HttpTransport,
}

impl OpenAIClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = require_model(config)?;
        let api_key = require_env("OPENAI_API_KEY")?;
        let url = match &config.base_url {
            Some(base) => format!("{}/v1/chat/completions", base.trim_end_matches('/')),
            None => OPENAI_URL.to_string(),
        };
        Ok(Self {
            model,
            api_key,
            url,
            transport: HttpTransport::new(config, "OpenAI")?,
        })
    }
}

#[async_trait]
impl ModelClient for OpenAIClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let body = serde_json::json!({
            "model": self.model,
            "max_completion_tokens": request.max_tokens,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
        });
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        debug!(purpose = request.purpose.as_str(), model = %self.model, "openai request");
        let json = self.transport.post_json(&self.url, &headers, &body).await?;
        parse_openai_response(&json, &self.model)
    }
}

/// Read `choices[0].message.content` and `usage`.
fn parse_openai_response(json: &serde_json::Value, model: &str) -> Result<ModelResponse> {
    let text = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))?
        .to_string();

    let usage = json.get("usage");
    let count = |field: &str| {
        usage
            .and_then(|u| u.get(field))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };

    Ok(ModelResponse {
        text,
        usage: TokenUsage::new(count("prompt_tokens"), count("completion_tokens")),
        model: json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string(),
    })
}

// ============ Structured requests ============

/// Send `request` and extract a JSON object holding `field`.
///
/// Unparseable replies are retried up to `repair_retries` times with a
/// repair instruction appended to the user prompt. Every call's usage is
/// recorded in `ledger`, including failed ones.
pub async fn request_object(
    client: &dyn ModelClient,
    request: &ModelRequest,
    field: &str,
    repair_retries: u32,
    ledger: &mut UsageLedger,
) -> std::result::Result<(serde_json::Map<String, serde_json::Value>, String), SyncError> {
    let mut current = request.clone();
    let mut attempt = 0;
    loop {
        let response = client.complete(&current).await.map_err(SyncError::Model)?;
        ledger.record_model_call(response.usage);
        match artisync_core::extract::extract(&response.text, field) {
            Ok(obj) => return Ok((obj, response.model)),
            Err(failure) if attempt < repair_retries => {
                warn!(
                    purpose = request.purpose.as_str(),
                    attempt,
                    reason = %failure.reason,
                    "unparseable model output; retrying with repair instruction"
                );
                attempt += 1;
                current.user = format!(
                    "{}{}",
                    request.user,
                    prompts::repair_suffix(field, &failure.reason)
                );
            }
            Err(failure) => return Err(SyncError::Extraction(failure)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_anthropic_response() {
        let json = json!({
            "model": "claude-x",
            "content": [
                {"type": "text", "text": "{\"html\": "},
                {"type": "tool_use", "id": "t"},
                {"type": "text", "text": "\"x\"}"}
            ],
            "usage": {"input_tokens": 120, "output_tokens": 40}
        });
        let r = parse_anthropic_response(&json, "fallback").unwrap();
        assert_eq!(r.text, "{\"html\": \"x\"}");
        assert_eq!(r.usage, TokenUsage::new(120, 40));
        assert_eq!(r.model, "claude-x");
    }

    #[test]
    fn test_parse_anthropic_missing_content() {
        assert!(parse_anthropic_response(&json!({"error": "x"}), "m").is_err());
    }

    #[test]
    fn test_parse_openai_response() {
        let json = json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3}
        });
        let r = parse_openai_response(&json, "gpt-x").unwrap();
        assert_eq!(r.text, "hello");
        assert_eq!(r.usage, TokenUsage::new(9, 3));
        assert_eq!(r.model, "gpt-x");
    }

    #[tokio::test]
    async fn test_disabled_client_fails() {
        let client = create_client(&ModelConfig::default()).unwrap();
        assert_eq!(client.model_name(), "disabled");
        let req = ModelRequest {
            purpose: RequestPurpose::Generate,
            system: String::new(),
            user: String::new(),
            max_tokens: 10,
        };
        assert!(client.complete(&req).await.is_err());
    }

    /// Serve canned HTTP responses, one per connection, in order.
    async fn canned_server(responses: Vec<(u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&buf);
                    if let Some(head_end) = text.find("\r\n\r\n") {
                        let content_length = text[..head_end]
                            .lines()
                            .find_map(|l| {
                                let lower = l.to_ascii_lowercase();
                                lower
                                    .strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                            })
                            .unwrap_or(0);
                        if buf.len() >= head_end + 4 + content_length {
                            break;
                        }
                    }
                }
                let reply = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{}", addr)
    }

    fn transport(max_retries: u32) -> HttpTransport {
        let config = ModelConfig {
            max_retries,
            timeout_secs: 5,
            ..ModelConfig::default()
        };
        HttpTransport::new(&config, "Test").unwrap()
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let base = canned_server(vec![
            (503, "{\"error\":\"busy\"}".to_string()),
            (200, "{\"ok\":true}".to_string()),
        ])
        .await;
        let json = transport(2)
            .post_json(&format!("{}/x", base), &[], &json!({}))
            .await
            .unwrap();
        assert_eq!(json["ok"], true);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let base = canned_server(vec![
            (400, "{\"error\":\"bad\"}".to_string()),
            (200, "{\"ok\":true}".to_string()),
        ])
        .await;
        let err = transport(3)
            .post_json(&format!("{}/x", base), &[], &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("400"));
    }
}
