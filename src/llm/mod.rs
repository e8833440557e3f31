//! Streaming LLM client.
//!
//! Supports Ollama (NDJSON) and OpenAI-compatible (SSE) streaming APIs. All
//! engine model calls go through the promoter in [`promoter`], never through
//! the client directly.

mod promoter;
pub mod prompts;

pub use promoter::{ModelPromoter, StreamingModel};

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// LLM provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Ollama API (local, default)
    #[default]
    Ollama,
    /// OpenAI-compatible API (OpenAI, Groq, Together.ai, etc.)
    OpenAI,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Some(Self::Ollama),
            "openai" | "groq" | "together" => Some(Self::OpenAI),
            _ => None,
        }
    }
}

/// One entry in the promotion chain: a model and how long to wait for its
/// first streamed token before moving on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTier {
    pub model: String,
    pub first_token_timeout_ms: u64,
}

impl ModelTier {
    pub fn new(model: &str, first_token_timeout_ms: u64) -> Self {
        Self {
            model: model.to_string(),
            first_token_timeout_ms,
        }
    }

    pub fn first_token_timeout(&self) -> Duration {
        Duration::from_millis(self.first_token_timeout_ms)
    }
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    512
}

fn default_tiers() -> Vec<ModelTier> {
    vec![
        ModelTier::new("llama3.1:70b", 8000),
        ModelTier::new("llama3.1:8b", 3000),
    ]
}

/// Configuration for LLM access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// LLM provider (ollama or openai)
    #[serde(default)]
    pub provider: LlmProvider,
    /// API endpoint (provider-specific defaults apply)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API key for OpenAI-compatible providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Temperature for generation (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum tokens in response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Promotion chain, fastest-to-time-out first.
    #[serde(default = "default_tiers")]
    pub tiers: Vec<ModelTier>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            endpoint: default_endpoint(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            tiers: default_tiers(),
        }
    }
}

impl LlmConfig {
    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `LLM_PROVIDER`: "ollama" (default), "openai", "groq", or "together"
    /// - `LLM_ENDPOINT`: API endpoint (defaults based on provider)
    /// - `LLM_API_KEY`: API key for OpenAI-compatible providers
    /// - `LLM_TEMPERATURE`: Generation temperature (0.0-1.0)
    /// - `LLM_MAX_TOKENS`: Maximum tokens in response
    ///
    /// With no explicit provider, `GROQ_API_KEY` or `OPENAI_API_KEY` selects
    /// the OpenAI-compatible path with the matching endpoint.
    pub fn with_env_overrides(mut self) -> Self {
        let explicit_provider = std::env::var("LLM_PROVIDER").ok();
        if let Some(ref val) = explicit_provider {
            if let Some(provider) = LlmProvider::from_str(val) {
                self.provider = provider;
            }
        }

        let explicit_endpoint = std::env::var("LLM_ENDPOINT").ok();
        if let Some(ref endpoint) = explicit_endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Ok(val) = std::env::var("LLM_API_KEY") {
            self.api_key = Some(val);
        }

        if let Some(ref provider_str) = explicit_provider {
            if explicit_endpoint.is_none() {
                match provider_str.to_lowercase().as_str() {
                    "groq" => self.endpoint = "https://api.groq.com/openai".to_string(),
                    "openai" => self.endpoint = "https://api.openai.com".to_string(),
                    "together" => self.endpoint = "https://api.together.xyz".to_string(),
                    _ => {}
                }
            }
        } else if self.api_key.is_none() {
            if let Ok(key) = std::env::var("GROQ_API_KEY") {
                self.api_key = Some(key);
                self.provider = LlmProvider::OpenAI;
                if explicit_endpoint.is_none() {
                    self.endpoint = "https://api.groq.com/openai".to_string();
                }
            } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                self.api_key = Some(key);
                self.provider = LlmProvider::OpenAI;
                if explicit_endpoint.is_none() {
                    self.endpoint = "https://api.openai.com".to_string();
                }
            }
        }

        if let Ok(val) = std::env::var("LLM_TEMPERATURE") {
            if let Ok(t) = val.parse() {
                self.temperature = t;
            }
        }
        if let Ok(val) = std::env::var("LLM_MAX_TOKENS") {
            if let Ok(n) = val.parse() {
                self.max_tokens = n;
            }
        }
        self
    }
}

/// Errors from LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no token from {model} within {timeout_ms}ms")]
    FirstTokenTimeout { model: String, timeout_ms: u64 },
    #[error("all model tiers exhausted")]
    TiersExhausted,
    #[error("model call cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn is_first_token_timeout(&self) -> bool {
        matches!(self, LlmError::FirstTokenTimeout { .. })
    }
}

/// A stream of text tokens from one model invocation. Dropping it aborts the
/// underlying HTTP call.
pub struct TokenStream {
    inner: BoxStream<'static, Result<String, LlmError>>,
}

impl TokenStream {
    pub fn new(stream: impl Stream<Item = Result<String, LlmError>> + Send + 'static) -> Self {
        Self {
            inner: stream.boxed(),
        }
    }

    pub async fn next_token(&mut self) -> Option<Result<String, LlmError>> {
        self.inner.next().await
    }
}

/// Wire format of the streamed response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamFormat {
    /// One JSON object per line: `{"response": "...", "done": false}`.
    Ndjson,
    /// Server-sent events with `data: {...}` lines and a `[DONE]` sentinel.
    Sse,
}

enum ParsedLine {
    Token(String),
    Done,
    Skip,
}

fn parse_line(format: StreamFormat, line: &str) -> Result<ParsedLine, LlmError> {
    match format {
        StreamFormat::Ndjson => {
            #[derive(Deserialize)]
            struct OllamaChunk {
                #[serde(default)]
                response: String,
                #[serde(default)]
                done: bool,
            }
            let chunk: OllamaChunk =
                serde_json::from_str(line).map_err(|e| LlmError::Parse(e.to_string()))?;
            if chunk.done && chunk.response.is_empty() {
                Ok(ParsedLine::Done)
            } else if chunk.response.is_empty() {
                Ok(ParsedLine::Skip)
            } else {
                Ok(ParsedLine::Token(chunk.response))
            }
        }
        StreamFormat::Sse => {
            let Some(data) = line.strip_prefix("data:") else {
                // Comments, event names, and keepalives.
                return Ok(ParsedLine::Skip);
            };
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(ParsedLine::Done);
            }
            #[derive(Deserialize)]
            struct SseChunk {
                #[serde(default)]
                choices: Vec<SseChoice>,
            }
            #[derive(Deserialize)]
            struct SseChoice {
                #[serde(default)]
                delta: SseDelta,
            }
            #[derive(Deserialize, Default)]
            struct SseDelta {
                #[serde(default)]
                content: Option<String>,
            }
            let chunk: SseChunk =
                serde_json::from_str(data).map_err(|e| LlmError::Parse(e.to_string()))?;
            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .unwrap_or_default();
            if content.is_empty() {
                Ok(ParsedLine::Skip)
            } else {
                Ok(ParsedLine::Token(content))
            }
        }
    }
}

/// Line-buffering decoder over the raw byte stream.
struct LineDecoder {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buf: Vec<u8>,
    format: StreamFormat,
    finished: bool,
}

impl LineDecoder {
    fn new(bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>, format: StreamFormat) -> Self {
        Self {
            bytes,
            buf: Vec::new(),
            format,
            finished: false,
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    async fn next_token(&mut self) -> Option<Result<String, LlmError>> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(line) = self.take_line() {
                if line.is_empty() {
                    continue;
                }
                match parse_line(self.format, &line) {
                    Ok(ParsedLine::Token(token)) => return Some(Ok(token)),
                    Ok(ParsedLine::Done) => {
                        self.finished = true;
                        return None;
                    }
                    Ok(ParsedLine::Skip) => continue,
                    Err(err) => {
                        self.finished = true;
                        return Some(Err(err));
                    }
                }
            }
            match self.bytes.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    self.finished = true;
                    return Some(Err(LlmError::Connection(err.to_string())));
                }
                None => {
                    // Flush a final unterminated line, then stop.
                    self.finished = true;
                    if self.buf.is_empty() {
                        return None;
                    }
                    let line = String::from_utf8_lossy(&self.buf).trim().to_string();
                    self.buf.clear();
                    if line.is_empty() {
                        return None;
                    }
                    return match parse_line(self.format, &line) {
                        Ok(ParsedLine::Token(token)) => Some(Ok(token)),
                        Ok(_) => None,
                        Err(err) => Some(Err(err)),
                    };
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// HTTP client for streaming model calls.
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300)) // overall cap for slow models
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Start a streaming call for one model. Returns once response headers
    /// arrive; tokens are pulled from the returned stream.
    pub async fn open_stream(
        &self,
        model: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        debug!("Streaming from {} via {:?}", model, self.config.provider);

        let (builder, format) = match self.config.provider {
            LlmProvider::Ollama => {
                let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
                let request = OllamaRequest {
                    model,
                    prompt,
                    stream: true,
                    options: OllamaOptions {
                        temperature: self.config.temperature,
                        num_predict: self.config.max_tokens,
                    },
                };
                (
                    self.client.post(&url).json(&request),
                    StreamFormat::Ndjson,
                )
            }
            LlmProvider::OpenAI => {
                let url = format!(
                    "{}/v1/chat/completions",
                    self.config.endpoint.trim_end_matches('/')
                );
                let request = ChatRequest {
                    model,
                    messages: vec![ChatMessage {
                        role: "user",
                        content: prompt,
                    }],
                    stream: true,
                    temperature: self.config.temperature,
                    max_tokens: self.config.max_tokens,
                };
                let mut builder = self.client.post(&url).json(&request);
                if let Some(key) = &self.config.api_key {
                    builder = builder.bearer_auth(key);
                }
                (builder, StreamFormat::Sse)
            }
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = builder.send() => {
                result.map_err(|e| LlmError::Connection(e.to_string()))?
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {status}: {body}")));
        }

        let bytes = response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed();
        let decoder = LineDecoder::new(bytes, format);
        Ok(TokenStream::new(futures::stream::unfold(
            decoder,
            |mut decoder| async move { decoder.next_token().await.map(|token| (token, decoder)) },
        )))
    }
}

#[async_trait]
impl StreamingModel for LlmClient {
    async fn stream(
        &self,
        model: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenStream, LlmError> {
        self.open_stream(model, prompt, cancel).await
    }
}
