//! Thin async client for the Ollama HTTP API.
//!
//! The relay does no inference of its own: requests are validated by the
//! server crate and forwarded here more or less verbatim.

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Health probes use a short timeout regardless of the configured one.
const PING_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Body accepted by both `/api/chat` and `/api/generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_temperature", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> Option<f32> {
    Some(DEFAULT_TEMPERATURE)
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to the inference service timed out")]
    Timeout,

    #[error("inference service unreachable: {0}")]
    Unavailable(String),

    #[error("inference service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response from inference service: {0}")]
    Decode(String),

    #[error("inference request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else if e.is_connect() {
            LlmError::Unavailable(e.to_string())
        } else if let Some(status) = e.status() {
            LlmError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else if e.is_decode() {
            LlmError::Decode(e.to_string())
        } else {
            LlmError::Request(e.to_string())
        }
    }
}

/// Non-empty NDJSON lines of a streaming response, in arrival order.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let http = Client::builder()
            .connect_timeout(PING_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Cheap reachability probe.
    pub async fn ping(&self) -> Result<(), LlmError> {
        let resp = self
            .http
            .get(self.url("api/tags"))
            .timeout(PING_TIMEOUT)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    /// Installed models, as returned by `/api/tags`.
    pub async fn tags(&self) -> Result<Value, LlmError> {
        let resp = self
            .http
            .get(self.url("api/tags"))
            .timeout(self.timeout)
            .send()
            .await?;
        decode_json(check_status(resp).await?).await
    }

    /// Non-streaming chat completion.
    pub async fn chat(&self, request: &InferenceRequest) -> Result<Value, LlmError> {
        let body = InferenceRequest {
            stream: false,
            ..request.clone()
        };
        debug!(model = %body.model, messages = body.messages.len(), "forwarding chat");
        self.post_json("api/chat", &body).await
    }

    /// Non-streaming generation.
    pub async fn generate(&self, request: &InferenceRequest) -> Result<Value, LlmError> {
        let body = InferenceRequest {
            stream: false,
            ..request.clone()
        };
        debug!(model = %body.model, "forwarding generate");
        self.post_json("api/generate", &body).await
    }

    /// Streaming generation. Only the wait for response headers is bounded by
    /// the timeout; the body may take as long as the model needs.
    pub async fn generate_stream(&self, request: &InferenceRequest) -> Result<LineStream, LlmError> {
        let body = InferenceRequest {
            stream: true,
            ..request.clone()
        };
        debug!(model = %body.model, "forwarding streaming generate");

        let send = self.http.post(self.url("api/generate")).json(&body).send();
        let resp = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| LlmError::Timeout)??;
        let resp = check_status(resp).await?;

        Ok(split_lines(resp.bytes_stream()))
    }

    async fn post_json(&self, path: &str, body: &InferenceRequest) -> Result<Value, LlmError> {
        let resp = self
            .http
            .post(self.url(path))
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;
        decode_json(check_status(resp).await?).await
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), %body, "inference service returned an error");
    Err(LlmError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn decode_json(resp: reqwest::Response) -> Result<Value, LlmError> {
    resp.json::<Value>()
        .await
        .map_err(|e| LlmError::Decode(e.to_string()))
}

fn split_lines<S, B>(bytes: S) -> LineStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let mut bytes = Box::pin(bytes);
    Box::pin(async_stream::stream! {
        let mut pending: Vec<u8> = Vec::new();
        while let Some(piece) = bytes.next().await {
            let piece = match piece {
                Ok(piece) => piece,
                Err(e) => {
                    yield Err::<String, LlmError>(LlmError::from(e));
                    return;
                }
            };
            pending.extend_from_slice(piece.as_ref());
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if !line.is_empty() {
                    yield Ok(line);
                }
            }
        }
        let rest = String::from_utf8_lossy(&pending).trim().to_string();
        if !rest.is_empty() {
            yield Ok(rest);
        }
    })
}
