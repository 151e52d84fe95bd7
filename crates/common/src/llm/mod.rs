//! LLM provider abstraction
//!
//! Three call shapes cover everything the turn pipeline needs:
//! - plain completion (clarification, general replies, summarization)
//! - structured JSON completion (classification, planning)
//! - streamed completion (final answer generation)
//!
//! Provides an OpenAI-compatible chat client and a scripted mock for tests.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// A chat message sent to the model
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Incremental text stream returned by [`LlmClient::complete_stream`]
pub type TextStream = BoxStream<'static, Result<String>>;

/// Trait for LLM completion
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-text completion
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Structured-output completion: the model is constrained to emit a JSON
    /// object, returned parsed
    async fn complete_json(&self, messages: &[ChatMessage]) -> Result<serde_json::Value>;

    /// Streaming completion; the stream is finite and yields text increments
    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<TextStream>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat completion client
pub struct ChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "core::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "LLM API key required for http provider".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.deadline_ms))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Internal {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        Ok(response)
    }

    /// Pull `data:` lines out of an SSE body fragment
    fn parse_sse_buffer(buffer: &mut String) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                continue;
            }
            if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
                if let Some(content) = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                {
                    if !content.is_empty() {
                        chunks.push(content);
                    }
                }
            }
        }
        chunks
    }
}

#[async_trait]
impl LlmClient for ChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
            response_format: None,
        };

        let response: ChatResponse = self.send(&request).await?.json().await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::Internal {
                message: "Empty response from LLM".to_string(),
            })
    }

    async fn complete_json(&self, messages: &[ChatMessage]) -> Result<serde_json::Value> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            // Deterministic-ish output for classification and planning
            temperature: 0.0,
            stream: false,
            response_format: Some(serde_json::json!({ "type": "json_object" })),
        };

        let response: ChatResponse = self.send(&request).await?.json().await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::Internal {
                message: "Empty response from LLM".to_string(),
            })?;

        serde_json::from_str(&content).map_err(|e| AppError::Internal {
            message: format!("LLM returned invalid JSON: {}", e),
        })
    }

    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
            response_format: None,
        };

        let response = self.send(&request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<String>>(16);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(part) = body.next().await {
                match part {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for chunk in Self::parse_sse_buffer(&mut buffer) {
                            if tx.send(Ok(chunk)).await.is_err() {
                                // Consumer cancelled; stop reading
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(AppError::Internal {
                                message: format!("LLM stream interrupted: {}", e),
                            }))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(receiver_stream(rx))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Adapt an mpsc receiver into a Stream
fn receiver_stream(rx: tokio::sync::mpsc::Receiver<Result<String>>) -> TextStream {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

/// One canned reply for the scripted mock
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Successful completion with this text
    Text(String),
    /// Successful structured completion
    Json(serde_json::Value),
    /// The call fails outright
    Fail(String),
    /// Streaming call yields the prefix, then fails mid-stream
    StreamThenFail { prefix: String, error: String },
}

/// Scripted mock LLM for tests: replies are consumed FIFO
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<ScriptedReply>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }

    /// A mock whose every call fails
    pub fn failing() -> Self {
        Self::new(Vec::new())
    }

    fn pop(&self) -> ScriptedReply {
        self.replies
            .lock()
            .expect("scripted llm lock")
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::Fail("script exhausted".to_string()))
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        match self.pop() {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Json(value) => Ok(value.to_string()),
            ScriptedReply::Fail(message) => Err(AppError::Internal { message }),
            ScriptedReply::StreamThenFail { error, .. } => Err(AppError::Internal { message: error }),
        }
    }

    async fn complete_json(&self, _messages: &[ChatMessage]) -> Result<serde_json::Value> {
        match self.pop() {
            ScriptedReply::Json(value) => Ok(value),
            ScriptedReply::Text(text) => {
                serde_json::from_str(&text).map_err(|e| AppError::Internal {
                    message: format!("scripted reply is not JSON: {}", e),
                })
            }
            ScriptedReply::Fail(message) => Err(AppError::Internal { message }),
            ScriptedReply::StreamThenFail { error, .. } => Err(AppError::Internal { message: error }),
        }
    }

    async fn complete_stream(&self, _messages: &[ChatMessage]) -> Result<TextStream> {
        match self.pop() {
            ScriptedReply::Text(text) => {
                let chunks: Vec<Result<String>> = split_into_chunks(&text)
                    .into_iter()
                    .map(Ok)
                    .collect();
                Ok(futures::stream::iter(chunks).boxed())
            }
            ScriptedReply::Json(value) => {
                Ok(futures::stream::iter(vec![Ok(value.to_string())]).boxed())
            }
            ScriptedReply::Fail(message) => Err(AppError::Internal { message }),
            ScriptedReply::StreamThenFail { prefix, error } => {
                let mut items: Vec<Result<String>> = split_into_chunks(&prefix)
                    .into_iter()
                    .map(Ok)
                    .collect();
                items.push(Err(AppError::Internal { message: error }));
                Ok(futures::stream::iter(items).boxed())
            }
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Word-boundary chunking so streamed mock output looks like real deltas
fn split_into_chunks(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_inclusive(' ').collect();
    words
        .chunks(4)
        .map(|group| group.concat())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Create an LLM client based on configuration
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(ChatClient::new(config)?)),
        "mock" => Ok(Arc::new(ScriptedLlm::new(Vec::new()))),
        other => Err(AppError::Configuration {
            message: format!("Unknown LLM provider: {}", other),
        }),
    }
}
