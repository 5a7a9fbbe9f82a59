//! OpenAI-compatible Chat Completions provider
//!
//! Serves both the hosted OpenAI API and local Ollama servers, which expose
//! the same `/v1/chat/completions` streaming endpoint.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::RetryConfig;
use crate::{
    client::LlmClient,
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream, StopReason, collect_text},
    types::{ModelConfig, Prompt, Provider},
};

/// Client for any OpenAI-compatible chat endpoint
pub struct OpenAICompatClient {
    client: reqwest::Client,
    api_key: Option<String>,
    model: ModelConfig,
    retry_config: RetryConfig,
}

impl OpenAICompatClient {
    /// Create a client for an explicit model configuration
    pub fn new(model: ModelConfig, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            retry_config: RetryConfig::default(),
        }
    }

    /// Hosted OpenAI with an API key
    pub fn openai(api_key: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self::new(
            ModelConfig::new(Provider::OpenAI, model_id),
            Some(api_key.into()),
        )
    }

    /// Local Ollama server (no API key)
    pub fn ollama(base_url: impl AsRef<str>, model_id: impl Into<String>) -> Self {
        let base = base_url.as_ref().trim_end_matches('/');
        let base = if base.ends_with("/v1") {
            base.to_string()
        } else {
            format!("{}/v1", base)
        };
        Self::new(
            ModelConfig::new(Provider::Ollama, model_id).with_base_url(base),
            None,
        )
    }

    /// Override the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.model.temperature = temperature;
        self
    }

    /// The model this client talks to
    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    /// List chat-capable models served by the endpoint
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.model.base_url);

        let mut request = self.client.get(&url).timeout(Duration::from_secs(10));
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::api("model_list_error", text));
        }

        let list: ModelList = response.json().await?;
        Ok(list
            .data
            .into_iter()
            .map(|m| m.id)
            .filter(|id| is_chat_model(id))
            .collect())
    }

    /// Open a response stream, retrying transient transport failures
    pub async fn stream(&self, prompt: &Prompt) -> Result<MessageEventStream> {
        let mut attempt = 0u32;
        loop {
            match self.open_stream(prompt).await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < self.retry_config.max_retries && e.is_retryable() => {
                    let delay = match &e {
                        Error::RateLimited {
                            retry_after: Some(secs),
                        } => Duration::from_secs(*secs).min(self.retry_config.max_delay),
                        _ => self.retry_config.delay_for_attempt(attempt),
                    };
                    tracing::warn!(
                        "Request to {} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        self.model.provider,
                        attempt + 1,
                        self.retry_config.max_retries + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn open_stream(&self, prompt: &Prompt) -> Result<MessageEventStream> {
        let request = self.build_request(prompt);
        let url = format!("{}/chat/completions", self.model.base_url);

        let mut request_builder = self.client.post(&url).json(&request);
        if let Some(ref key) = self.api_key {
            request_builder = request_builder.bearer_auth(key);
        }

        let mut event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        // Wait for the connection so HTTP failures surface here, where they can be retried.
        match event_source.next().await {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                event_source.close();
                return Err(map_event_source_error(e).await);
            }
            None => {
                return Err(Error::UnexpectedResponse(
                    "event source closed before opening".to_string(),
                ));
            }
        }

        tracing::debug!(
            "Streaming {} ({} prompt chars)",
            self.model.id,
            prompt.char_len()
        );
        Ok(Box::pin(create_stream(event_source, self.model.id.clone())))
    }

    fn build_request(&self, prompt: &Prompt) -> ChatRequest {
        let messages = prompt
            .to_messages()
            .into_iter()
            .map(|(role, content)| ChatRequestMessage {
                role: role.as_str().to_string(),
                content: content.to_string(),
            })
            .collect();

        ChatRequest {
            model: self.model.id.clone(),
            messages,
            stream: true,
            temperature: Some(self.model.temperature),
            max_tokens: self.model.max_tokens,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAICompatClient {
    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> Result<String> {
        let work = async {
            let stream = self.stream(prompt).await?;
            collect_text(stream).await
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                seconds: timeout.as_secs(),
            }),
        }
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.model.provider, self.model.id)
    }
}

/// Embedding models are listed by the same endpoint but cannot chat
fn is_chat_model(id: &str) -> bool {
    let lower = id.to_lowercase();
    !lower.contains("embed") && !lower.contains("whisper") && !lower.contains("tts")
}

async fn map_event_source_error(error: reqwest_eventsource::Error) -> Error {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            match status.as_u16() {
                401 | 403 => Error::InvalidApiKey,
                429 => Error::RateLimited { retry_after },
                code => Error::api(format!("http_{}", code), body),
            }
        }
        reqwest_eventsource::Error::Transport(e) => Error::Http(e),
        other => Error::Sse(other.to_string()),
    }
}

fn create_stream(
    mut event_source: EventSource,
    model_id: String,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut finish_reason: Option<String> = None;

        yield MessageEvent::Start { model: model_id };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => {
                            for choice in chunk.choices {
                                if let Some(content) = choice.delta.content {
                                    accumulated_text.push_str(&content);
                                    yield MessageEvent::TextDelta { delta: content };
                                }
                                if let Some(reason) = choice.finish_reason {
                                    finish_reason = Some(reason);
                                }
                            }
                        }
                        Err(e) => {
                            event_source.close();
                            yield MessageEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                            };
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }

        event_source.close();
        yield MessageEvent::Done {
            text: accumulated_text,
            stop_reason: finish_reason.as_deref().and_then(StopReason::from_finish_reason),
        };
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatRequestMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}
