//! Streaming event types and utilities

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

use crate::error::{Error, Result};

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    Stop,
    /// Maximum tokens reached
    Length,
    /// Provider filtered the output
    ContentFilter,
}

impl StopReason {
    /// Map an OpenAI-style `finish_reason`
    pub fn from_finish_reason(reason: &str) -> Option<Self> {
        match reason {
            "stop" => Some(StopReason::Stop),
            "length" => Some(StopReason::Length),
            "content_filter" => Some(StopReason::ContentFilter),
            _ => None,
        }
    }
}

/// Events emitted while a response streams in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// The provider accepted the request
    Start { model: String },
    /// Text content delta
    TextDelta { delta: String },
    /// Response completed successfully
    Done {
        text: String,
        stop_reason: Option<StopReason>,
    },
    /// Error occurred
    Error { message: String },
}

impl MessageEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageEvent::Done { .. } | MessageEvent::Error { .. })
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Accumulates streamed deltas into the final response text
#[derive(Debug, Default)]
pub struct TextBuilder {
    text: String,
    stop_reason: Option<StopReason>,
    finished: bool,
}

impl TextBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event
    pub fn process_event(&mut self, event: &MessageEvent) -> Result<()> {
        match event {
            MessageEvent::TextDelta { delta } => self.text.push_str(delta),
            MessageEvent::Done { text, stop_reason } => {
                // Providers that send a full text on Done win over accumulated deltas.
                if !text.is_empty() {
                    self.text = text.clone();
                }
                self.stop_reason = *stop_reason;
                self.finished = true;
            }
            MessageEvent::Error { message } => return Err(Error::Sse(message.clone())),
            MessageEvent::Start { .. } => {}
        }
        Ok(())
    }

    /// Finish, failing if the stream ended without a Done event
    pub fn build(self) -> Result<String> {
        if !self.finished {
            return Err(Error::UnexpectedResponse(
                "stream ended before completion".to_string(),
            ));
        }
        if self.stop_reason == Some(StopReason::Length) {
            tracing::warn!("Response truncated at max tokens ({} chars)", self.text.len());
        }
        Ok(self.text)
    }
}

/// Drain a stream into the final response text
pub async fn collect_text(mut stream: MessageEventStream) -> Result<String> {
    let mut builder = TextBuilder::new();
    while let Some(event) = stream.next().await {
        let terminal = event.is_terminal();
        builder.process_event(&event)?;
        if terminal {
            break;
        }
    }
    builder.build()
}
