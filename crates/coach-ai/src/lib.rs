//! coach-ai: language model client layer
//!
//! This crate provides the prompt and message types the discovery coach sends
//! to a model, the [`LlmClient`] capability the workflow engine calls, and an
//! OpenAI-compatible streaming provider that also serves local Ollama models.

pub mod client;
pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use client::{LlmClient, SharedLlmClient};
pub use error::{Error, Result};
pub use stream::MessageEventStream;
pub use types::*;
