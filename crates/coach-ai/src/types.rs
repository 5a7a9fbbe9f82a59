//! Core types for model interactions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Known model backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Ollama,
    Custom,
}

impl Provider {
    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Ollama => "Ollama",
            Provider::Custom => "Custom",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Ollama | Provider::Custom => None,
        }
    }

    /// Base URL of the OpenAI-compatible endpoint, before any override
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::Custom => "",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "ollama" => Ok(Provider::Ollama),
            "custom" => Ok(Provider::Custom),
            other => Err(Error::InvalidConfig(format!("unknown provider: {}", other))),
        }
    }
}

/// Model selection and sampling settings for one client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier (e.g., "gpt-4o-mini", "llama3.2:latest")
    pub id: String,
    /// Provider
    pub provider: Provider,
    /// Base URL for API calls
    pub base_url: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum output tokens
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    /// Create a config pointing at the provider's default endpoint
    pub fn new(provider: Provider, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider,
            base_url: provider.default_base_url().to_string(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    /// Override the endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A role-tagged piece of conversation text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Everything sent to the model for one generation call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    /// System instruction blocks, in order
    pub system: Vec<String>,
    /// Prior conversation turns
    pub history: Vec<ChatMessage>,
    /// The final user turn
    pub user: String,
}

impl Prompt {
    /// Create a prompt with a single system block
    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            system: vec![system.into()],
            history: vec![],
            user: String::new(),
        }
    }

    /// Set the final user turn
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Flatten into chat messages: system blocks, history, then the user turn
    pub fn to_messages(&self) -> Vec<(Role, &str)> {
        let mut out: Vec<(Role, &str)> = self
            .system
            .iter()
            .map(|s| (Role::System, s.as_str()))
            .collect();
        out.extend(self.history.iter().map(|m| (m.role, m.content.as_str())));
        out.push((Role::User, self.user.as_str()));
        out
    }

    /// Flatten into a single text block for backends without chat roles
    pub fn render(&self) -> String {
        self.to_messages()
            .into_iter()
            .map(|(role, text)| format!("[{}]\n{}", role.as_str(), text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Approximate size in characters
    pub fn char_len(&self) -> usize {
        self.to_messages()
            .iter()
            .map(|(_, text)| text.chars().count())
            .sum()
    }
}
