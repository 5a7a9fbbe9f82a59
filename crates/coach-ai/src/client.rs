//! The model capability consumed by the workflow engine

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::{Prompt, Result};

/// A language model that turns a prompt into response text.
///
/// Implementations are shared across concurrent workflow runs and must not
/// keep per-request state. A call that outlives `timeout` fails with
/// [`crate::Error::Timeout`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a complete response for `prompt`
    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> Result<String>;

    /// Short label used in logs and run metrics
    fn describe(&self) -> String {
        "llm".to_string()
    }
}

/// Type alias for a shared client
pub type SharedLlmClient = Arc<dyn LlmClient>;
