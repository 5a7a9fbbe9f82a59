//! Deterministic collaborators for unit tests

use async_trait::async_trait;
use coach_ai::{LlmClient, Prompt};
use parking_lot::Mutex;
use std::time::Duration;

use crate::intent::CLASSIFIER_SYSTEM_PROMPT;
use crate::retrieval::{RetrievalError, Retriever};
use crate::state::{ContextType, Passage};

enum Generation {
    Scripted(Vec<String>),
    Fail,
    Hang,
}

/// Model stub: classification calls get a fixed reply, generation calls walk
/// through `responses` and keep repeating the last one.
pub struct ScriptedLlm {
    generation: Generation,
    classification: Option<String>,
    cursor: Mutex<usize>,
    classification_calls: Mutex<usize>,
    prompts: Mutex<Vec<Prompt>>,
    timeouts: Mutex<Vec<Duration>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<&str>) -> Self {
        Self::with_generation(Generation::Scripted(
            responses.into_iter().map(String::from).collect(),
        ))
    }

    /// Every generation call fails with a non-retryable API error
    pub fn failing() -> Self {
        Self::with_generation(Generation::Fail)
    }

    /// Generation calls never complete
    pub fn hanging() -> Self {
        Self::with_generation(Generation::Hang)
    }

    fn with_generation(generation: Generation) -> Self {
        Self {
            generation,
            classification: Some(r#"{"intent": "question", "confidence": 0.8}"#.to_string()),
            cursor: Mutex::new(0),
            classification_calls: Mutex::new(0),
            prompts: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_classification(mut self, reply: &str) -> Self {
        self.classification = Some(reply.to_string());
        self
    }

    pub fn with_failing_classification(mut self) -> Self {
        self.classification = None;
        self
    }

    pub fn classification_calls(&self) -> usize {
        *self.classification_calls.lock()
    }

    pub fn generation_calls(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Prompts sent for generation, in call order
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().clone()
    }

    /// Timeouts passed with each generation call
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> coach_ai::Result<String> {
        if prompt.system.first().map(String::as_str) == Some(CLASSIFIER_SYSTEM_PROMPT) {
            *self.classification_calls.lock() += 1;
            return self
                .classification
                .clone()
                .ok_or_else(|| coach_ai::Error::api("http_500", "classifier unavailable"));
        }

        self.prompts.lock().push(prompt.clone());
        self.timeouts.lock().push(timeout);

        match &self.generation {
            Generation::Scripted(responses) => {
                let mut cursor = self.cursor.lock();
                let index = (*cursor).min(responses.len().saturating_sub(1));
                *cursor += 1;
                Ok(responses.get(index).cloned().unwrap_or_default())
            }
            Generation::Fail => Err(coach_ai::Error::api("http_400", "bad request")),
            Generation::Hang => std::future::pending().await,
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Returns the same passages for every query and records the queries
pub struct StaticRetriever {
    passages: Vec<Passage>,
    queries: Mutex<Vec<String>>,
}

impl StaticRetriever {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self {
            passages,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, query: &str, _context_type: ContextType) -> Result<Vec<Passage>, RetrievalError> {
        self.queries.lock().push(query.to_string());
        Ok(self.passages.clone())
    }
}

/// Always errors
pub struct FailingRetriever;

#[async_trait]
impl Retriever for FailingRetriever {
    async fn retrieve(&self, _query: &str, _context_type: ContextType) -> Result<Vec<Passage>, RetrievalError> {
        Err("vector store unavailable".into())
    }
}

/// Never answers
pub struct HangingRetriever;

#[async_trait]
impl Retriever for HangingRetriever {
    async fn retrieve(&self, _query: &str, _context_type: ContextType) -> Result<Vec<Passage>, RetrievalError> {
        std::future::pending().await
    }
}
