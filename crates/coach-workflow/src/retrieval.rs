//! Knowledge-base retrieval capability and the gate that decides whether to use it

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::state::{ContextType, ConversationState, Passage};

/// Opaque retriever failure; the gate only logs it
pub type RetrievalError = Box<dyn std::error::Error + Send + Sync>;

/// Knowledge-base search shared across concurrent runs
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Find passages relevant to `query`
    async fn retrieve(
        &self,
        query: &str,
        context_type: ContextType,
    ) -> Result<Vec<Passage>, RetrievalError>;
}

/// Type alias for a shared retriever
pub type SharedRetriever = Arc<dyn Retriever>;

/// A retriever with an empty knowledge base
pub struct NoRetriever;

#[async_trait]
impl Retriever for NoRetriever {
    async fn retrieve(&self, _query: &str, _context_type: ContextType) -> Result<Vec<Passage>, RetrievalError> {
        Ok(Vec::new())
    }
}

/// Outcome of the retrieval edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalDecision {
    Retrieve,
    Skip,
}

/// Calls the retriever unless the request is a summary; failures degrade to no passages
pub struct RetrievalGate {
    retriever: SharedRetriever,
    timeout: Duration,
}

impl RetrievalGate {
    pub fn new(retriever: SharedRetriever, timeout: Duration) -> Self {
        Self { retriever, timeout }
    }

    /// Summaries rely on the active artifact alone
    pub fn decide(&self, state: &ConversationState) -> RetrievalDecision {
        if state.is_summary {
            RetrievalDecision::Skip
        } else {
            RetrievalDecision::Retrieve
        }
    }

    /// Fetch passages; never fails
    pub async fn retrieve(&self, query: &str, context_type: ContextType) -> Vec<Passage> {
        match tokio::time::timeout(self.timeout, self.retriever.retrieve(query, context_type)).await {
            Ok(Ok(docs)) => {
                tracing::info!("Retrieved {} documents for {}", docs.len(), context_type);
                docs
            }
            Ok(Err(e)) => {
                tracing::warn!("Retrieval error: {}, proceeding with active context only", e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    "Retrieval timed out after {:?}, proceeding with active context only",
                    self.timeout
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingRetriever, HangingRetriever, StaticRetriever};

    #[test]
    fn test_summary_skips_retrieval() {
        let gate = RetrievalGate::new(Arc::new(NoRetriever), Duration::from_secs(30));
        let mut state = ConversationState::new("Summarize the epic", ContextType::Epic);
        assert_eq!(gate.decide(&state), RetrievalDecision::Retrieve);
        state.is_summary = true;
        assert_eq!(gate.decide(&state), RetrievalDecision::Skip);
    }

    #[tokio::test]
    async fn test_passages_forwarded() {
        let retriever = Arc::new(StaticRetriever::new(vec![
            Passage::new("Epic hypothesis template").with_source("epic_template.md"),
        ]));
        let gate = RetrievalGate::new(retriever.clone(), Duration::from_secs(30));

        let docs = gate.retrieve("epic hypothesis", ContextType::Epic).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source.as_deref(), Some("epic_template.md"));
        assert_eq!(retriever.queries(), vec!["epic hypothesis".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty() {
        let gate = RetrievalGate::new(Arc::new(FailingRetriever), Duration::from_secs(30));
        assert!(gate.retrieve("anything", ContextType::Feature).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_to_empty() {
        let gate = RetrievalGate::new(Arc::new(HangingRetriever), Duration::from_secs(30));
        assert!(gate.retrieve("anything", ContextType::Feature).await.is_empty());
    }
}
