//! Error types for coach-workflow

use thiserror::Error;

use crate::engine::Node;
use crate::state::ContextType;

/// Result type alias using coach-workflow Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop a workflow run.
///
/// Retrieval failures and validation failures never appear here: the first
/// degrades to an empty passage list, the second only drives routing.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller asked for an artifact kind the coach does not know
    #[error("unknown context type: {0}")]
    InvalidContextType(String),

    /// The model call failed
    #[error("{node} failed: {source}")]
    Generation {
        node: Node,
        #[source]
        source: coach_ai::Error,
    },

    /// The model call exceeded its deadline
    #[error("{node} timed out after {seconds}s")]
    Timeout { node: Node, seconds: u64 },

    /// The caller cancelled the run while a node was in flight
    #[error("{node} cancelled")]
    Cancelled { node: Node },

    /// Template filling or extraction was asked for an unsupported artifact kind
    #[error("no {0} template for this request")]
    NoTemplate(ContextType),

    /// The model call behind a template fill or extraction failed
    #[error("template request failed: {0}")]
    Template(#[source] coach_ai::Error),
}

impl Error {
    /// Wrap a model error raised while executing `node`
    pub fn from_llm(node: Node, error: coach_ai::Error) -> Self {
        match error {
            coach_ai::Error::Timeout { seconds } => Error::Timeout { node, seconds },
            source => Error::Generation { node, source },
        }
    }

    /// Check if this error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Generation { source, .. } | Error::Template(source) => source.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_timeout_becomes_typed_timeout() {
        let err = Error::from_llm(Node::Generate, coach_ai::Error::Timeout { seconds: 240 });
        assert!(matches!(
            err,
            Error::Timeout {
                node: Node::Generate,
                seconds: 240
            }
        ));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_llm_failure_keeps_source() {
        let err = Error::from_llm(Node::Generate, coach_ai::Error::api("http_400", "bad"));
        assert!(!err.is_timeout());
        assert_eq!(
            err.to_string(),
            "generate failed: API error: bad (type: http_400)"
        );
    }

    #[test]
    fn test_template_timeout_detected() {
        let err = Error::Template(coach_ai::Error::Timeout { seconds: 180 });
        assert!(err.is_timeout());
        assert_eq!(
            Error::NoTemplate(ContextType::PiObjective).to_string(),
            "no pi-objective template for this request"
        );
    }
}
