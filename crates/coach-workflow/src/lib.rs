//! coach-workflow: the discovery coach's conversation workflow engine
//!
//! A bounded state machine that classifies the user's intent, enriches the
//! question with the active artifacts, optionally retrieves knowledge-base
//! passages, generates a response, validates it, and then either regenerates
//! (at most twice), asks for clarification, or returns.

pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod generate;
pub mod intent;
pub mod retrieval;
pub mod routing;
pub mod state;
pub mod templates;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineConfig, Node, WorkflowEngine};
pub use error::{Error, Result};
pub use events::WorkflowEvent;
pub use generate::PromptAssets;
pub use intent::{Classification, IntentClassifier};
pub use retrieval::{NoRetriever, RetrievalError, Retriever, SharedRetriever};
pub use routing::{Route, RetryController};
pub use state::{ContextType, ConversationState, FinalResult, Intent, Outcome, Passage};
pub use templates::{TemplateFiller, TemplateSet};
pub use validate::{ValidationIssue, ValidationReport, Validator};
