//! Conversation state threaded through every workflow node

use coach_ai::ChatMessage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::validate::ValidationIssue;

/// Which SAFe artifact kind the user is working on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextType {
    StrategicInitiative,
    Epic,
    Feature,
    Story,
    PiObjective,
}

impl ContextType {
    /// Every context type, coarsest first
    pub const ALL: [ContextType; 5] = [
        ContextType::StrategicInitiative,
        ContextType::Epic,
        ContextType::Feature,
        ContextType::Story,
        ContextType::PiObjective,
    ];

    /// Wire name, as used by the session layer
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::StrategicInitiative => "strategic-initiative",
            ContextType::Epic => "epic",
            ContextType::Feature => "feature",
            ContextType::Story => "story",
            ContextType::PiObjective => "pi-objective",
        }
    }

    /// Human-readable artifact name
    pub fn label(&self) -> &'static str {
        match self {
            ContextType::StrategicInitiative => "Strategic Initiative",
            ContextType::Epic => "Epic",
            ContextType::Feature => "Feature",
            ContextType::Story => "Story",
            ContextType::PiObjective => "PI Objective",
        }
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        ContextType::ALL
            .into_iter()
            .find(|ct| ct.as_str() == normalized)
            .ok_or_else(|| Error::InvalidContextType(s.to_string()))
    }
}

/// Classified purpose of the latest user message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Draft,
    Question,
    Evaluate,
    Outline,
    Clarify,
}

impl Intent {
    /// Get the intent as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Draft => "draft",
            Intent::Question => "question",
            Intent::Evaluate => "evaluate",
            Intent::Outline => "outline",
            Intent::Clarify => "clarify",
        }
    }

    /// Parse a model-reported intent label
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "draft" => Some(Intent::Draft),
            "question" => Some(Intent::Question),
            "evaluate" => Some(Intent::Evaluate),
            "outline" => Some(Intent::Outline),
            "clarify" => Some(Intent::Clarify),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A knowledge-base excerpt returned by the retriever
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Excerpt text
    pub content: String,
    /// Where the excerpt came from (file name, document id)
    #[serde(default)]
    pub source: Option<String>,
}

impl Passage {
    /// Create a passage without source metadata
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: None,
        }
    }

    /// Attach a source label
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// The mutable record for one chat request.
///
/// Created by the caller, mutated only by the engine node that owns each
/// step, and dropped when the run returns.
#[derive(Debug, Clone)]
pub struct ConversationState {
    /// Prior exchange, oldest first
    pub messages: Vec<ChatMessage>,
    /// Latest user turn
    pub user_message: String,
    /// Active artifact kind
    pub context_type: ContextType,

    pub active_epic: Option<String>,
    pub active_feature: Option<String>,
    pub active_strategic_initiative: Option<String>,
    pub active_pi_objective: Option<String>,

    pub intent: Intent,
    /// Classifier confidence in [0, 1]
    pub confidence: f32,
    /// Summary/outline ask: skips retrieval and history
    pub is_summary: bool,
    pub retrieved_docs: Vec<Passage>,
    pub generated_response: String,
    /// Empty iff the latest response was accepted
    pub validation_issues: BTreeSet<ValidationIssue>,
    pub needs_retry: bool,
    pub needs_clarification: bool,
    /// Regeneration attempts so far, never above the engine's retry bound
    pub retry_count: u32,
}

impl ConversationState {
    /// Fresh state for a user message
    pub fn new(user_message: impl Into<String>, context_type: ContextType) -> Self {
        Self {
            messages: Vec::new(),
            user_message: user_message.into(),
            context_type,
            active_epic: None,
            active_feature: None,
            active_strategic_initiative: None,
            active_pi_objective: None,
            intent: Intent::Question,
            confidence: 0.0,
            is_summary: false,
            retrieved_docs: Vec::new(),
            generated_response: String::new(),
            validation_issues: BTreeSet::new(),
            needs_retry: false,
            needs_clarification: false,
            retry_count: 0,
        }
    }

    /// Fresh state from untyped request fields; unknown context types are rejected here
    pub fn from_request(user_message: impl Into<String>, context_type: &str) -> crate::Result<Self> {
        Ok(Self::new(user_message, context_type.parse()?))
    }

    pub fn with_history(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_active_epic(mut self, content: impl Into<String>) -> Self {
        self.active_epic = Some(content.into());
        self
    }

    pub fn with_active_feature(mut self, content: impl Into<String>) -> Self {
        self.active_feature = Some(content.into());
        self
    }

    pub fn with_active_strategic_initiative(mut self, content: impl Into<String>) -> Self {
        self.active_strategic_initiative = Some(content.into());
        self
    }

    pub fn with_active_pi_objective(mut self, content: impl Into<String>) -> Self {
        self.active_pi_objective = Some(content.into());
        self
    }

    /// Loaded content for an artifact kind, if any. Stories have no active slot.
    pub fn active_artifact(&self, context_type: ContextType) -> Option<&str> {
        let slot = match context_type {
            ContextType::StrategicInitiative => &self.active_strategic_initiative,
            ContextType::Epic => &self.active_epic,
            ContextType::Feature => &self.active_feature,
            ContextType::PiObjective => &self.active_pi_objective,
            ContextType::Story => return None,
        };
        slot.as_deref().filter(|s| !s.trim().is_empty())
    }
}

/// How a run finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A response was produced, possibly with unresolved validation issues
    Completed,
    /// The engine needs more input from the user
    Clarify,
}

/// What the engine hands back to its caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub response: String,
    pub intent: Intent,
    pub confidence: f32,
    pub retry_count: u32,
    pub validation_issues: BTreeSet<ValidationIssue>,
    pub needs_clarification: bool,
    pub outcome: Outcome,
    pub is_summary: bool,
    pub retrieved_count: usize,
}

impl FinalResult {
    pub(crate) fn from_state(state: ConversationState, outcome: Outcome, response: String) -> Self {
        Self {
            response,
            intent: state.intent,
            confidence: state.confidence,
            retry_count: state.retry_count,
            validation_issues: state.validation_issues,
            needs_clarification: state.needs_clarification,
            outcome,
            is_summary: state.is_summary,
            retrieved_count: state.retrieved_docs.len(),
        }
    }

    /// Issue codes as strings, in stable order
    pub fn issue_codes(&self) -> Vec<&'static str> {
        self.validation_issues.iter().map(|i| i.as_str()).collect()
    }

    /// True when quality checks did not fully pass
    pub fn has_warnings(&self) -> bool {
        self.outcome == Outcome::Completed && !self.validation_issues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_type_parse() {
        assert_eq!("epic".parse::<ContextType>().unwrap(), ContextType::Epic);
        assert_eq!(
            "Strategic_Initiative".parse::<ContextType>().unwrap(),
            ContextType::StrategicInitiative
        );
        assert_eq!(
            "pi objective".parse::<ContextType>().unwrap(),
            ContextType::PiObjective
        );
    }

    #[test]
    fn test_unknown_context_type_rejected_at_construction() {
        let err = ConversationState::from_request("hello", "portfolio").unwrap_err();
        assert!(matches!(err, Error::InvalidContextType(ref s) if s == "portfolio"));
    }

    #[test]
    fn test_context_type_serde_names() {
        let json = serde_json::to_string(&ContextType::PiObjective).unwrap();
        assert_eq!(json, "\"pi-objective\"");
        let ct: ContextType = serde_json::from_str("\"strategic-initiative\"").unwrap();
        assert_eq!(ct, ContextType::StrategicInitiative);
    }

    #[test]
    fn test_active_artifact_ignores_blank_content() {
        let state = ConversationState::new("hi", ContextType::Epic).with_active_epic("   ");
        assert!(state.active_artifact(ContextType::Epic).is_none());

        let state = state.with_active_feature("FEATURE NAME: Export");
        assert_eq!(
            state.active_artifact(ContextType::Feature),
            Some("FEATURE NAME: Export")
        );
        assert!(state.active_artifact(ContextType::Story).is_none());
    }

    #[test]
    fn test_intent_parse_is_lenient_about_case() {
        assert_eq!(Intent::parse(" Draft "), Some(Intent::Draft));
        assert_eq!(Intent::parse("summarize"), None);
    }
}
