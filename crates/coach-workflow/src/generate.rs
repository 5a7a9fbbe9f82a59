//! Prompt assembly and the model call

use coach_ai::{ChatMessage, Prompt, SharedLlmClient};
use std::time::Duration;

use crate::context::EnrichedQuery;
use crate::engine::EngineConfig;
use crate::state::{ContextType, ConversationState, Intent};
use crate::validate::{ValidationIssue, ValidationReport};

/// Built-in coaching instructions, used when no prompt file is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a SAFe discovery coach. You help product managers, epic owners and \
business owners shape Strategic Initiatives, Epics, Features, Stories and PI \
Objectives. Ask probing questions, challenge vague outcomes, and prefer \
measurable hypotheses and leading indicators.

When asked to draft an artifact, use the canonical template headings in \
upper case (for example EPIC NAME, EPIC HYPOTHESIS STATEMENT, BUSINESS CONTEXT \
for an Epic; FEATURE NAME, USER STORY, ACCEPTANCE CRITERIA for a Feature) and \
fill every section with concrete content. Never leave placeholders.";

/// Externally supplied prompt text
#[derive(Debug, Clone)]
pub struct PromptAssets {
    pub system_prompt: String,
}

impl Default for PromptAssets {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl PromptAssets {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }
}

fn context_addendum(context_type: ContextType) -> Option<&'static str> {
    match context_type {
        ContextType::StrategicInitiative => Some(
            "You are currently helping with a Strategic Initiative. Focus on business outcomes, \
             strategic alignment, customer segments, and high-level planning. Use the Strategic \
             Initiative template from the knowledge base.",
        ),
        ContextType::PiObjective => Some(
            "You are currently helping with PI Objectives. Focus on objectives, key results, and \
             committed/uncommitted items for the Program Increment.",
        ),
        _ => None,
    }
}

/// Per-request generation budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationPlan {
    pub timeout: Duration,
    /// Maximum number of prior messages sent with the prompt
    pub history_window: usize,
}

impl GenerationPlan {
    /// Drafts and summaries are large generations and get the long timeout
    pub fn for_state(state: &ConversationState, config: &EngineConfig) -> Self {
        let is_draft = state.intent == Intent::Draft;
        let timeout = if is_draft || state.is_summary {
            config.draft_timeout
        } else {
            config.default_timeout
        };
        let history_window = if state.is_summary {
            config.summary_history
        } else if is_draft {
            config.draft_history
        } else {
            config.default_history
        };
        Self {
            timeout,
            history_window,
        }
    }
}

/// The most recent `window` messages
pub fn history_window(messages: &[ChatMessage], window: usize) -> &[ChatMessage] {
    &messages[messages.len().saturating_sub(window)..]
}

fn revision_note(report: &ValidationReport) -> String {
    let mut notes = Vec::new();
    for issue in &report.issues {
        match issue {
            ValidationIssue::MissingRequiredSection => notes.push(format!(
                "include these sections: {}",
                report.missing_sections.join(", ")
            )),
            ValidationIssue::IncompleteContent => {
                notes.push("replace every placeholder with concrete content".to_string())
            }
            ValidationIssue::LengthOutOfBounds => notes.push(format!(
                "adjust the length (previous answer was {} characters)",
                report.length
            )),
        }
    }
    format!("Your previous answer did not pass review. Please {}.", notes.join("; "))
}

/// Builds the prompt and calls the model
pub struct ResponseGenerator {
    llm: SharedLlmClient,
    assets: PromptAssets,
}

impl ResponseGenerator {
    pub fn new(llm: SharedLlmClient, assets: PromptAssets) -> Self {
        Self { llm, assets }
    }

    /// Assemble the prompt: instructions, passages, history window, enriched query
    pub fn build_prompt(
        &self,
        state: &ConversationState,
        query: &EnrichedQuery,
        plan: &GenerationPlan,
        previous: Option<&ValidationReport>,
    ) -> Prompt {
        let mut system = self.assets.system_prompt.clone();
        if let Some(addendum) = context_addendum(state.context_type) {
            system.push_str("\n\n");
            system.push_str(addendum);
        }

        let documents = if state.is_summary {
            "Summary request - using active context only.".to_string()
        } else if state.retrieved_docs.is_empty() {
            "No internal documents available - rely on the active context.".to_string()
        } else {
            state
                .retrieved_docs
                .iter()
                .map(|d| d.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let mut blocks = vec![
            system,
            format!("Content from internal documents:\n{}", documents),
        ];
        if let Some(report) = previous.filter(|r| !r.passed()) {
            blocks.push(revision_note(report));
        }

        Prompt {
            system: blocks,
            history: history_window(&state.messages, plan.history_window).to_vec(),
            user: query.text.clone(),
        }
    }

    /// Generate a response; timeouts and model errors are returned, not retried
    pub async fn generate(
        &self,
        state: &ConversationState,
        query: &EnrichedQuery,
        plan: &GenerationPlan,
        previous: Option<&ValidationReport>,
    ) -> coach_ai::Result<String> {
        let prompt = self.build_prompt(state, query, plan, previous);
        tracing::info!(
            "Generating response with {} (timeout: {}s, history: {}, attempt: {})",
            self.llm.describe(),
            plan.timeout.as_secs(),
            prompt.history.len(),
            state.retry_count + 1
        );

        let response = match tokio::time::timeout(plan.timeout, self.llm.generate(&prompt, plan.timeout)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(coach_ai::Error::Timeout {
                    seconds: plan.timeout.as_secs(),
                });
            }
        };

        tracing::info!("Generated response ({} chars)", response.len());
        Ok(response)
    }
}
