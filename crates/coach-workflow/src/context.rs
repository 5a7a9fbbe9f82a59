//! Query enrichment with the caller's active artifacts

use regex::Regex;
use std::sync::LazyLock;

use crate::state::{ContextType, ConversationState};

static SUMMARY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(summary|summari[sz]e|summari[sz]ing|recap|tl;?dr)\b").unwrap()
});

static OUTLINE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\boutline\b").unwrap());

static CURRENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(active|current|this|our|my|existing)\b").unwrap());

/// The user question, prefixed with whatever artifact content applies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichedQuery {
    /// Text sent to the model as the final user turn
    pub text: String,
    /// Text sent to the retriever
    pub retrieval_text: String,
}

fn artifact_nouns(context_type: ContextType) -> &'static [&'static str] {
    match context_type {
        ContextType::StrategicInitiative => &["strategic initiative", "initiative"],
        ContextType::Epic => &["epic"],
        ContextType::Feature => &["feature"],
        ContextType::Story => &["story", "user story"],
        ContextType::PiObjective => &["pi objective", "objective"],
    }
}

/// Whether a message asks to summarize or outline the artifact already in context
pub fn is_summary_request(message: &str, context_type: ContextType) -> bool {
    if SUMMARY_PATTERN.is_match(message) {
        return true;
    }
    if !OUTLINE_PATTERN.is_match(message) || !CURRENT_PATTERN.is_match(message) {
        return false;
    }
    let lower = message.to_lowercase();
    artifact_nouns(context_type)
        .iter()
        .any(|noun| lower.contains(noun))
}

fn section_header(context_type: ContextType) -> &'static str {
    match context_type {
        ContextType::StrategicInitiative => "[ACTIVE STRATEGIC INITIATIVE]",
        ContextType::Epic => "[ACTIVE EPIC]",
        ContextType::Feature => "[ACTIVE FEATURE]",
        ContextType::Story => "[ACTIVE STORY]",
        ContextType::PiObjective => "[ACTIVE PI OBJECTIVE]",
    }
}

/// Extra retrieval keywords for artifact kinds the knowledge base files under a title
fn retrieval_prefix(context_type: ContextType) -> Option<&'static str> {
    match context_type {
        ContextType::StrategicInitiative => Some("Strategic Initiative"),
        ContextType::PiObjective => Some("PI Objectives"),
        _ => None,
    }
}

/// Flag summary requests and build the enriched query.
///
/// The artifact matching the active context type is always included. Other
/// loaded artifacts are added as supporting context unless the request is a
/// summary, which stays focused on the one artifact.
pub fn build(state: &mut ConversationState) -> EnrichedQuery {
    state.is_summary = is_summary_request(&state.user_message, state.context_type);

    let mut parts = Vec::new();
    for context_type in ContextType::ALL {
        let Some(content) = state.active_artifact(context_type) else {
            continue;
        };
        if context_type != state.context_type && state.is_summary {
            continue;
        }
        parts.push(format!("{}\n{}\n", section_header(context_type), content.trim()));
    }

    let text = if parts.is_empty() {
        state.user_message.clone()
    } else {
        format!("{}\n[USER QUESTION]\n{}", parts.concat(), state.user_message)
    };

    let retrieval_text = match retrieval_prefix(state.context_type) {
        Some(prefix) => format!("{} {}", prefix, text),
        None => text.clone(),
    };

    tracing::debug!(
        "Built context query ({} chars, summary: {})",
        text.len(),
        state.is_summary
    );

    EnrichedQuery {
        text,
        retrieval_text,
    }
}
