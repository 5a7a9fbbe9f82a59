//! Rule-based response validation

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use crate::intent::FALLBACK_CONFIDENCE;
use crate::state::{ContextType, ConversationState, Intent};

/// A defect found in a generated response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationIssue {
    LengthOutOfBounds,
    MissingRequiredSection,
    IncompleteContent,
}

impl ValidationIssue {
    /// Stable issue code
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationIssue::LengthOutOfBounds => "length_out_of_bounds",
            ValidationIssue::MissingRequiredSection => "missing_required_section",
            ValidationIssue::IncompleteContent => "incomplete_content",
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Section markers a draft of each artifact kind must contain
pub fn required_sections(context_type: ContextType) -> &'static [&'static str] {
    match context_type {
        ContextType::Epic => &["EPIC NAME", "EPIC HYPOTHESIS STATEMENT", "BUSINESS CONTEXT"],
        ContextType::StrategicInitiative => &[
            "INITIATIVE NAME",
            "STRATEGIC CONTEXT",
            "CUSTOMER / USER SEGMENT",
        ],
        ContextType::Feature => &["FEATURE NAME", "USER STORY", "ACCEPTANCE CRITERIA"],
        ContextType::Story => &["USER STORY", "ACCEPTANCE CRITERIA"],
        ContextType::PiObjective => &["OBJECTIVE", "KEY RESULTS"],
    }
}

static PLACEHOLDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[\s*(to be filled|to be determined|fill in|tbd|tbc|insert|placeholder)[^\]]*\]")
        .unwrap()
});

/// Everything one validation pass found
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub issues: BTreeSet<ValidationIssue>,
    /// Required markers absent from a draft
    pub missing_sections: Vec<&'static str>,
    /// Response length in characters
    pub length: usize,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Deterministic response checker that also sets the routing flags
#[derive(Debug, Clone)]
pub struct Validator {
    min_chars: usize,
    max_chars: usize,
    max_retries: u32,
    clarification_threshold: f32,
}

impl Validator {
    pub fn new(min_chars: usize, max_chars: usize, max_retries: u32, clarification_threshold: f32) -> Self {
        Self {
            min_chars,
            max_chars,
            max_retries,
            clarification_threshold,
        }
    }

    /// Inspect a response without touching any state
    pub fn check(&self, response: &str, intent: Intent, context_type: ContextType) -> ValidationReport {
        let mut report = ValidationReport {
            length: response.chars().count(),
            ..Default::default()
        };

        if report.length < self.min_chars || report.length > self.max_chars {
            report.issues.insert(ValidationIssue::LengthOutOfBounds);
        }

        if intent == Intent::Draft {
            let upper = response.to_uppercase();
            report.missing_sections = required_sections(context_type)
                .iter()
                .copied()
                .filter(|section| !upper.contains(section))
                .collect();
            if !report.missing_sections.is_empty() {
                report.issues.insert(ValidationIssue::MissingRequiredSection);
            }
        }

        let trimmed = response.trim_end();
        if PLACEHOLDER_PATTERN.is_match(response) || trimmed.ends_with("...") || trimmed.ends_with('…') {
            report.issues.insert(ValidationIssue::IncompleteContent);
        }

        report
    }

    /// Validate the latest response and set the routing flags.
    ///
    /// Failures regenerate until the bound is reached. Requests the classifier
    /// could not make sense of (a `clarify` intent, or confidence under the
    /// classifier's fallback score) skip regeneration. Once no retry is
    /// scheduled, a low-confidence failure asks the user for clarification.
    /// A clean response clears both flags.
    pub fn validate(&self, state: &mut ConversationState) -> ValidationReport {
        let report = self.check(&state.generated_response, state.intent, state.context_type);

        let has_issues = !report.passed();
        let unclear = state.intent == Intent::Clarify || state.confidence < FALLBACK_CONFIDENCE;
        let low_confidence = state.confidence < self.clarification_threshold;

        state.validation_issues = report.issues.clone();
        state.needs_retry = has_issues && !unclear && state.retry_count < self.max_retries;
        state.needs_clarification =
            has_issues && (low_confidence || unclear) && !state.needs_retry;

        if has_issues {
            tracing::warn!(
                "Validation issues: {}",
                report
                    .issues
                    .iter()
                    .map(|i| i.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        } else {
            tracing::debug!("Response validated ({} chars)", report.length);
        }

        report
    }
}
