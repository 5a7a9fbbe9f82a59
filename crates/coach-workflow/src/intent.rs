//! Intent classification: keyword heuristics first, model fallback second

use coach_ai::{Prompt, SharedLlmClient};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

use crate::state::{ContextType, Intent};

/// Confidence assigned when a keyword rule matches
pub const HEURISTIC_CONFIDENCE: f32 = 0.9;

/// Used when the fallback call fails or returns nothing usable
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

/// Used when the model names an intent but omits its confidence
const UNSCORED_CONFIDENCE: f32 = 0.7;

/// System instructions for the fallback classification call
pub const CLASSIFIER_SYSTEM_PROMPT: &str = "\
Analyze the user's message and classify their intent.

Intents:
- draft: User wants to create/draft an Epic, Feature, Story, PI Objective or Strategic Initiative
- question: User has a question or needs information
- evaluate: User wants feedback on existing work
- outline: User wants to see structure/outline before creating
- clarify: The message is too vague to act on

Return ONLY a JSON object: {\"intent\": \"...\", \"confidence\": 0.0-1.0}";

/// Where a classification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSource {
    Heuristic,
    Model,
    Fallback,
}

/// Classifier output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
    pub source: ClassificationSource,
}

impl Classification {
    fn fallback() -> Self {
        Self {
            intent: Intent::Question,
            confidence: FALLBACK_CONFIDENCE,
            source: ClassificationSource::Fallback,
        }
    }
}

/// Ordered keyword rules; the first match wins.
static RULES: LazyLock<Vec<(Regex, Intent)>> = LazyLock::new(|| {
    [
        (
            r"(?i)\b(draft(s|ed|ing)?|creat(e|es|ed|ing)|help me write)\b",
            Intent::Draft,
        ),
        (
            r"(?i)\b(evaluat(e|es|ed|ion|ing)|review(s|ed|ing)?|feedback|critiqu(e|es|ed|ing))\b",
            Intent::Evaluate,
        ),
        (
            r"(?i)\b(outlin(e|es|ed|ing)|structur(e|es|ed|ing))\b",
            Intent::Outline,
        ),
        // Summaries are answered like questions; the context builder flags them separately.
        (
            r"(?i)\b(summary|summaries|summari[sz](e|es|ed|ing))\b",
            Intent::Question,
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, intent)| Regex::new(pattern).ok().map(|re| (re, intent)))
    .collect()
});

/// Apply the keyword rules only
pub fn classify_heuristic(message: &str) -> Option<Classification> {
    RULES
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, intent)| Classification {
            intent: *intent,
            confidence: HEURISTIC_CONFIDENCE,
            source: ClassificationSource::Heuristic,
        })
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    intent: String,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Parse the model's JSON reply, tolerating code fences and surrounding prose
fn parse_model_reply(reply: &str) -> Option<Classification> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let raw: RawClassification = serde_json::from_str(&reply[start..=end]).ok()?;

    let intent = Intent::parse(&raw.intent).unwrap_or(Intent::Question);
    let confidence = match raw.confidence {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        Some(_) => FALLBACK_CONFIDENCE,
        None => UNSCORED_CONFIDENCE,
    };
    Some(Classification {
        intent,
        confidence,
        source: ClassificationSource::Model,
    })
}

/// Maps the latest user message to an [`Intent`]. Never fails.
pub struct IntentClassifier {
    llm: SharedLlmClient,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(llm: SharedLlmClient, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Classify a message, asking the model only when no keyword rule applies
    pub async fn classify(&self, message: &str, context_type: ContextType) -> Classification {
        if let Some(classification) = classify_heuristic(message) {
            return classification;
        }

        let prompt = Prompt::with_system(CLASSIFIER_SYSTEM_PROMPT).user(format!(
            "Message: {}\nContext Type: {}",
            message, context_type
        ));

        match tokio::time::timeout(self.timeout, self.llm.generate(&prompt, self.timeout)).await {
            Ok(Ok(reply)) => parse_model_reply(&reply).unwrap_or_else(|| {
                tracing::warn!("Unparseable intent classification reply, defaulting to question");
                Classification::fallback()
            }),
            Ok(Err(e)) => {
                tracing::warn!("Intent classification error: {}, defaulting to question", e);
                Classification::fallback()
            }
            Err(_) => {
                tracing::warn!(
                    "Intent classification timed out after {:?}, defaulting to question",
                    self.timeout
                );
                Classification::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::testing::ScriptedLlm;

    #[test]
    fn test_heuristic_draft() {
        let c = classify_heuristic("Help me draft an epic for customer onboarding").unwrap();
        assert_eq!(c.intent, Intent::Draft);
        assert_eq!(c.confidence, HEURISTIC_CONFIDENCE);
    }

    #[test]
    fn test_heuristic_rule_order() {
        // Draft outranks evaluate when both appear
        let c = classify_heuristic("Create a feature and then review it").unwrap();
        assert_eq!(c.intent, Intent::Draft);
        let c = classify_heuristic("Please give feedback on the structure").unwrap();
        assert_eq!(c.intent, Intent::Evaluate);
    }

    #[test]
    fn test_heuristic_summary_is_question() {
        let c = classify_heuristic("Summarize the active epic").unwrap();
        assert_eq!(c.intent, Intent::Question);
    }

    #[test]
    fn test_heuristic_accepts_inflections() {
        let c = classify_heuristic("How should a structured backlog look?").unwrap();
        assert_eq!(c.intent, Intent::Outline);
        let c = classify_heuristic("I reviewed the feature, thoughts?").unwrap();
        assert_eq!(c.intent, Intent::Evaluate);
        let c = classify_heuristic("Outlining the PI objectives first").unwrap();
        assert_eq!(c.intent, Intent::Outline);
        let c = classify_heuristic("We created an epic last week").unwrap();
        assert_eq!(c.intent, Intent::Draft);
    }

    #[test]
    fn test_heuristic_needs_whole_words() {
        assert!(classify_heuristic("Give me an overview of WSJF").is_none());
        assert!(classify_heuristic("Can you help with the thing?").is_none());
    }

    #[test]
    fn test_parse_reply_with_code_fence() {
        let c = parse_model_reply("```json\n{\"intent\": \"evaluate\", \"confidence\": 0.8}\n```")
            .unwrap();
        assert_eq!(c.intent, Intent::Evaluate);
        assert!((c.confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_reply_clamps_and_defaults() {
        let c = parse_model_reply(r#"{"intent": "banana", "confidence": 7}"#).unwrap();
        assert_eq!(c.intent, Intent::Question);
        assert_eq!(c.confidence, 1.0);

        let c = parse_model_reply(r#"{"intent": "outline"}"#).unwrap();
        assert_eq!(c.confidence, UNSCORED_CONFIDENCE);

        assert!(parse_model_reply("no json here").is_none());
    }

    #[tokio::test]
    async fn test_model_fallback_used_without_keywords() {
        let llm = Arc::new(
            ScriptedLlm::new(vec!["unused"])
                .with_classification(r#"{"intent": "clarify", "confidence": 0.3}"#),
        );
        let classifier = IntentClassifier::new(llm.clone(), Duration::from_secs(30));

        let c = classifier
            .classify("Can you help with the thing?", ContextType::Feature)
            .await;
        assert_eq!(c.intent, Intent::Clarify);
        assert!(c.confidence < 0.5);
        assert_eq!(c.source, ClassificationSource::Model);
        assert_eq!(llm.classification_calls(), 1);
    }

    #[tokio::test]
    async fn test_model_error_defaults_to_question() {
        let llm = Arc::new(ScriptedLlm::new(vec!["unused"]).with_failing_classification());
        let classifier = IntentClassifier::new(llm, Duration::from_secs(30));

        let c = classifier.classify("thoughts?", ContextType::Epic).await;
        assert_eq!(c.intent, Intent::Question);
        assert_eq!(c.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(c.source, ClassificationSource::Fallback);
    }

    #[tokio::test]
    async fn test_heuristic_match_skips_model() {
        let llm = Arc::new(ScriptedLlm::new(vec!["unused"]));
        let classifier = IntentClassifier::new(llm.clone(), Duration::from_secs(30));

        classifier.classify("draft a feature", ContextType::Feature).await;
        assert_eq!(llm.classification_calls(), 0);
    }
}
