//! Filling artifact templates from a finished discovery conversation
//!
//! Outside the chat graph: the caller asks for one filled Epic, Feature or
//! Story template, or for every Feature (Story) proposed in the conversation
//! as separate filled templates.

use coach_ai::{ChatMessage, Prompt, Role, SharedLlmClient};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::state::{ContextType, ConversationState};

/// Deadline for a single template fill
pub const FILL_TIMEOUT: Duration = Duration::from_secs(240);

/// Deadline for a multi-template extraction
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(180);

/// Most recent messages shown to the model when filling one template
pub const FILL_HISTORY: usize = 20;

/// Extracted pieces this short are separator noise, not templates
const MIN_EXTRACTED_CHARS: usize = 100;

const PLACEHOLDER: &str = "[Fill in here]";

const FILLER_SYSTEM_PROMPT: &str =
    "You turn SAFe discovery conversations into completed artifact templates. \
     Keep the template's section headers exactly as given.";

const EPIC_TEMPLATE: &str = "\
EPIC NAME: [Fill in here]
EPIC OWNER: [Fill in here]
EPIC HYPOTHESIS STATEMENT:
  For [Fill in here]
  who [Fill in here]
  the [Fill in here] is a [Fill in here]
  that [Fill in here]
  unlike [Fill in here]
  our solution [Fill in here]
BUSINESS CONTEXT: [Fill in here]
PROBLEM / OPPORTUNITY: [Fill in here]
CUSTOMER / USER SEGMENT: [Fill in here]
BUSINESS OUTCOMES: [Fill in here]
LEADING INDICATORS: [Fill in here]
NON-FUNCTIONAL REQUIREMENTS: [Fill in here]
MINIMUM VIABLE PRODUCT (MVP): [Fill in here]
IN SCOPE: [Fill in here]
OUT OF SCOPE: [Fill in here]
SOLUTION APPROACH: [Fill in here]
DEPENDENCIES: [Fill in here]
RISKS AND ASSUMPTIONS: [Fill in here]
COST ESTIMATE: [Fill in here]
WSJF (COST OF DELAY / JOB SIZE): [Fill in here]
GO / NO-GO CRITERIA: [Fill in here]
ANALYSIS NOTES: [Fill in here]
";

const FEATURE_TEMPLATE: &str = "\
FEATURE NAME: [Fill in here]
PARENT EPIC: [Fill in here]
DESCRIPTION: [Fill in here]
USER STORY: As a [Fill in here], I want [Fill in here] so that [Fill in here]
BENEFIT HYPOTHESIS: [Fill in here]
ACCEPTANCE CRITERIA: [Fill in here]
NON-FUNCTIONAL REQUIREMENTS: [Fill in here]
DEPENDENCIES: [Fill in here]
WSJF (COST OF DELAY / JOB SIZE): [Fill in here]
NOTES: [Fill in here]
";

const STORY_TEMPLATE: &str = "\
STORY TITLE: [Fill in here]
PARENT FEATURE: [Fill in here]
USER STORY: As a [Fill in here], I want [Fill in here] so that [Fill in here]
ACCEPTANCE CRITERIA: [Fill in here]
DEFINITION OF DONE: [Fill in here]
STORY POINTS: [Fill in here]
DEPENDENCIES: [Fill in here]
NOTES: [Fill in here]
";

/// The blank templates for the fillable artifact kinds
#[derive(Debug, Clone)]
pub struct TemplateSet {
    epic: String,
    feature: String,
    story: String,
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self {
            epic: EPIC_TEMPLATE.to_string(),
            feature: FEATURE_TEMPLATE.to_string(),
            story: STORY_TEMPLATE.to_string(),
        }
    }
}

impl TemplateSet {
    /// File name a replacement template is read from
    pub fn file_name(kind: ContextType) -> Option<&'static str> {
        match kind {
            ContextType::Epic => Some("epic_template.txt"),
            ContextType::Feature => Some("feature_template.txt"),
            ContextType::Story => Some("user_story_template.txt"),
            ContextType::StrategicInitiative | ContextType::PiObjective => None,
        }
    }

    fn slot(&mut self, kind: ContextType) -> Option<&mut String> {
        match kind {
            ContextType::Epic => Some(&mut self.epic),
            ContextType::Feature => Some(&mut self.feature),
            ContextType::Story => Some(&mut self.story),
            ContextType::StrategicInitiative | ContextType::PiObjective => None,
        }
    }

    /// Replace the built-in template for `kind`
    pub fn with_template(mut self, kind: ContextType, content: impl Into<String>) -> Result<Self> {
        let slot = self.slot(kind).ok_or(Error::NoTemplate(kind))?;
        *slot = content.into();
        Ok(self)
    }

    pub fn get(&self, kind: ContextType) -> Result<&str> {
        match kind {
            ContextType::Epic => Ok(&self.epic),
            ContextType::Feature => Ok(&self.feature),
            ContextType::Story => Ok(&self.story),
            other => Err(Error::NoTemplate(other)),
        }
    }
}

/// Number of sections a template asks for: unindented `HEADER:` lines
fn field_count(template: &str) -> usize {
    template
        .lines()
        .filter(|line| !line.starts_with(char::is_whitespace) && line.contains(':'))
        .count()
        .max(1)
}

fn transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let speaker = if m.role == Role::User { "User" } else { "Coach" };
            format!("{}: {}", speaker, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn separator(kind: ContextType) -> Result<&'static str> {
    match kind {
        ContextType::Feature => Ok("---FEATURE_SEPARATOR---"),
        ContextType::Story => Ok("---STORY_SEPARATOR---"),
        other => Err(Error::NoTemplate(other)),
    }
}

/// Split an extraction reply into its templates, dropping fragments
pub fn split_extracted(reply: &str, separator: &str) -> Vec<String> {
    reply
        .split(separator)
        .map(str::trim)
        .filter(|piece| piece.chars().count() > MIN_EXTRACTED_CHARS)
        .map(String::from)
        .collect()
}

/// Asks the model to fill templates from a conversation
pub struct TemplateFiller {
    llm: SharedLlmClient,
    templates: TemplateSet,
}

impl TemplateFiller {
    pub fn new(llm: SharedLlmClient, templates: TemplateSet) -> Self {
        Self { llm, templates }
    }

    /// Prompt for filling one `kind` template from the state's history
    pub fn fill_prompt(&self, kind: ContextType, state: &ConversationState) -> Result<Prompt> {
        let template = self.templates.get(kind)?;
        let start = state.messages.len().saturating_sub(FILL_HISTORY);
        let label = kind.as_str().to_uppercase();

        let user = format!(
            "Based on the following discovery conversation, fill out the {label} template \
             with all {count} fields.\n\n\
             Replace every {PLACEHOLDER} placeholder with specific, detailed information from \
             the conversation. Where the conversation says nothing about a field, give a \
             reasonable inference or note what information is still needed.\n\n\
             DISCOVERY CONVERSATION:\n{conversation}\n\n\
             {label} CONTEXT:\nActive Epic: {epic}\nActive Feature: {feature}\n\n\
             TEMPLATE TO FILL:\n{template}\n\n\
             Return only the completed template, keeping its structure and section headers.",
            count = field_count(template),
            conversation = transcript(&state.messages[start..]),
            epic = state.active_epic.as_deref().unwrap_or("None"),
            feature = state.active_feature.as_deref().unwrap_or("None"),
        );
        Ok(Prompt::with_system(FILLER_SYSTEM_PROMPT).user(user))
    }

    /// Fill one template
    pub async fn fill(&self, kind: ContextType, state: &ConversationState) -> Result<String> {
        let prompt = self.fill_prompt(kind, state)?;
        tracing::info!("Filling {} template from {} messages", kind, state.messages.len());
        let filled = self
            .llm
            .generate(&prompt, FILL_TIMEOUT)
            .await
            .map_err(Error::Template)?;
        Ok(filled.trim().to_string())
    }

    /// Prompt for extracting every proposed Feature (or Story) as its own template
    pub fn extract_prompt(&self, kind: ContextType, state: &ConversationState) -> Result<Prompt> {
        let separator = separator(kind)?;
        let template = self.templates.get(kind)?;
        let (item, parent, parent_content) = match kind {
            ContextType::Story => ("user story", "Feature", state.active_feature.as_deref()),
            _ => ("feature", "Epic", state.active_epic.as_deref()),
        };

        let user = format!(
            "You are extracting {item} proposals from a conversation in which several were \
             proposed for an {parent}.\n\n\
             Active {parent}:\n{parent_content}\n\n\
             Conversation:\n{conversation}\n\n\
             Template:\n{template}\n\n\
             Instructions:\n\
             1. Count the distinct {item} proposals in the conversation.\n\
             2. Fill ONE separate template for EACH proposal. Never combine proposals.\n\
             3. Use the exact name or title from each proposal.\n\
             4. Fill every field from the conversation; write \"Not specified in conversation\" \
             where information is missing.\n\
             5. After each completed template put this line on its own: {separator}\n\
             6. Output only the filled templates, with no explanations.",
            parent_content = parent_content.unwrap_or("Not specified"),
            conversation = transcript(&state.messages),
        );
        Ok(Prompt::with_system(FILLER_SYSTEM_PROMPT).user(user))
    }

    /// Extract every proposed Feature (`ContextType::Feature`) or Story
    /// (`ContextType::Story`) as a separately filled template
    pub async fn extract(&self, kind: ContextType, state: &ConversationState) -> Result<Vec<String>> {
        let prompt = self.extract_prompt(kind, state)?;
        let reply = self
            .llm
            .generate(&prompt, EXTRACT_TIMEOUT)
            .await
            .map_err(Error::Template)?;

        let separator = separator(kind)?;
        let items = split_extracted(&reply, separator);
        tracing::info!(
            "Extracted {} {} template(s) ({} separators in {} chars)",
            items.len(),
            kind,
            reply.matches(separator).count(),
            reply.len()
        );
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedLlm;
    use crate::validate::required_sections;
    use std::sync::Arc;

    fn conversation() -> ConversationState {
        ConversationState::new("", ContextType::Feature)
            .with_active_epic("EPIC NAME: Rural 5G rollout")
            .with_history(vec![
                ChatMessage::user("Which features does the 5G epic need?"),
                ChatMessage::assistant(
                    "Feature 1: Basic 5G Connectivity Service. Feature 2: Free Antenna Installation.",
                ),
            ])
    }

    fn filled_feature(name: &str) -> String {
        format!(
            "FEATURE NAME: {name}\nPARENT EPIC: Rural 5G rollout\nDESCRIPTION: Households \
             outside the fibre footprint get a 5G line.\nUSER STORY: As a rural household I \
             want fast internet so that I can work from home.\nACCEPTANCE CRITERIA: Not \
             specified in conversation"
        )
    }

    #[test]
    fn test_builtin_templates_carry_required_sections() {
        let templates = TemplateSet::default();
        for kind in [ContextType::Epic, ContextType::Feature, ContextType::Story] {
            let template = templates.get(kind).unwrap();
            for section in required_sections(kind) {
                assert!(template.contains(section), "{} template lacks {}", kind, section);
            }
        }
        assert_eq!(field_count(templates.get(ContextType::Epic).unwrap()), 19);
        assert_eq!(field_count(templates.get(ContextType::Feature).unwrap()), 10);
        assert_eq!(field_count(templates.get(ContextType::Story).unwrap()), 8);
    }

    #[test]
    fn test_only_three_kinds_have_templates() {
        let templates = TemplateSet::default();
        assert!(matches!(
            templates.get(ContextType::PiObjective),
            Err(Error::NoTemplate(ContextType::PiObjective))
        ));
        assert!(templates
            .clone()
            .with_template(ContextType::StrategicInitiative, "x")
            .is_err());

        let custom = templates
            .with_template(ContextType::Story, "TITLE: [Fill in here]")
            .unwrap();
        assert_eq!(custom.get(ContextType::Story).unwrap(), "TITLE: [Fill in here]");
        assert_eq!(TemplateSet::file_name(ContextType::Story), Some("user_story_template.txt"));
    }

    #[test]
    fn test_fill_prompt_uses_recent_history() {
        let filler = TemplateFiller::new(Arc::new(ScriptedLlm::new(vec!["x"])), TemplateSet::default());
        let history = (0..30)
            .map(|i| ChatMessage::user(format!("message {}", i)))
            .collect();
        let state = ConversationState::new("", ContextType::Epic)
            .with_active_epic("EPIC NAME: Onboarding")
            .with_history(history);

        let prompt = filler.fill_prompt(ContextType::Epic, &state).unwrap();
        assert!(prompt.history.is_empty());
        assert!(prompt.user.contains("fill out the EPIC template with all 19 fields"));
        assert!(prompt.user.contains("User: message 29"));
        assert!(prompt.user.contains("User: message 10"));
        assert!(!prompt.user.contains("User: message 9\n"));
        assert!(prompt.user.contains("Active Epic: EPIC NAME: Onboarding"));
        assert!(prompt.user.contains("Active Feature: None"));
    }

    #[tokio::test]
    async fn test_fill_returns_trimmed_reply() {
        let reply = format!("\n{}\n", filled_feature("Free Antenna Installation"));
        let llm = Arc::new(ScriptedLlm::new(vec![reply.as_str()]));
        let filler = TemplateFiller::new(llm.clone(), TemplateSet::default());

        let filled = filler.fill(ContextType::Feature, &conversation()).await.unwrap();
        assert!(filled.starts_with("FEATURE NAME: Free Antenna Installation"));
        assert_eq!(llm.timeouts(), vec![FILL_TIMEOUT]);
    }

    #[tokio::test]
    async fn test_extract_splits_features() {
        let reply = format!(
            "{}\n---FEATURE_SEPARATOR---\n{}\n---FEATURE_SEPARATOR---\n\n",
            filled_feature("Basic 5G Connectivity Service"),
            filled_feature("Free Antenna Installation")
        );
        let llm = Arc::new(ScriptedLlm::new(vec![reply.as_str()]));
        let filler = TemplateFiller::new(llm.clone(), TemplateSet::default());

        let features = filler.extract(ContextType::Feature, &conversation()).await.unwrap();
        assert_eq!(features.len(), 2);
        assert!(features[1].starts_with("FEATURE NAME: Free Antenna Installation"));
        assert_eq!(llm.timeouts(), vec![EXTRACT_TIMEOUT]);

        let prompt = &llm.prompts()[0];
        assert!(prompt.user.contains("Active Epic:\nEPIC NAME: Rural 5G rollout"));
        assert!(prompt.user.contains("Coach: Feature 1: Basic 5G Connectivity Service"));
    }

    #[test]
    fn test_split_drops_fragments() {
        let story = "STORY TITLE: Book an installer\n".repeat(5);
        let reply = format!("Here you go:\n---STORY_SEPARATOR---\n{}---STORY_SEPARATOR---", story);
        let stories = split_extracted(&reply, "---STORY_SEPARATOR---");
        assert_eq!(stories, vec![story.trim().to_string()]);
    }

    #[tokio::test]
    async fn test_extract_rejects_epics_and_surfaces_model_errors() {
        let filler = TemplateFiller::new(Arc::new(ScriptedLlm::failing()), TemplateSet::default());
        assert!(matches!(
            filler.extract(ContextType::Epic, &conversation()).await,
            Err(Error::NoTemplate(ContextType::Epic))
        ));
        assert!(matches!(
            filler.extract(ContextType::Story, &conversation()).await,
            Err(Error::Template(_))
        ));
    }
}
