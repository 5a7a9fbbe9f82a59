//! Slash commands for interactive mode

use coach_workflow::{ContextType, ConversationState};
use std::path::Path;

/// Artifacts loaded by the user, owned by the CLI session and copied into each run
#[derive(Debug, Clone, Default)]
pub struct ActiveArtifacts {
    pub strategic_initiative: Option<String>,
    pub epic: Option<String>,
    pub feature: Option<String>,
    pub pi_objective: Option<String>,
}

impl ActiveArtifacts {
    fn slot(&mut self, context_type: ContextType) -> Option<&mut Option<String>> {
        match context_type {
            ContextType::StrategicInitiative => Some(&mut self.strategic_initiative),
            ContextType::Epic => Some(&mut self.epic),
            ContextType::Feature => Some(&mut self.feature),
            ContextType::PiObjective => Some(&mut self.pi_objective),
            ContextType::Story => None,
        }
    }

    /// Store content for an artifact kind; stories have no slot
    pub fn set(&mut self, context_type: ContextType, content: String) -> Result<(), String> {
        match self.slot(context_type) {
            Some(slot) => {
                *slot = Some(content);
                Ok(())
            }
            None => Err(format!("{} artifacts cannot be loaded", context_type.label())),
        }
    }

    /// Read a file into the slot for `context_type`
    pub fn load_file(&mut self, context_type: ContextType, path: &Path) -> Result<(), String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        self.set(context_type, content)
    }

    pub fn clear(&mut self, context_type: ContextType) {
        if let Some(slot) = self.slot(context_type) {
            *slot = None;
        }
    }

    /// Loaded kinds with their sizes
    pub fn summary(&self) -> Vec<(ContextType, usize)> {
        [
            (ContextType::StrategicInitiative, &self.strategic_initiative),
            (ContextType::Epic, &self.epic),
            (ContextType::Feature, &self.feature),
            (ContextType::PiObjective, &self.pi_objective),
        ]
        .into_iter()
        .filter_map(|(ct, slot)| slot.as_ref().map(|s| (ct, s.chars().count())))
        .collect()
    }

    /// Copy the loaded artifacts into a fresh run state
    pub fn apply(&self, mut state: ConversationState) -> ConversationState {
        state.active_strategic_initiative = self.strategic_initiative.clone();
        state.active_epic = self.epic.clone();
        state.active_feature = self.feature.clone();
        state.active_pi_objective = self.pi_objective.clone();
        state
    }
}

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Forget the conversation history
    Clear,
    /// Switch the active context type
    ChangeContext(ContextType),
    /// Load an artifact file into a slot
    Load(ContextType, String),
    /// Empty a slot
    Unload(ContextType),
    /// Show loaded artifacts and context
    Status,
    /// Fill a template from the conversation (`None`: the current context type)
    Fill(Option<ContextType>),
    /// Turn every proposed Feature or Story into its own filled template
    Extract(ContextType),
    /// Show a message to the user (not sent to the coach)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command; `None` for ordinary messages
pub fn parse_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "clear" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        "status" | "s" => CommandResult::Status,

        "context" | "ctx" => match args.parse::<ContextType>() {
            Ok(ct) => CommandResult::ChangeContext(ct),
            Err(e) => CommandResult::Message(format!("{}\nValid types: {}", e, valid_types())),
        },

        "load" | "l" => {
            let mut load_args = args.splitn(2, ' ');
            let kind = load_args.next().unwrap_or("");
            let path = load_args.next().map(str::trim).unwrap_or("");
            match (kind.parse::<ContextType>(), path.is_empty()) {
                (Ok(ct), false) => CommandResult::Load(ct, path.to_string()),
                (Ok(_), true) => CommandResult::Message("Usage: /load <type> <file>".to_string()),
                (Err(e), _) => CommandResult::Message(e.to_string()),
            }
        }

        "fill" | "f" if args.is_empty() => CommandResult::Fill(None),
        "fill" | "f" => match args.parse::<ContextType>() {
            Ok(ct) => CommandResult::Fill(Some(ct)),
            Err(e) => CommandResult::Message(e.to_string()),
        },

        "extract" | "x" => match parse_extract_kind(args) {
            Some(ct) => CommandResult::Extract(ct),
            None => CommandResult::Message("Usage: /extract features|stories".to_string()),
        },

        "unload" | "u" => match args.parse::<ContextType>() {
            Ok(ct) => CommandResult::Unload(ct),
            Err(e) => CommandResult::Message(e.to_string()),
        },

        _ => CommandResult::Unknown(command),
    })
}

/// `features` or `stories` (singular accepted) to the kind being extracted
pub fn parse_extract_kind(arg: &str) -> Option<ContextType> {
    match arg.trim().to_lowercase().as_str() {
        "feature" | "features" => Some(ContextType::Feature),
        "story" | "stories" | "user-stories" => Some(ContextType::Story),
        _ => None,
    }
}

fn valid_types() -> String {
    ContextType::ALL
        .iter()
        .map(|ct| ct.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn help_message() -> String {
    format!(
        r#"Available commands:
  /help, /h, /?            Show this help message
  /context, /ctx <type>    Switch what you are working on
  /load, /l <type> <file>  Load an artifact file as active context
  /unload, /u <type>       Remove an active artifact
  /status, /s              Show context type and loaded artifacts
  /fill, /f [type]         Fill the epic, feature or story template from the conversation
  /extract, /x <kind>      Fill one template per proposed feature or story (features|stories)
  /clear, /c               Clear conversation history
  /quit, /exit, /q         Exit

Types: {}"#,
        valid_types()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert!(parse_command("Draft an epic").is_none());
    }

    #[test]
    fn test_context_switch() {
        assert_eq!(
            parse_command("/context pi-objective"),
            Some(CommandResult::ChangeContext(ContextType::PiObjective))
        );
        match parse_command("/ctx portfolio") {
            Some(CommandResult::Message(msg)) => assert!(msg.contains("unknown context type")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_load_arguments() {
        assert_eq!(
            parse_command("/load epic ./drafts/onboarding epic.md"),
            Some(CommandResult::Load(
                ContextType::Epic,
                "./drafts/onboarding epic.md".to_string()
            ))
        );
        assert!(matches!(
            parse_command("/load epic"),
            Some(CommandResult::Message(_))
        ));
        assert_eq!(parse_command("/QUIT"), Some(CommandResult::Exit));
        assert_eq!(
            parse_command("/frobnicate"),
            Some(CommandResult::Unknown("frobnicate".to_string()))
        );
    }

    #[test]
    fn test_template_commands() {
        assert_eq!(parse_command("/fill"), Some(CommandResult::Fill(None)));
        assert_eq!(
            parse_command("/fill story"),
            Some(CommandResult::Fill(Some(ContextType::Story)))
        );
        assert_eq!(
            parse_command("/extract features"),
            Some(CommandResult::Extract(ContextType::Feature))
        );
        assert_eq!(
            parse_command("/x Stories"),
            Some(CommandResult::Extract(ContextType::Story))
        );
        assert!(matches!(
            parse_command("/extract epics"),
            Some(CommandResult::Message(_))
        ));
    }

    #[test]
    fn test_artifacts_flow_into_state() {
        let mut artifacts = ActiveArtifacts::default();
        artifacts
            .set(ContextType::Epic, "EPIC NAME: Onboarding".into())
            .unwrap();
        assert!(artifacts.set(ContextType::Story, "As a user".into()).is_err());

        let state = artifacts.apply(ConversationState::new("Summarize", ContextType::Epic));
        assert_eq!(state.active_epic.as_deref(), Some("EPIC NAME: Onboarding"));
        assert_eq!(artifacts.summary(), vec![(ContextType::Epic, 21)]);

        artifacts.clear(ContextType::Epic);
        assert!(artifacts.summary().is_empty());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feature.md");
        std::fs::write(&path, "FEATURE NAME: Export").unwrap();

        let mut artifacts = ActiveArtifacts::default();
        artifacts.load_file(ContextType::Feature, &path).unwrap();
        assert_eq!(artifacts.feature.as_deref(), Some("FEATURE NAME: Export"));
        assert!(artifacts
            .load_file(ContextType::Feature, &dir.path().join("missing.md"))
            .is_err());
    }
}
