//! discovery-coach - SAFe discovery coaching CLI

mod commands;
mod config;
mod knowledge;
mod metrics;
mod session;

use anyhow::{Context, anyhow};
use clap::Parser;
use coach_ai::providers::OpenAICompatClient;
use coach_ai::{ChatMessage, ModelConfig, Provider, SharedLlmClient};
use coach_workflow::{
    ContextType, ConversationState, EngineConfig, Error, FinalResult, Outcome, PromptAssets,
    TemplateFiller, TemplateSet, WorkflowEngine, WorkflowEvent,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use commands::{ActiveArtifacts, CommandResult};
use metrics::{MetricsLog, RunRecord, Stats};
use session::SessionManager;

/// discovery-coach - SAFe discovery coaching assistant
#[derive(Parser, Debug)]
#[command(name = "discovery-coach")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Ask a single question and exit (otherwise interactive)
    #[arg(short, long)]
    message: Option<String>,

    /// What you are working on (strategic-initiative, epic, feature, story, pi-objective).
    /// Defaults to the resumed session's type, otherwise epic
    #[arg(short = 't', long)]
    context_type: Option<String>,

    /// Load an active Epic from a file
    #[arg(long)]
    epic_file: Option<PathBuf>,

    /// Load an active Feature from a file
    #[arg(long)]
    feature_file: Option<PathBuf>,

    /// Load an active Strategic Initiative from a file
    #[arg(long)]
    initiative_file: Option<PathBuf>,

    /// Load active PI Objectives from a file
    #[arg(long)]
    pi_objective_file: Option<PathBuf>,

    /// Provider (openai, ollama, custom)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model to use (default: gpt-4o-mini, or llama3.2 for ollama)
    #[arg(long)]
    model: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Knowledge-base directory (.md / .txt files)
    #[arg(long)]
    knowledge_dir: Option<PathBuf>,

    /// Resume a previous session by ID
    #[arg(long)]
    session: Option<String>,

    /// List saved sessions
    #[arg(long)]
    sessions: bool,

    /// Delete saved sessions by ID
    #[arg(long, value_name = "ID", num_args = 1..)]
    delete_session: Vec<String>,

    /// Fill the epic, feature or story template from the resumed session, then exit
    #[arg(long, value_name = "TYPE", requires = "session")]
    fill: Option<String>,

    /// Fill one template per feature or story proposed in the resumed session, then exit
    #[arg(long, value_name = "features|stories", requires = "session")]
    extract: Option<String>,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,

    /// List models served by the provider
    #[arg(long)]
    list_models: bool,

    /// Show aggregate run metrics
    #[arg(long)]
    stats: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("discovery_coach=debug,coach_workflow=debug,coach_ai=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn default_model(provider: Provider) -> &'static str {
    match provider {
        Provider::Ollama => "llama3.2",
        Provider::OpenAI | Provider::Custom => "gpt-4o-mini",
    }
}

fn build_client(
    cfg: &config::Config,
    provider: Provider,
    model_id: &str,
    temperature: f32,
) -> anyhow::Result<OpenAICompatClient> {
    let client = match provider {
        Provider::OpenAI => {
            let api_key = cfg.openai_api_key().ok_or_else(|| {
                anyhow!(
                    "No OpenAI API key found.\nSet it with: export OPENAI_API_KEY=your-key\n\
                     Or add it to the config file: discovery-coach --init-config"
                )
            })?;
            let mut model = ModelConfig::new(Provider::OpenAI, model_id);
            if let Some(ref base_url) = cfg.base_url {
                model = model.with_base_url(base_url);
            }
            OpenAICompatClient::new(model, Some(api_key))
        }
        Provider::Ollama => OpenAICompatClient::ollama(cfg.ollama_base_url(), model_id),
        Provider::Custom => {
            let base_url = cfg
                .base_url
                .as_deref()
                .ok_or_else(|| anyhow!("The custom provider needs base_url in the config file"))?;
            OpenAICompatClient::new(
                ModelConfig::new(Provider::Custom, model_id).with_base_url(base_url),
                cfg.openai_api_key(),
            )
        }
    };
    Ok(client.with_temperature(temperature))
}

/// `-t` wins, then the resumed session's recorded type, then epic
fn resolve_context_type(flag: Option<&str>, resumed: Option<&str>) -> anyhow::Result<ContextType> {
    if let Some(flag) = flag {
        return Ok(flag.parse()?);
    }
    match resumed.filter(|ct| !ct.is_empty()).map(str::parse::<ContextType>) {
        Some(Ok(ct)) => Ok(ct),
        Some(Err(e)) => {
            tracing::warn!("Ignoring the session's context type: {}", e);
            Ok(ContextType::Epic)
        }
        None => Ok(ContextType::Epic),
    }
}

/// Built-in templates, replaced by any template files in the knowledge directory
fn load_templates(dir: &Path) -> anyhow::Result<TemplateSet> {
    let mut templates = TemplateSet::default();
    for kind in [ContextType::Epic, ContextType::Feature, ContextType::Story] {
        let Some(name) = TemplateSet::file_name(kind) else {
            continue;
        };
        let path = dir.join(name);
        if let Ok(content) = std::fs::read_to_string(&path) {
            tracing::debug!("Using {} template from {}", kind, path.display());
            templates = templates.with_template(kind, content)?;
        }
    }
    Ok(templates)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    if args.sessions {
        return list_sessions();
    }

    if !args.delete_session.is_empty() {
        return delete_sessions(&args.delete_session);
    }

    let cfg = config::Config::load();

    if args.stats {
        return show_stats(&cfg);
    }

    // CLI args take precedence over the config file
    let provider: Provider = args
        .provider
        .as_deref()
        .or(cfg.provider.as_deref())
        .unwrap_or("openai")
        .parse()?;
    let model_id = args
        .model
        .clone()
        .or(cfg.model.clone())
        .unwrap_or_else(|| default_model(provider).to_string());
    let temperature = args.temperature.or(cfg.temperature).unwrap_or(0.7);

    let client = build_client(&cfg, provider, &model_id, temperature)?;

    if args.list_models {
        let models = client.list_models().await?;
        println!("{} models:", provider);
        for id in models {
            let marker = if id == model_id { " *" } else { "" };
            println!("  {}{}", id, marker);
        }
        return Ok(());
    }

    let resumed = match args.session {
        Some(ref id) => match SessionManager::load(id) {
            Ok((session, messages)) => {
                eprintln!("Resuming session {} ({} messages)", id, messages.len());
                Some((session, messages))
            }
            Err(e) => {
                eprintln!("Error loading session: {}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };
    let context_type = resolve_context_type(
        args.context_type.as_deref(),
        resumed.as_ref().map(|(session, _)| session.context_type()),
    )?;

    let mut artifacts = ActiveArtifacts::default();
    for (ct, file) in [
        (ContextType::Epic, &args.epic_file),
        (ContextType::Feature, &args.feature_file),
        (ContextType::StrategicInitiative, &args.initiative_file),
        (ContextType::PiObjective, &args.pi_objective_file),
    ] {
        if let Some(path) = file {
            artifacts.load_file(ct, path).map_err(|e| anyhow!(e))?;
        }
    }

    let knowledge_dir = args.knowledge_dir.clone().unwrap_or_else(|| cfg.knowledge_dir());
    let knowledge = knowledge::KnowledgeBase::load(&knowledge_dir)
        .with_context(|| format!("Failed to load knowledge base from {}", knowledge_dir.display()))?;

    let llm: SharedLlmClient = Arc::new(client);
    let mut engine = WorkflowEngine::new(EngineConfig::default(), llm.clone(), Arc::new(knowledge));
    if let Some(prompt) = cfg.system_prompt() {
        engine = engine.with_prompt_assets(PromptAssets::new(prompt));
    }
    let filler = TemplateFiller::new(llm, load_templates(&knowledge_dir)?);

    let (session, history) = match resumed {
        Some((session, messages)) => (Some(session), messages),
        None if args.message.is_none() => {
            let session = SessionManager::new(&model_id, context_type.as_str())
                .map_err(|e| tracing::warn!("Session will not be saved: {}", e))
                .ok();
            (session, Vec::new())
        }
        None => (None, Vec::new()),
    };

    let mut coach = Coach {
        engine,
        filler,
        context_type,
        artifacts,
        history,
        session,
        metrics: MetricsLog::new(cfg.metrics_path()),
        model: model_id,
        provider,
        json: args.json,
    };

    if let Some(ref kind) = args.fill {
        let kind: ContextType = kind.parse()?;
        if !coach.fill_template(Some(kind)).await {
            std::process::exit(1);
        }
        return Ok(());
    }

    if let Some(ref kind) = args.extract {
        let kind = commands::parse_extract_kind(kind)
            .ok_or_else(|| anyhow!("--extract takes features or stories"))?;
        if !coach.extract_templates(kind).await {
            std::process::exit(1);
        }
        return Ok(());
    }

    if let Some(message) = args.message {
        let ok = coach.turn(&message).await;
        if !ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    coach.run_interactive().await
}

/// One CLI conversation: the engine plus everything the caller owns
struct Coach {
    engine: WorkflowEngine,
    filler: TemplateFiller,
    context_type: ContextType,
    artifacts: ActiveArtifacts,
    history: Vec<ChatMessage>,
    session: Option<SessionManager>,
    metrics: MetricsLog,
    model: String,
    provider: Provider,
    json: bool,
}

impl Coach {
    /// Run one message through the workflow and print the result
    async fn turn(&mut self, message: &str) -> bool {
        let state = self.artifacts.apply(
            ConversationState::new(message, self.context_type).with_history(self.history.clone()),
        );

        let cancel = CancellationToken::new();
        let progress = (!self.json).then(|| spawn_progress(self.engine.subscribe()));

        let started = Instant::now();
        let outcome = {
            let run = self.engine.run_with_cancel(state, cancel.clone());
            tokio::pin!(run);
            // Ctrl-C is only watched while the run is in flight, so the prompt keeps its own handling.
            tokio::select! {
                outcome = &mut run => outcome,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    run.await
                }
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        if let Some(handle) = progress {
            handle.abort();
        }

        let record = RunRecord::new(
            self.context_type.as_str(),
            &self.model,
            self.provider.name(),
            latency_ms,
        );
        let (record, ok) = match outcome {
            Ok(result) => {
                self.print_result(&result);
                self.remember(message, &result.response);
                (record.with_result(&result), true)
            }
            Err(e) => {
                tracing::debug!("Workflow failed: {:?}", e);
                match e {
                    Error::Cancelled { .. } => eprintln!("Cancelled."),
                    Error::Timeout { .. } => {
                        eprintln!("Sorry, the coach took too long to answer. Please try again.")
                    }
                    _ => eprintln!("Sorry, something went wrong while generating a response. Please try again."),
                }
                (record.with_error(&e), false)
            }
        };

        if let Err(e) = self.metrics.append(&record) {
            tracing::warn!("Failed to write metrics to {}: {}", self.metrics.path().display(), e);
        }
        ok
    }

    fn print_result(&self, result: &FinalResult) {
        if self.json {
            match serde_json::to_string_pretty(result) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Error: {}", e),
            }
            return;
        }

        println!("{}", result.response);
        if result.outcome == Outcome::Clarify {
            return;
        }
        if result.has_warnings() {
            eprintln!(
                "\nWarning: quality checks did not fully pass ({})",
                result.issue_codes().join(", ")
            );
        }
    }

    /// Record the exchange in memory and in the session file
    fn remember(&mut self, message: &str, response: &str) {
        let exchange = [ChatMessage::user(message), ChatMessage::assistant(response)];
        if let Some(ref mut session) = self.session {
            for msg in &exchange {
                if let Err(e) = session.append_message(msg) {
                    tracing::warn!("Failed to save session: {}", e);
                }
            }
        }
        self.history.extend(exchange);
    }

    /// The conversation so far plus loaded artifacts, as template input
    fn template_state(&self) -> Option<ConversationState> {
        if self.history.is_empty() {
            eprintln!("Nothing to fill in yet: the conversation is empty.");
            return None;
        }
        Some(self.artifacts.apply(
            ConversationState::new("", self.context_type).with_history(self.history.clone()),
        ))
    }

    async fn fill_template(&self, kind: Option<ContextType>) -> bool {
        let kind = kind.unwrap_or(self.context_type);
        let Some(state) = self.template_state() else {
            return false;
        };

        eprintln!("Filling the {} template...", kind.label());
        let result = tokio::select! {
            result = self.filler.fill(kind, &state) => result,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelled.");
                return false;
            }
        };
        match result {
            Ok(filled) => {
                println!("{}", filled);
                true
            }
            Err(e) => {
                report_template_error(&e);
                false
            }
        }
    }

    async fn extract_templates(&self, kind: ContextType) -> bool {
        let Some(state) = self.template_state() else {
            return false;
        };

        eprintln!("Extracting {} proposals...", kind.label());
        let result = tokio::select! {
            result = self.filler.extract(kind, &state) => result,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelled.");
                return false;
            }
        };
        match result {
            Ok(items) if items.is_empty() => {
                println!("No {} proposals found in the conversation.", kind.label());
                true
            }
            Ok(items) => {
                let total = items.len();
                for (i, item) in items.iter().enumerate() {
                    println!("=== {} {} of {} ===\n{}\n", kind.label(), i + 1, total, item);
                }
                true
            }
            Err(e) => {
                report_template_error(&e);
                false
            }
        }
    }

    async fn run_interactive(&mut self) -> anyhow::Result<()> {
        if std::io::IsTerminal::is_terminal(&io::stderr()) {
            match self.session {
                Some(ref s) => eprintln!("discovery-coach ({}) session: {}", self.model, &s.id()[..8]),
                None => eprintln!("discovery-coach ({})", self.model),
            }
            eprintln!("Type /help for commands.\n");
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("{}> ", self.context_type);
            io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    // The pending stdin read cannot be cancelled, so leave without waiting for it.
                    println!();
                    std::process::exit(130);
                }
            };
            let Some(input) = line else {
                break;
            };
            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            if let Some(command) = commands::parse_command(input) {
                match command {
                    CommandResult::Exit => break,
                    CommandResult::Clear => {
                        self.history.clear();
                        println!("Cleared conversation.");
                    }
                    CommandResult::ChangeContext(ct) => {
                        self.context_type = ct;
                        println!("Now working on: {}", ct.label());
                    }
                    CommandResult::Load(ct, path) => {
                        match self.artifacts.load_file(ct, path.as_ref()) {
                            Ok(()) => println!("Loaded active {} from {}", ct.label(), path),
                            Err(e) => println!("{}", e),
                        }
                    }
                    CommandResult::Unload(ct) => {
                        self.artifacts.clear(ct);
                        println!("Removed active {}", ct.label());
                    }
                    CommandResult::Status => self.print_status(),
                    CommandResult::Fill(kind) => {
                        self.fill_template(kind).await;
                    }
                    CommandResult::Extract(kind) => {
                        self.extract_templates(kind).await;
                    }
                    CommandResult::Message(msg) => println!("{}", msg),
                    CommandResult::Unknown(cmd) => {
                        println!("Unknown command: /{}", cmd);
                        println!("Type /help for available commands.");
                    }
                }
                println!();
                continue;
            }

            println!();
            self.turn(input).await;
            println!();
        }

        Ok(())
    }

    fn print_status(&self) {
        println!("Context: {}", self.context_type.label());
        println!("History: {} messages", self.history.len());
        let loaded = self.artifacts.summary();
        if loaded.is_empty() {
            println!("No active artifacts.");
        }
        for (ct, chars) in loaded {
            println!("Active {}: {} chars", ct.label(), chars);
        }
    }
}

/// Show revision progress on stderr while a run is in flight
fn spawn_progress(
    mut receiver: tokio::sync::broadcast::Receiver<WorkflowEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(WorkflowEvent::RetryScheduled { attempt, issues, .. }) => {
                    let codes: Vec<&str> = issues.iter().map(|i| i.as_str()).collect();
                    eprintln!("[Revising response, attempt {} ({})]", attempt, codes.join(", "));
                }
                Ok(event) if event.is_terminal() => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn report_template_error(error: &Error) {
    tracing::debug!("Template request failed: {:?}", error);
    match error {
        Error::NoTemplate(_) => eprintln!("{}. Templates exist for epic, feature and story.", error),
        e if e.is_timeout() => eprintln!("Sorry, filling the template took too long. Please try again."),
        _ => eprintln!("Sorry, something went wrong while filling the template. Please try again."),
    }
}

fn delete_sessions(ids: &[String]) -> anyhow::Result<()> {
    let mut deleted = 0;
    for id in ids {
        match SessionManager::delete(id) {
            Ok(()) => {
                println!("Deleted session {}", id);
                deleted += 1;
            }
            Err(e) => eprintln!("{}: {}", id, e),
        }
    }
    if deleted == 0 {
        return Err(anyhow!("No sessions were deleted"));
    }
    if deleted < ids.len() {
        println!("Deleted {} of {} sessions", deleted, ids.len());
    }
    Ok(())
}

fn list_sessions() -> anyhow::Result<()> {
    match SessionManager::list_sessions() {
        Ok(sessions) => {
            if sessions.is_empty() {
                println!("No saved sessions found.");
                println!(
                    "Sessions are stored in: {}",
                    SessionManager::sessions_dir().display()
                );
            } else {
                println!("Saved sessions:\n");
                println!("{:<38} {:<18} {:<22} {:<6} Model", "ID", "Created", "Context", "Msgs");
                println!("{}", "-".repeat(100));
                for s in sessions {
                    println!(
                        "{:<38} {:<18} {:<22} {:<6} {}",
                        s.id,
                        s.created_at_display(),
                        s.context_type,
                        s.message_count,
                        s.model
                    );
                }
                println!("\nResume with: discovery-coach --session <session-id>");
            }
        }
        Err(e) => {
            eprintln!("Error listing sessions: {}", e);
        }
    }
    Ok(())
}

fn show_stats(cfg: &config::Config) -> anyhow::Result<()> {
    let log = MetricsLog::new(cfg.metrics_path());
    let records = log
        .read_all()
        .with_context(|| format!("Failed to read metrics from {}", log.path().display()))?;
    if records.is_empty() {
        println!("No runs recorded yet ({}).", log.path().display());
        return Ok(());
    }
    print!("{}", Stats::from_records(&records));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_type_flag_wins() {
        let ct = resolve_context_type(Some("feature"), Some("epic")).unwrap();
        assert_eq!(ct, ContextType::Feature);
        assert!(resolve_context_type(Some("portfolio"), None).is_err());
    }

    #[test]
    fn test_resumed_session_keeps_its_context_type() {
        assert_eq!(
            resolve_context_type(None, Some("pi-objective")).unwrap(),
            ContextType::PiObjective
        );
        assert_eq!(resolve_context_type(None, Some("")).unwrap(), ContextType::Epic);
        assert_eq!(resolve_context_type(None, Some("garbage")).unwrap(), ContextType::Epic);
        assert_eq!(resolve_context_type(None, None).unwrap(), ContextType::Epic);
    }

    #[test]
    fn test_template_files_override_builtins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("feature_template.txt"), "FEATURE NAME: [Fill in here]").unwrap();

        let templates = load_templates(dir.path()).unwrap();
        assert_eq!(
            templates.get(ContextType::Feature).unwrap(),
            "FEATURE NAME: [Fill in here]"
        );
        assert!(templates.get(ContextType::Epic).unwrap().contains("EPIC HYPOTHESIS STATEMENT"));
    }
}
