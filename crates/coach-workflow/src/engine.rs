//! The workflow graph executor

use coach_ai::SharedLlmClient;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::{self, EnrichedQuery};
use crate::error::{Error, Result};
use crate::events::WorkflowEvent;
use crate::generate::{GenerationPlan, PromptAssets, ResponseGenerator};
use crate::intent::IntentClassifier;
use crate::retrieval::{RetrievalDecision, RetrievalGate, SharedRetriever};
use crate::routing::{self, Route, RetryController};
use crate::state::{ConversationState, FinalResult, Outcome};
use crate::validate::{ValidationReport, Validator};

/// A step in the workflow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Classify,
    BuildContext,
    Retrieve,
    SkipRetrieval,
    Generate,
    Validate,
    IncrementRetry,
    Clarify,
    End,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Classify => "classify",
            Node::BuildContext => "build_context",
            Node::Retrieve => "retrieve",
            Node::SkipRetrieval => "skip_retrieval",
            Node::Generate => "generate",
            Node::Validate => "validate",
            Node::IncrementRetry => "increment_retry",
            Node::Clarify => "clarify",
            Node::End => "end",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Regeneration bound, clamped to 2
    pub max_retries: u32,
    /// Below this confidence a failing response turns into a clarification request
    pub clarification_threshold: f32,
    /// Generation deadline for drafts and summaries
    pub draft_timeout: Duration,
    /// Generation deadline for everything else
    pub default_timeout: Duration,
    pub classification_timeout: Duration,
    pub retrieval_timeout: Duration,
    pub summary_history: usize,
    pub draft_history: usize,
    pub default_history: usize,
    pub min_response_chars: usize,
    pub max_response_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: routing::MAX_RETRIES,
            clarification_threshold: 0.7,
            draft_timeout: Duration::from_secs(240),
            default_timeout: Duration::from_secs(90),
            classification_timeout: Duration::from_secs(30),
            retrieval_timeout: Duration::from_secs(30),
            summary_history: 0,
            draft_history: 12,
            default_history: 10,
            min_response_chars: 50,
            max_response_chars: 5000,
        }
    }
}

/// Per-run scratch data that never outlives [`WorkflowEngine::run`]
struct Run {
    id: Uuid,
    state: ConversationState,
    query: EnrichedQuery,
    report: Option<ValidationReport>,
    outcome: Outcome,
    clarification: Option<String>,
}

/// Runs one conversation turn through classify, context, retrieval,
/// generation and validation, with bounded regeneration.
///
/// The engine holds no per-request state, so one instance can serve
/// concurrent runs behind an `Arc`.
pub struct WorkflowEngine {
    config: EngineConfig,
    llm: SharedLlmClient,
    classifier: IntentClassifier,
    gate: RetrievalGate,
    generator: ResponseGenerator,
    validator: Validator,
    router: RetryController,
    event_tx: broadcast::Sender<WorkflowEvent>,
}

impl WorkflowEngine {
    pub fn new(mut config: EngineConfig, llm: SharedLlmClient, retriever: SharedRetriever) -> Self {
        config.max_retries = config.max_retries.min(routing::MAX_RETRIES);
        let (event_tx, _) = broadcast::channel(256);
        Self {
            classifier: IntentClassifier::new(llm.clone(), config.classification_timeout),
            gate: RetrievalGate::new(retriever, config.retrieval_timeout),
            generator: ResponseGenerator::new(llm.clone(), PromptAssets::default()),
            validator: Validator::new(
                config.min_response_chars,
                config.max_response_chars,
                config.max_retries,
                config.clarification_threshold,
            ),
            router: RetryController::new(config.max_retries),
            llm,
            config,
            event_tx,
        }
    }

    /// Replace the built-in system prompt
    pub fn with_prompt_assets(mut self, assets: PromptAssets) -> Self {
        self.generator = ResponseGenerator::new(self.llm.clone(), assets);
        self
    }

    /// Subscribe to workflow events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the workflow to a terminal node
    pub async fn run(&self, state: ConversationState) -> Result<FinalResult> {
        self.run_with_cancel(state, CancellationToken::new()).await
    }

    /// Run the workflow; cancelling `cancel` aborts whichever call is in flight
    pub async fn run_with_cancel(
        &self,
        state: ConversationState,
        cancel: CancellationToken,
    ) -> Result<FinalResult> {
        let started = Instant::now();
        let mut run = Run {
            id: Uuid::new_v4(),
            state,
            query: EnrichedQuery::default(),
            report: None,
            outcome: Outcome::Completed,
            clarification: None,
        };
        tracing::info!(
            "Workflow {} started ({}, {} prior messages)",
            run.id,
            run.state.context_type,
            run.state.messages.len()
        );
        let _ = self.event_tx.send(WorkflowEvent::RunStart {
            run_id: run.id,
            context_type: run.state.context_type,
        });

        let mut node = Node::Classify;
        while node != Node::End {
            node = self.instrumented(node, &mut run, &cancel).await?;
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Workflow {} finished: {:?}, intent {}, {} retries in {}ms",
            run.id,
            run.outcome,
            run.state.intent,
            run.state.retry_count,
            elapsed_ms
        );
        let _ = self.event_tx.send(WorkflowEvent::RunEnd {
            run_id: run.id,
            outcome: run.outcome,
            intent: run.state.intent,
            retry_count: run.state.retry_count,
            elapsed_ms,
        });

        let response = match run.clarification.take() {
            Some(request) => request,
            None => std::mem::take(&mut run.state.generated_response),
        };
        Ok(FinalResult::from_state(run.state, run.outcome, response))
    }

    /// Timing, events and cancellation around every node
    async fn instrumented(&self, node: Node, run: &mut Run, cancel: &CancellationToken) -> Result<Node> {
        let run_id = run.id;
        let started = Instant::now();
        let _ = self.event_tx.send(WorkflowEvent::NodeStart { run_id, node });
        tracing::debug!("[{}] {} start", run_id, node);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled { node }),
            result = self.dispatch(node, run) => result,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(next) => {
                tracing::debug!("[{}] {} done in {}ms -> {}", run_id, node, elapsed_ms, next);
                let _ = self.event_tx.send(WorkflowEvent::NodeEnd {
                    run_id,
                    node,
                    elapsed_ms,
                });
            }
            Err(e) => {
                tracing::error!("[{}] {} failed after {}ms: {}", run_id, node, elapsed_ms, e);
                let _ = self.event_tx.send(WorkflowEvent::Error {
                    run_id,
                    node,
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Execute one node and pick the next
    async fn dispatch(&self, node: Node, run: &mut Run) -> Result<Node> {
        let state = &mut run.state;
        match node {
            Node::Classify => {
                let classification = self
                    .classifier
                    .classify(&state.user_message, state.context_type)
                    .await;
                state.intent = classification.intent;
                state.confidence = classification.confidence;
                tracing::info!(
                    "Intent: {} (confidence {:.2}, {:?})",
                    state.intent,
                    state.confidence,
                    classification.source
                );
                Ok(Node::BuildContext)
            }
            Node::BuildContext => {
                run.query = context::build(state);
                Ok(match self.gate.decide(state) {
                    RetrievalDecision::Retrieve => Node::Retrieve,
                    RetrievalDecision::Skip => Node::SkipRetrieval,
                })
            }
            Node::Retrieve => {
                state.retrieved_docs = self
                    .gate
                    .retrieve(&run.query.retrieval_text, state.context_type)
                    .await;
                Ok(Node::Generate)
            }
            Node::SkipRetrieval => {
                state.retrieved_docs.clear();
                Ok(Node::Generate)
            }
            Node::Generate => {
                let plan = GenerationPlan::for_state(state, &self.config);
                state.generated_response = self
                    .generator
                    .generate(state, &run.query, &plan, run.report.as_ref())
                    .await
                    .map_err(|e| Error::from_llm(Node::Generate, e))?;
                Ok(Node::Validate)
            }
            Node::Validate => {
                run.report = Some(self.validator.validate(state));
                Ok(match self.router.route(state) {
                    Route::Retry => Node::IncrementRetry,
                    Route::Clarify => Node::Clarify,
                    Route::End => Node::End,
                })
            }
            Node::IncrementRetry => {
                let attempt = self.router.increment(state);
                tracing::info!("Retrying generation (attempt {}/{})", attempt, self.router.max_retries());
                let _ = self.event_tx.send(WorkflowEvent::RetryScheduled {
                    run_id: run.id,
                    attempt,
                    issues: state.validation_issues.iter().copied().collect(),
                });
                Ok(Node::Generate)
            }
            Node::Clarify => {
                run.outcome = Outcome::Clarify;
                run.clarification = Some(routing::clarification_request(state));
                Ok(Node::End)
            }
            Node::End => Ok(Node::End),
        }
    }
}
