//! Workflow event types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::Node;
use crate::state::{ContextType, Intent, Outcome};
use crate::validate::ValidationIssue;

/// Events emitted while a run moves through the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A run started
    RunStart {
        run_id: Uuid,
        context_type: ContextType,
    },

    /// A node started executing
    NodeStart { run_id: Uuid, node: Node },

    /// A node finished
    NodeEnd {
        run_id: Uuid,
        node: Node,
        elapsed_ms: u64,
    },

    /// Validation failed and the response will be regenerated
    RetryScheduled {
        run_id: Uuid,
        attempt: u32,
        issues: Vec<ValidationIssue>,
    },

    /// A run reached a terminal node
    RunEnd {
        run_id: Uuid,
        outcome: Outcome,
        intent: Intent,
        retry_count: u32,
        elapsed_ms: u64,
    },

    /// A run stopped with an error
    Error {
        run_id: Uuid,
        node: Node,
        message: String,
    },
}

impl WorkflowEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowEvent::RunEnd { .. } | WorkflowEvent::Error { .. })
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowEvent::RunStart { run_id, .. }
            | WorkflowEvent::NodeStart { run_id, .. }
            | WorkflowEvent::NodeEnd { run_id, .. }
            | WorkflowEvent::RetryScheduled { run_id, .. }
            | WorkflowEvent::RunEnd { run_id, .. }
            | WorkflowEvent::Error { run_id, .. } => *run_id,
        }
    }
}
