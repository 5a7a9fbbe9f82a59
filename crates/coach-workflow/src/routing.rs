//! Post-validation routing and the bounded retry counter

use crate::state::{ContextType, ConversationState};

/// Hard ceiling on regeneration attempts
pub const MAX_RETRIES: u32 = 2;

/// Where a run goes after validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Regenerate with the same retrieved context
    Retry,
    /// Stop and ask the user for more input
    Clarify,
    /// Return the current response
    End,
}

/// Decides retry, clarify or end, and owns the retry counter
#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    max_retries: u32,
}

impl RetryController {
    /// `max_retries` is clamped to [`MAX_RETRIES`]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.min(MAX_RETRIES),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Route on the flags the validator set. Retrying past the bound is never
    /// possible, whatever the flags say.
    pub fn route(&self, state: &ConversationState) -> Route {
        if state.needs_retry && state.retry_count < self.max_retries {
            Route::Retry
        } else if state.needs_clarification {
            Route::Clarify
        } else {
            Route::End
        }
    }

    /// Bump the retry counter, returning the new attempt number
    pub fn increment(&self, state: &mut ConversationState) -> u32 {
        state.retry_count = (state.retry_count + 1).min(self.max_retries);
        state.needs_retry = false;
        state.retry_count
    }
}

/// The fixed reply sent back when the engine needs more input
pub fn clarification_request(state: &ConversationState) -> String {
    let focus = match state.context_type {
        ContextType::StrategicInitiative => {
            "which business outcome or customer segment this Strategic Initiative should address"
        }
        ContextType::Epic => "which Epic you mean and what problem or hypothesis it should capture",
        ContextType::Feature => "which Feature you mean and who benefits from it",
        ContextType::Story => "which user and behaviour the Story is about",
        ContextType::PiObjective => "which team and Program Increment the objective belongs to",
    };
    format!(
        "I'm not sure I understood what you need. Could you tell me more about {}? \
         It also helps to say whether you want me to draft, review, outline or explain it.",
        focus
    )
}
