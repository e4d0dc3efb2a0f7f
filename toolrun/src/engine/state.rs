//! Engine phases and the per-turn run state.

use crate::errors::EngineError;
use crate::service::{RequiredToolCall, ToolCallOutput};
use serde::{Deserialize, Serialize};

/// Where a run engine is in its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    /// No run yet for this turn.
    #[default]
    Created,
    /// Thread exists, message posted, run created.
    RunCreated,
    /// Waiting on the remote run.
    Polling,
    /// Dispatching a tool-call batch.
    RequiresAction,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled, locally or upstream.
    Cancelled,
}

impl EnginePhase {
    /// Returns true for phases that end a turn.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the engine may move from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use EnginePhase::{Cancelled, Completed, Created, Failed, Polling, RequiresAction, RunCreated};

        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Created, RunCreated | Cancelled)
                | (RunCreated, Polling | Cancelled)
                | (
                    Polling,
                    Polling | RequiresAction | Completed | Cancelled | RunCreated
                )
                | (RequiresAction, Polling | Cancelled)
        )
    }

    /// Snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::RunCreated => "run_created",
            Self::Polling => "polling",
            Self::RequiresAction => "requires_action",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for EnginePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state of one engine.
///
/// The thread survives across turns; everything else is reset when a new
/// turn begins, except a pending cancellation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Conversation thread, reused across turns.
    pub thread_id: Option<String>,
    /// Remote run of the current turn.
    pub run_id: Option<String>,
    /// Current phase.
    pub phase: EnginePhase,
    /// Calls of the batch being dispatched.
    pub pending_tool_calls: Vec<RequiredToolCall>,
    /// Outputs collected for that batch.
    pub collected_outputs: Vec<ToolCallOutput>,
    /// A cancel arrived before a run existed.
    pub cancel_requested: bool,
    /// The service accepted a cancel for the current run.
    #[serde(default)]
    pub cancel_issued: bool,
    /// Latest assistant reply, failure detail or cancel notice.
    pub latest_message: Option<String>,
    /// Requires-action round trips in this turn.
    pub action_rounds: u32,
}

impl RunState {
    /// Creates an idle state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets per-turn fields for a new submission.
    pub fn begin_turn(&mut self) {
        self.run_id = None;
        self.phase = EnginePhase::Created;
        self.pending_tool_calls.clear();
        self.collected_outputs.clear();
        self.latest_message = None;
        self.action_rounds = 0;
        self.cancel_issued = false;
    }

    /// Moves to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: EnginePhase) -> Result<(), EngineError> {
        if !self.phase.can_transition_to(next) {
            return Err(EngineError::InvalidState(format!(
                "cannot move from {} to {next}",
                self.phase
            )));
        }
        self.phase = next;
        Ok(())
    }

    /// Returns true once both a thread and a run exist.
    #[must_use]
    pub fn has_active_run(&self) -> bool {
        self.thread_id.is_some() && self.run_id.is_some() && !self.phase.is_terminal()
    }
}
