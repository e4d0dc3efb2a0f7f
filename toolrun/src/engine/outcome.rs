//! The result of one submitted turn.

use super::{EnginePhase, RunState};
use serde::{Deserialize, Serialize};

/// What [`RunEngine::submit`](super::RunEngine::submit) reports.
///
/// Never absent: an unhandled error inside the turn becomes a failed outcome
/// carrying the error text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// True only if the run completed.
    pub success: bool,
    /// Phase the turn ended in.
    pub status: EnginePhase,
    /// Latest assistant reply, failure detail or cancel notice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Error message if the turn did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Thread the turn ran on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Remote run id, if one was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Requires-action round trips.
    pub action_rounds: u32,
    /// Wall-clock duration of the turn.
    pub duration_ms: f64,
}

impl RunOutcome {
    /// Builds the outcome of a turn that reached a terminal phase.
    #[must_use]
    pub fn from_state(state: &RunState, duration_ms: f64) -> Self {
        let success = state.phase == EnginePhase::Completed;
        let error = if success {
            None
        } else {
            Some(
                state
                    .latest_message
                    .clone()
                    .unwrap_or_else(|| format!("run {}", state.phase)),
            )
        };
        Self {
            success,
            status: state.phase,
            data: state.latest_message.clone(),
            error,
            thread_id: state.thread_id.clone(),
            run_id: state.run_id.clone(),
            action_rounds: state.action_rounds,
            duration_ms,
        }
    }

    /// Builds the outcome of a turn aborted by an unhandled error.
    #[must_use]
    pub fn fail(error: impl Into<String>, state: &RunState, duration_ms: f64) -> Self {
        Self {
            success: false,
            status: EnginePhase::Failed,
            data: None,
            error: Some(error.into()),
            thread_id: state.thread_id.clone(),
            run_id: state.run_id.clone(),
            action_rounds: state.action_rounds,
            duration_ms,
        }
    }

    /// The reply text, or the error for unsuccessful turns.
    #[must_use]
    pub fn message(&self) -> &str {
        self.data
            .as_deref()
            .or(self.error.as_deref())
            .unwrap_or_default()
    }
}
