//! The run engine and its supporting pieces.
//!
//! This module provides:
//! - [`RunEngine`], the poll/dispatch/retry/cancel state machine for one turn
//! - [`EnginePhase`] and [`RunState`]
//! - Poll pacing ([`PollStrategy`]) and rate-limit backoff parsing
//! - Tool-call batch dispatch with per-call failure isolation
//! - [`RunOutcome`], the typed result of a turn

mod backoff;
mod dispatch;
mod outcome;
mod runner;
mod state;

#[cfg(test)]
mod integration_tests;

pub use backoff::{rate_limit_backoff, JitterStrategy, PollStrategy};
pub use dispatch::{dispatch_tool_calls, DispatchContext};
pub use outcome::RunOutcome;
pub use runner::RunEngine;
pub use state::{EnginePhase, RunState};
