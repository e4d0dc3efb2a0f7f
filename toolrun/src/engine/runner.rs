//! The run engine: one conversational turn from submission to a terminal phase.

use super::dispatch::{dispatch_tool_calls, DispatchContext};
use super::{rate_limit_backoff, EnginePhase, RunOutcome, RunState};
use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::errors::{EngineError, ServiceError};
use crate::events::{self, EventSink, NoOpEventSink, RunEvent};
use crate::observability::{RunSpanAttributes, SpanTimer};
use crate::service::{MessageRole, ReasoningService, RunStatus, RunStatusReport};
use crate::tools::{SharedState, ToolProvider};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Fallback `latest_message` when a failed run left nothing to show.
const BLANK_MESSAGE: &str = "\n";

/// Drives turns against a [`ReasoningService`], resolving tool calls through
/// a [`ToolProvider`].
///
/// One engine owns one thread; each [`submit`](Self::submit) is one turn on
/// it. Turns on the same engine are serialized. [`cancel`](Self::cancel) may
/// be called from any task while a turn is in flight, so engines are
/// normally shared behind an `Arc`.
pub struct RunEngine {
    service: Arc<dyn ReasoningService>,
    tools: Arc<dyn ToolProvider>,
    config: EngineConfig,
    events: Arc<dyn EventSink>,
    token: CancellationToken,
    state: Mutex<RunState>,
    shared: SharedState,
    turn: tokio::sync::Mutex<()>,
}

impl RunEngine {
    /// Creates an engine with no thread yet.
    #[must_use]
    pub fn new(
        service: Arc<dyn ReasoningService>,
        tools: Arc<dyn ToolProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            service,
            tools,
            config,
            events: Arc::new(NoOpEventSink),
            token: CancellationToken::new(),
            state: Mutex::new(RunState::new()),
            shared: SharedState::new(),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Continues an existing thread instead of creating one.
    #[must_use]
    pub fn with_thread(self, thread_id: impl Into<String>) -> Self {
        self.state.lock().thread_id = Some(thread_id.into());
        self
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A copy of the current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state.lock().clone()
    }

    /// The current phase.
    #[must_use]
    pub fn phase(&self) -> EnginePhase {
        self.state.lock().phase
    }

    /// The engine's thread, once created.
    #[must_use]
    pub fn thread_id(&self) -> Option<String> {
        self.state.lock().thread_id.clone()
    }

    /// State shared with the tools of the current turn.
    #[must_use]
    pub fn shared_state(&self) -> &SharedState {
        &self.shared
    }

    /// Returns true while a turn is executing.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.turn.try_lock().is_err()
    }

    /// Requests cancellation of the current or next turn.
    ///
    /// With a live run the remote cancel is issued right away and the turn
    /// ends once the service reports the run cancelled. Without one the
    /// request is remembered and honored at the first poll of the next run.
    /// A cancel that lands while tools are running ends the turn as soon as
    /// they return; their outputs are not submitted.
    pub async fn cancel(&self) {
        let active = {
            let state = self.state.lock();
            if state.has_active_run() {
                state.thread_id.clone().zip(state.run_id.clone())
            } else {
                None
            }
        };

        if let Some((thread_id, run_id)) = active {
            match self.service.cancel_run(&thread_id, &run_id).await {
                Ok(()) => {
                    info!(thread_id = %thread_id, run_id = %run_id, "Cancel issued for active run");
                    let mut state = self.state.lock();
                    state.cancel_requested = false;
                    state.cancel_issued = true;
                    return;
                }
                Err(e) => {
                    warn!(
                        thread_id = %thread_id,
                        run_id = %run_id,
                        error = %e,
                        "Remote cancel failed, deferring to poll loop"
                    );
                }
            }
        }

        self.state.lock().cancel_requested = true;
        self.token.cancel(self.config.cancel_notice.clone());
        debug!("Cancellation recorded");
    }

    /// Runs one turn for `text`.
    ///
    /// Always returns an outcome; errors escaping the state machine are
    /// logged and reported as a failed outcome.
    pub async fn submit(&self, text: &str) -> RunOutcome {
        let _turn = self.turn.lock().await;
        let timer = SpanTimer::start("turn");
        let mut span = RunSpanAttributes::new(&self.config.assistant_id);

        self.state.lock().begin_turn();
        self.shared.clear();

        let result = self.run_turn(text, &mut span).await;
        let duration_ms = timer.finish();

        let outcome = match result {
            Ok(()) => {
                let state = self.state.lock();
                RunOutcome::from_state(&state, duration_ms)
            }
            Err(e) => {
                error!(
                    thread_id = ?self.thread_id(),
                    error = %e,
                    "Unhandled error in run engine"
                );
                let detail: serde_json::Map<String, serde_json::Value> =
                    e.to_dict().into_iter().collect();
                let state = {
                    let mut state = self.state.lock();
                    if !state.phase.is_terminal() {
                        state.phase = EnginePhase::Failed;
                    }
                    state.clone()
                };
                self.emit(events::RUN_FAILED, json!({ "error": detail }));
                RunOutcome::fail(e.to_string(), &state, duration_ms)
            }
        };

        self.token.reset();
        self.state.lock().cancel_requested = false;

        let span = span
            .with_status(outcome.status.as_str())
            .with_duration_ms(duration_ms);
        info!(
            thread_id = ?outcome.thread_id,
            run_id = ?outcome.run_id,
            status = %outcome.status,
            duration_ms,
            tool_calls = span.tool_calls,
            polls = span.polls,
            "Turn finished"
        );
        outcome
    }

    async fn run_turn(&self, text: &str, span: &mut RunSpanAttributes) -> Result<(), EngineError> {
        if self.config.assistant_id.is_empty() {
            return Err(EngineError::InvalidState(
                "assistant_id is not configured".to_string(),
            ));
        }

        let existing = self.state.lock().thread_id.clone();
        let thread_id = match existing {
            Some(id) => id,
            None => {
                let id = self
                    .service
                    .create_thread()
                    .await
                    .map_err(svc("create_thread"))?;
                info!(thread_id = %id, "Thread created");
                self.state.lock().thread_id = Some(id.clone());
                id
            }
        };
        span.thread_id = Some(thread_id.clone());

        self.service
            .post_message(&thread_id, text)
            .await
            .map_err(svc("post_message"))?;

        let run_id = self.start_run(&thread_id).await?;
        span.run_id = Some(run_id.clone());
        self.transition(EnginePhase::Polling)?;

        self.poll_loop(&thread_id, run_id, span).await
    }

    /// Creates a run and moves to `RunCreated`.
    async fn start_run(&self, thread_id: &str) -> Result<String, EngineError> {
        let run_id = self
            .service
            .create_run(thread_id, &self.config.assistant_id)
            .await
            .map_err(svc("create_run"))?;

        {
            let mut state = self.state.lock();
            state.run_id = Some(run_id.clone());
            state.transition(EnginePhase::RunCreated)?;
        }
        info!(thread_id = %thread_id, run_id = %run_id, "Run created");
        self.emit(
            events::RUN_CREATED,
            json!({ "assistant_id": self.config.assistant_id }),
        );
        Ok(run_id)
    }

    async fn poll_loop(
        &self,
        thread_id: &str,
        mut run_id: String,
        span: &mut RunSpanAttributes,
    ) -> Result<(), EngineError> {
        let mut waiting: u32 = 0;

        loop {
            if self.token.is_cancelled() {
                return self.cancel_in_loop(thread_id, &run_id).await;
            }

            let report = self
                .service
                .get_run_status(thread_id, &run_id)
                .await
                .map_err(svc("get_run_status"))?;
            span.polls += 1;
            debug!(thread_id = %thread_id, run_id = %run_id, status = %report.status, "Polled run");
            self.emit(events::RUN_POLLED, json!({ "status": report.status }));

            match report.status {
                RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling => {
                    self.transition(EnginePhase::Polling)?;
                    let delay = self.config.poll.delay(waiting);
                    waiting = waiting.saturating_add(1);
                    self.sleep(delay).await;
                }
                RunStatus::Failed | RunStatus::Expired => {
                    let backoff = if report.status == RunStatus::Failed {
                        report.error_detail.as_deref().and_then(rate_limit_backoff)
                    } else {
                        None
                    };

                    match backoff {
                        Some(backoff) => {
                            run_id = self.back_off(thread_id, run_id, backoff, span).await?;
                            waiting = 0;
                        }
                        None => return self.finish_failed(thread_id, &run_id, report).await,
                    }
                }
                RunStatus::Cancelled => {
                    return self.finish_cancelled_upstream(thread_id, &run_id);
                }
                RunStatus::Completed => {
                    let message = self.latest_assistant_message(thread_id).await?;
                    self.finish(
                        EnginePhase::Completed,
                        message,
                        events::RUN_COMPLETED,
                        json!({ "polls": span.polls, "tool_calls": span.tool_calls }),
                    )?;
                    info!(thread_id = %thread_id, run_id = %run_id, "Run completed");
                    return Ok(());
                }
                RunStatus::RequiresAction => {
                    span.tool_calls += report.required_calls.len();
                    self.handle_required_action(thread_id, &run_id, report)
                        .await?;
                    if self.state.lock().phase.is_terminal() {
                        return Ok(());
                    }
                    waiting = 0;
                }
            }
        }
    }

    /// Sleeps out a rate-limit backoff, then resumes on a fresh run if
    /// configured to. Returns the run id to keep polling.
    async fn back_off(
        &self,
        thread_id: &str,
        run_id: String,
        backoff: Duration,
        span: &mut RunSpanAttributes,
    ) -> Result<String, EngineError> {
        let backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        warn!(thread_id = %thread_id, run_id = %run_id, backoff_ms, "Run rate limited, backing off");
        self.emit(events::RUN_RATE_LIMITED, json!({ "backoff_ms": backoff_ms }));

        self.transition(EnginePhase::Polling)?;
        self.sleep(backoff).await;

        if !self.config.recreate_run_on_rate_limit || self.token.is_cancelled() {
            return Ok(run_id);
        }
        let fresh = self.start_run(thread_id).await?;
        span.run_id = Some(fresh.clone());
        self.transition(EnginePhase::Polling)?;
        Ok(fresh)
    }

    async fn handle_required_action(
        &self,
        thread_id: &str,
        run_id: &str,
        report: RunStatusReport,
    ) -> Result<(), EngineError> {
        let calls = report.required_calls;
        let round = {
            let mut state = self.state.lock();
            state.transition(EnginePhase::RequiresAction)?;
            state.action_rounds += 1;
            state.pending_tool_calls = calls.clone();
            state.collected_outputs.clear();
            state.action_rounds
        };
        info!(thread_id = %thread_id, run_id = %run_id, calls = calls.len(), round, "Run requires action");
        self.emit(
            events::RUN_REQUIRES_ACTION,
            json!({
                "round": round,
                "tools": calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            }),
        );

        let tools = self.tools.availability(&self.shared);
        let ctx = DispatchContext {
            events: self.events.as_ref(),
            thread_id: Some(thread_id),
            run_id: Some(run_id),
        };
        let outputs =
            dispatch_tool_calls(&calls, &tools, self.config.parallel_tool_calls, ctx).await;
        let errors = outputs.iter().filter(|o| o.is_error()).count();

        if self.token.is_cancelled() {
            return self.cancel_in_loop(thread_id, run_id).await;
        }

        self.state.lock().collected_outputs = outputs.clone();
        if let Err(e) = self
            .service
            .submit_tool_outputs(thread_id, run_id, outputs)
            .await
        {
            // The run was cancelled while its tools were running.
            if self.state.lock().cancel_issued {
                debug!(thread_id = %thread_id, run_id = %run_id, error = %e, "Outputs rejected after cancel");
                return self.finish_cancelled_upstream(thread_id, run_id);
            }
            return Err(svc("submit_tool_outputs")(e));
        }

        {
            let mut state = self.state.lock();
            state.pending_tool_calls.clear();
            state.transition(EnginePhase::Polling)?;
        }
        self.emit(
            events::RUN_OUTPUTS_SUBMITTED,
            json!({ "round": round, "outputs": calls.len(), "errors": errors }),
        );
        Ok(())
    }

    fn finish_cancelled_upstream(&self, thread_id: &str, run_id: &str) -> Result<(), EngineError> {
        self.finish(
            EnginePhase::Cancelled,
            self.config.cancel_notice.clone(),
            events::RUN_CANCELLED,
            json!({ "upstream": true }),
        )?;
        info!(thread_id = %thread_id, run_id = %run_id, "Run cancelled upstream");
        Ok(())
    }

    async fn cancel_in_loop(&self, thread_id: &str, run_id: &str) -> Result<(), EngineError> {
        let reason = self.token.reason();
        if let Err(e) = self.service.cancel_run(thread_id, run_id).await {
            warn!(thread_id = %thread_id, run_id = %run_id, error = %e, "Remote cancel failed");
        }
        self.state.lock().cancel_requested = false;
        self.finish(
            EnginePhase::Cancelled,
            self.config.cancel_notice.clone(),
            events::RUN_CANCELLED,
            json!({ "upstream": false, "reason": reason }),
        )?;
        info!(thread_id = %thread_id, run_id = %run_id, "Run cancelled");
        Ok(())
    }

    async fn finish_failed(
        &self,
        thread_id: &str,
        run_id: &str,
        report: RunStatusReport,
    ) -> Result<(), EngineError> {
        let message = match report.error_detail.filter(|d| !d.trim().is_empty()) {
            Some(detail) => detail,
            None => self.last_message_or_blank(thread_id).await,
        };
        warn!(
            thread_id = %thread_id,
            run_id = %run_id,
            status = %report.status,
            detail = %message.trim(),
            "Run failed"
        );
        self.finish(
            EnginePhase::Failed,
            message.clone(),
            events::RUN_FAILED,
            json!({ "status": report.status, "detail": message }),
        )
    }

    async fn latest_assistant_message(&self, thread_id: &str) -> Result<String, EngineError> {
        let messages = self
            .service
            .list_messages(thread_id)
            .await
            .map_err(svc("list_messages"))?;
        Ok(messages
            .into_iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content)
            .unwrap_or_default())
    }

    async fn last_message_or_blank(&self, thread_id: &str) -> String {
        match self.service.list_messages(thread_id).await {
            Ok(messages) => messages
                .into_iter()
                .last()
                .map(|m| m.content)
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| BLANK_MESSAGE.to_string()),
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "Could not fetch messages for failed run");
                BLANK_MESSAGE.to_string()
            }
        }
    }

    /// Records the terminal phase and its message, then emits `event_type`.
    fn finish(
        &self,
        phase: EnginePhase,
        message: String,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock();
            state.transition(phase)?;
            state.latest_message = Some(message);
        }
        self.emit(event_type, data);
        Ok(())
    }

    fn transition(&self, next: EnginePhase) -> Result<(), EngineError> {
        self.state.lock().transition(next)
    }

    /// Sleeps for `duration`, waking early on cancellation.
    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            () = self.token.cancelled() => {
                debug!("Poll sleep interrupted by cancellation");
            }
        }
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        let (thread_id, run_id) = {
            let state = self.state.lock();
            (state.thread_id.clone(), state.run_id.clone())
        };
        self.events.try_emit(
            RunEvent::new(event_type)
                .with_ids(thread_id.as_deref(), run_id.as_deref())
                .with_data(data),
        );
    }
}

impl std::fmt::Debug for RunEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEngine")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

fn svc(operation: &'static str) -> impl FnOnce(ServiceError) -> EngineError {
    move |source| EngineError::service(operation, source)
}
