//! Scripted in-memory reasoning service.

use crate::errors::ServiceError;
use crate::service::{
    MessageRole, ReasoningService, RunStatus, RunStatusReport, ThreadMessage, ToolCallOutput,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// A call received by a [`ScriptedService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    /// `create_thread`
    CreateThread,
    /// `post_message`
    PostMessage {
        /// Thread id.
        thread_id: String,
        /// Message text.
        content: String,
    },
    /// `create_run`
    CreateRun {
        /// Thread id.
        thread_id: String,
        /// Assistant id.
        assistant_id: String,
    },
    /// `get_run_status`
    GetRunStatus {
        /// Run id.
        run_id: String,
    },
    /// `submit_tool_outputs`
    SubmitToolOutputs {
        /// Run id.
        run_id: String,
        /// Submitted outputs.
        outputs: Vec<ToolCallOutput>,
    },
    /// `cancel_run`
    CancelRun {
        /// Run id.
        run_id: String,
    },
    /// `list_messages`
    ListMessages {
        /// Thread id.
        thread_id: String,
    },
}

#[derive(Debug, Default)]
struct Script {
    statuses: VecDeque<RunStatusReport>,
    last_status: Option<RunStatusReport>,
    replies: VecDeque<String>,
    failures: HashMap<&'static str, ServiceError>,
    cancelled_runs: Vec<String>,
    threads: HashMap<String, Vec<ThreadMessage>>,
    next_id: u64,
}

impl Script {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }
}

/// A [`ReasoningService`] that replays scripted run statuses.
///
/// Status reports are served in order across all runs; once the script is
/// exhausted the last report repeats (or `in_progress` if none was
/// scripted). After `cancel_run` the cancelled run reports `cancelled`.
/// Each `completed` report appends the next queued reply to the thread as an
/// assistant message.
#[derive(Debug, Default)]
pub struct ScriptedService {
    script: Mutex<Script>,
    calls: Mutex<Vec<ServiceCall>>,
}

impl ScriptedService {
    /// Creates a service with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends status reports to the script.
    #[must_use]
    pub fn with_statuses(self, reports: impl IntoIterator<Item = RunStatusReport>) -> Self {
        self.script.lock().statuses.extend(reports);
        self
    }

    /// Appends a plain status to the script.
    #[must_use]
    pub fn then(self, status: RunStatus) -> Self {
        self.with_statuses([RunStatusReport::new(status)])
    }

    /// Queues an assistant reply for the next completed run.
    #[must_use]
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.script.lock().replies.push_back(reply.into());
        self
    }

    /// Makes the next call to `operation` fail with `error`.
    pub fn fail_next(&self, operation: &'static str, error: ServiceError) {
        self.script.lock().failures.insert(operation, error);
    }

    /// Appends a message to a thread directly.
    pub fn push_message(&self, thread_id: &str, role: MessageRole, content: impl Into<String>) {
        let mut script = self.script.lock();
        let id = script.next_id("msg");
        let messages = script.threads.entry(thread_id.to_string()).or_default();
        let created_at = i64::try_from(messages.len()).unwrap_or(i64::MAX);
        messages.push(ThreadMessage {
            id,
            role,
            content: content.into(),
            created_at,
        });
    }

    /// Every call received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    /// Number of status polls served.
    #[must_use]
    pub fn status_polls(&self) -> usize {
        self.count(|c| matches!(c, ServiceCall::GetRunStatus { .. }))
    }

    /// Number of runs created.
    #[must_use]
    pub fn runs_created(&self) -> usize {
        self.count(|c| matches!(c, ServiceCall::CreateRun { .. }))
    }

    /// Number of cancel requests.
    #[must_use]
    pub fn cancel_calls(&self) -> usize {
        self.count(|c| matches!(c, ServiceCall::CancelRun { .. }))
    }

    /// Every submitted output batch, in order.
    #[must_use]
    pub fn submitted_outputs(&self) -> Vec<Vec<ToolCallOutput>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ServiceCall::SubmitToolOutputs { outputs, .. } => Some(outputs.clone()),
                _ => None,
            })
            .collect()
    }

    /// Messages on a thread.
    #[must_use]
    pub fn messages(&self, thread_id: &str) -> Vec<ThreadMessage> {
        self.script
            .lock()
            .threads
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    fn count(&self, pred: impl Fn(&ServiceCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, operation: &'static str, call: ServiceCall) -> Result<(), ServiceError> {
        self.calls.lock().push(call);
        match self.script.lock().failures.remove(operation) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn create_thread(&self) -> Result<String, ServiceError> {
        self.record("create_thread", ServiceCall::CreateThread)?;
        let mut script = self.script.lock();
        let id = script.next_id("thread");
        script.threads.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), ServiceError> {
        self.record(
            "post_message",
            ServiceCall::PostMessage {
                thread_id: thread_id.to_string(),
                content: content.to_string(),
            },
        )?;
        self.push_message(thread_id, MessageRole::User, content);
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<String, ServiceError> {
        self.record(
            "create_run",
            ServiceCall::CreateRun {
                thread_id: thread_id.to_string(),
                assistant_id: assistant_id.to_string(),
            },
        )?;
        Ok(self.script.lock().next_id("run"))
    }

    async fn get_run_status(
        &self,
        thread_id: &str,
        run_id: &str,
    ) -> Result<RunStatusReport, ServiceError> {
        self.record(
            "get_run_status",
            ServiceCall::GetRunStatus {
                run_id: run_id.to_string(),
            },
        )?;

        let (report, reply) = {
            let mut script = self.script.lock();
            if script.cancelled_runs.iter().any(|r| r == run_id) {
                return Ok(RunStatusReport::new(RunStatus::Cancelled));
            }
            let report = match script.statuses.pop_front() {
                Some(report) => {
                    script.last_status = Some(report.clone());
                    report
                }
                None => script
                    .last_status
                    .clone()
                    .unwrap_or_else(|| RunStatusReport::new(RunStatus::InProgress)),
            };
            let reply = if report.status == RunStatus::Completed {
                script.replies.pop_front()
            } else {
                None
            };
            (report, reply)
        };

        if let Some(reply) = reply {
            self.push_message(thread_id, MessageRole::Assistant, reply);
        }
        Ok(report)
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolCallOutput>,
    ) -> Result<(), ServiceError> {
        self.record(
            "submit_tool_outputs",
            ServiceCall::SubmitToolOutputs {
                run_id: run_id.to_string(),
                outputs,
            },
        )?;
        if self.script.lock().cancelled_runs.iter().any(|id| id == run_id) {
            return Err(ServiceError::Api {
                status: 400,
                message: format!("Run {run_id} is cancelled and cannot accept tool outputs"),
            });
        }
        Ok(())
    }

    async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> Result<(), ServiceError> {
        self.record(
            "cancel_run",
            ServiceCall::CancelRun {
                run_id: run_id.to_string(),
            },
        )?;
        self.script.lock().cancelled_runs.push(run_id.to_string());
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ServiceError> {
        self.record(
            "list_messages",
            ServiceCall::ListMessages {
                thread_id: thread_id.to_string(),
            },
        )?;
        Ok(self.messages(thread_id))
    }
}
