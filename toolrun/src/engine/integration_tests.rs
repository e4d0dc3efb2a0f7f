//! End-to-end engine tests against a scripted service.

use super::*;
use crate::config::EngineConfig;
use crate::errors::{ServiceError, ToolError};
use crate::events::{self, CollectingEventSink};
use crate::service::{RequiredToolCall, RunStatus, RunStatusReport, ToolCallOutput};
use crate::testing::{ScriptedService, ServiceCall};
use crate::tools::{AvailabilityMap, ToolExecutor, ToolRegistry, ToolSource};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const RATE_LIMIT_DETAIL: &str = "rate_limit_exceeded: Rate limit reached for gpt-4 in \
    organization org-x on tokens per min. Please try again in 2m54.355s.";

fn config() -> EngineConfig {
    EngineConfig::new("asst_1").with_poll_interval(Duration::from_millis(100))
}

fn engine(service: &Arc<ScriptedService>, tools: AvailabilityMap) -> RunEngine {
    RunEngine::new(service.clone(), Arc::new(tools), config())
}

fn stub_tools() -> AvailabilityMap {
    AvailabilityMap::new()
        .with_fn("list_files", |_| async { Ok(json!("[a.txt]")) })
        .with_fn("word_count", |args| async move {
            let text = args["text"].as_str().unwrap_or_default();
            Ok(json!(text.split_whitespace().count()))
        })
        .with_fn("flaky", |_| async {
            Err(ToolError::execution_failed("flaky", "connection reset"))
        })
}

#[tokio::test(start_paused = true)]
async fn test_list_files_takes_one_action_round() {
    let registry = Arc::new(ToolRegistry::new());
    let executor = ToolExecutor::new(registry.clone());
    executor.register_native_fn("list_files", |_, _| async { Ok(json!("[a.txt]")) });
    assert!(registry.add_tool(
        "list_files",
        ToolSource::native("list_files"),
        json!({"type": "object"}),
        BTreeSet::new(),
    ));

    let service = Arc::new(
        ScriptedService::new()
            .then(RunStatus::Queued)
            .with_statuses([RunStatusReport::requires_action(vec![
                RequiredToolCall::new("call_1", "list_files", "{}"),
            ])])
            .then(RunStatus::InProgress)
            .then(RunStatus::Completed)
            .with_reply("The directory contains a.txt."),
    );
    let engine = RunEngine::new(service.clone(), Arc::new(executor), config());

    let outcome = engine.submit("list files").await;

    assert!(outcome.success);
    assert_eq!(outcome.status, EnginePhase::Completed);
    assert_eq!(outcome.action_rounds, 1);
    assert_eq!(outcome.message(), "The directory contains a.txt.");
    assert_eq!(
        service.submitted_outputs(),
        vec![vec![ToolCallOutput::new("call_1", "[a.txt]")]]
    );
    assert_eq!(
        registry.get("list_files").map(|r| r.metadata.usage_count),
        Some(1)
    );
    assert_eq!(engine.shared_state().work_products().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_with_one_failure_submits_every_output() {
    let service = Arc::new(
        ScriptedService::new()
            .with_statuses([RunStatusReport::requires_action(vec![
                RequiredToolCall::new("c1", "list_files", "{}"),
                RequiredToolCall::new("c2", "flaky", "{}"),
                RequiredToolCall::new("c3", "word_count", r#"{"text": "one two three"}"#),
                RequiredToolCall::new("c4", "web_search", r#"{"q": "rust"}"#),
            ])])
            .then(RunStatus::Completed),
    );
    let engine = engine(&service, stub_tools());

    let outcome = engine.submit("do things").await;
    assert!(outcome.success);

    let batches = service.submitted_outputs();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0],
        vec![
            ToolCallOutput::new("c1", "[a.txt]"),
            ToolCallOutput::new("c2", "error: connection reset"),
            ToolCallOutput::new("c3", "3"),
            ToolCallOutput::new("c4", "web_search is not available."),
        ]
    );
    assert_eq!(batches[0].iter().filter(|o| o.is_error()).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_dispatch_keeps_call_order() {
    let service = Arc::new(
        ScriptedService::new()
            .with_statuses([RunStatusReport::requires_action(vec![
                RequiredToolCall::new("c1", "word_count", r#"{"text": "a b"}"#),
                RequiredToolCall::new("c2", "list_files", ""),
            ])])
            .then(RunStatus::Completed),
    );
    let engine = RunEngine::new(
        service.clone(),
        Arc::new(stub_tools()),
        config().with_parallel_tool_calls(true),
    );

    let outcome = engine.submit("go").await;

    assert!(outcome.success);
    assert_eq!(
        service.submitted_outputs()[0],
        vec![
            ToolCallOutput::new("c1", "2"),
            ToolCallOutput::new("c2", "[a.txt]"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_backs_off_then_recreates_run() {
    let service = Arc::new(
        ScriptedService::new()
            .with_statuses([RunStatusReport::failed(RATE_LIMIT_DETAIL)])
            .then(RunStatus::Completed)
            .with_reply("done"),
    );
    let sink = Arc::new(CollectingEventSink::new());
    let engine = engine(&service, stub_tools()).with_events(sink.clone());

    let started = Instant::now();
    let outcome = engine.submit("hello").await;

    assert!(outcome.success, "rate limit must not fail the turn");
    assert!(started.elapsed() >= Duration::from_millis(175_000));
    assert_eq!(service.runs_created(), 2);
    assert_eq!(outcome.message(), "done");

    let limited = sink.events_of_type(events::RUN_RATE_LIMITED);
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].data["backoff_ms"], 175_000);
    assert!(sink.events_of_type(events::RUN_FAILED).is_empty());

    let created: Vec<String> = service
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ServiceCall::CreateRun { thread_id, .. } => Some(thread_id),
            _ => None,
        })
        .collect();
    assert_eq!(created[0], created[1], "fresh run stays on the same thread");
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_without_recreate_keeps_polling_same_run() {
    let service = Arc::new(
        ScriptedService::new()
            .with_statuses([RunStatusReport::failed(RATE_LIMIT_DETAIL)])
            .then(RunStatus::Completed),
    );
    let engine = RunEngine::new(
        service.clone(),
        Arc::new(stub_tools()),
        config().with_recreate_run_on_rate_limit(false),
    );

    let outcome = engine.submit("hello").await;

    assert!(outcome.success);
    assert_eq!(service.runs_created(), 1);
    assert_eq!(service.status_polls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_reports_error_detail() {
    let service = Arc::new(
        ScriptedService::new().with_statuses([RunStatusReport::failed("server_error: boom")]),
    );
    let sink = Arc::new(CollectingEventSink::new());
    let engine = engine(&service, stub_tools()).with_events(sink.clone());

    let outcome = engine.submit("hello").await;

    assert!(!outcome.success);
    assert_eq!(outcome.status, EnginePhase::Failed);
    assert_eq!(outcome.error.as_deref(), Some("server_error: boom"));
    assert_eq!(service.runs_created(), 1);
    assert_eq!(sink.events_of_type(events::RUN_FAILED).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_detail_is_not_rate_limit() {
    let detail = "server_error: tool execution timed out in 30s";
    let service =
        Arc::new(ScriptedService::new().with_statuses([RunStatusReport::failed(detail)]));
    let sink = Arc::new(CollectingEventSink::new());
    let engine = engine(&service, stub_tools()).with_events(sink.clone());

    let outcome = tokio::time::timeout(Duration::from_secs(3600), engine.submit("hello"))
        .await
        .expect("turn should finish without backing off");

    assert_eq!(outcome.status, EnginePhase::Failed);
    assert_eq!(outcome.error.as_deref(), Some(detail));
    assert!(sink.events_of_type(events::RUN_RATE_LIMITED).is_empty());
    assert_eq!(service.runs_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_run_falls_back_to_last_message() {
    let service = Arc::new(ScriptedService::new().then(RunStatus::Expired));
    let engine = engine(&service, stub_tools());

    let outcome = engine.submit("are you there?").await;

    assert_eq!(outcome.status, EnginePhase::Failed);
    assert_eq!(outcome.error.as_deref(), Some("are you there?"));
}

#[tokio::test(start_paused = true)]
async fn test_expired_with_rate_limit_text_is_still_terminal() {
    let service = Arc::new(ScriptedService::new().with_statuses([RunStatusReport {
        status: RunStatus::Expired,
        required_calls: Vec::new(),
        error_detail: Some(RATE_LIMIT_DETAIL.to_string()),
    }]));
    let engine = engine(&service, stub_tools());

    let outcome = engine.submit("hello").await;

    assert_eq!(outcome.status, EnginePhase::Failed);
    assert_eq!(service.runs_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_thread_exists() {
    let service = Arc::new(
        ScriptedService::new()
            .then(RunStatus::Completed)
            .with_reply("should never be seen"),
    );
    let engine = engine(&service, stub_tools());
    assert!(engine.thread_id().is_none());

    engine.cancel().await;
    assert!(engine.state().cancel_requested);

    let outcome = engine.submit("hello").await;

    assert_eq!(outcome.status, EnginePhase::Cancelled);
    assert!(!outcome.success);
    assert_eq!(outcome.message(), "Run cancelled by user.");
    assert_eq!(service.status_polls(), 0);
    assert_eq!(service.cancel_calls(), 1);
    assert!(!engine.state().cancel_requested);

    // The request applied to one turn only.
    let next = engine.submit("hello again").await;
    assert_eq!(next.status, EnginePhase::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_polling_issues_remote_cancel() {
    let service = Arc::new(ScriptedService::new().then(RunStatus::InProgress));
    let sink = Arc::new(CollectingEventSink::new());
    let engine = Arc::new(
        RunEngine::new(
            service.clone(),
            Arc::new(stub_tools()),
            EngineConfig::new("asst_1").with_poll_interval(Duration::from_secs(1)),
        )
        .with_events(sink.clone()),
    );

    let turn = tokio::spawn({
        let engine = engine.clone();
        async move { engine.submit("long job").await }
    });
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(engine.is_busy());

    engine.cancel().await;
    let outcome = tokio_test::assert_ok!(turn.await);

    assert_eq!(outcome.status, EnginePhase::Cancelled);
    assert_eq!(service.cancel_calls(), 1);
    let cancelled = sink.events_of_type(events::RUN_CANCELLED);
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].data["upstream"], true);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_poll_sleep_when_remote_cancel_fails() {
    let service = Arc::new(ScriptedService::new().then(RunStatus::InProgress));
    let sink = Arc::new(CollectingEventSink::new());
    let engine = Arc::new(
        RunEngine::new(
            service.clone(),
            Arc::new(stub_tools()),
            EngineConfig::new("asst_1").with_poll_interval(Duration::from_secs(60)),
        )
        .with_events(sink.clone()),
    );

    let started = Instant::now();
    let turn = tokio::spawn({
        let engine = engine.clone();
        async move { engine.submit("long job").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    service.fail_next("cancel_run", ServiceError::Network("connection refused".into()));
    engine.cancel().await;
    let outcome = tokio_test::assert_ok!(turn.await);

    assert_eq!(outcome.status, EnginePhase::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(service.cancel_calls(), 2);
    assert_eq!(
        sink.events_of_type(events::RUN_CANCELLED)[0].data["upstream"],
        false
    );
}

fn slow_tools() -> AvailabilityMap {
    stub_tools().with_fn("slow_scan", |_| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(json!("scanned"))
    })
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_tool_dispatch_ends_cancelled() {
    let service = Arc::new(
        ScriptedService::new()
            .with_statuses([RunStatusReport::requires_action(vec![
                RequiredToolCall::new("c1", "slow_scan", "{}"),
            ])])
            .then(RunStatus::Completed),
    );
    let sink = Arc::new(CollectingEventSink::new());
    let engine = Arc::new(engine(&service, slow_tools()).with_events(sink.clone()));

    let turn = tokio::spawn({
        let engine = engine.clone();
        async move { engine.submit("scan").await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.state().phase, EnginePhase::RequiresAction);

    engine.cancel().await;
    let outcome = tokio_test::assert_ok!(turn.await);

    assert_eq!(outcome.status, EnginePhase::Cancelled);
    assert_eq!(outcome.message(), "Run cancelled by user.");
    assert_eq!(service.cancel_calls(), 1);
    assert!(sink.events_of_type(events::RUN_FAILED).is_empty());
    assert!(sink.events_of_type(events::RUN_OUTPUTS_SUBMITTED).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_dispatch_skips_submit_when_remote_cancel_fails() {
    let service = Arc::new(
        ScriptedService::new()
            .with_statuses([RunStatusReport::requires_action(vec![
                RequiredToolCall::new("c1", "slow_scan", "{}"),
            ])])
            .then(RunStatus::Completed),
    );
    let engine = Arc::new(engine(&service, slow_tools()));

    let turn = tokio::spawn({
        let engine = engine.clone();
        async move { engine.submit("scan").await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    service.fail_next("cancel_run", ServiceError::Network("connection refused".into()));
    engine.cancel().await;
    let outcome = tokio_test::assert_ok!(turn.await);

    assert_eq!(outcome.status, EnginePhase::Cancelled);
    assert!(service.submitted_outputs().is_empty());
    assert_eq!(service.cancel_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_turns_share_one_thread() {
    let service = Arc::new(
        ScriptedService::new()
            .then(RunStatus::Completed)
            .with_reply("first")
            .with_reply("second"),
    );
    let engine = engine(&service, stub_tools());

    let first = engine.submit("one").await;
    let second = engine.submit("two").await;

    assert_eq!(first.message(), "first");
    assert_eq!(second.message(), "second");
    assert_eq!(first.thread_id, second.thread_id);
    assert_eq!(
        service
            .calls()
            .iter()
            .filter(|c| matches!(c, ServiceCall::CreateThread))
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_existing_thread_is_reused() {
    let service = Arc::new(ScriptedService::new().then(RunStatus::Completed));
    let engine = engine(&service, stub_tools()).with_thread("thread_saved");

    let outcome = engine.submit("resume").await;

    assert!(outcome.success);
    assert_eq!(outcome.thread_id.as_deref(), Some("thread_saved"));
    assert!(!service.calls().contains(&ServiceCall::CreateThread));
}

#[tokio::test]
async fn test_service_error_becomes_failed_outcome() {
    let service = Arc::new(ScriptedService::new());
    service.fail_next(
        "create_run",
        ServiceError::Api {
            status: 500,
            message: "internal".into(),
        },
    );
    let sink = Arc::new(CollectingEventSink::new());
    let engine = engine(&service, stub_tools()).with_events(sink.clone());

    let outcome = engine.submit("hello").await;

    assert!(!outcome.success);
    assert_eq!(outcome.status, EnginePhase::Failed);
    assert!(outcome.message().contains("create_run"));
    let failed = sink.events_of_type(events::RUN_FAILED);
    assert_eq!(failed[0].data["error"]["type"], "EngineServiceError");
}

#[tokio::test]
async fn test_missing_assistant_id_fails_without_calls() {
    let service = Arc::new(ScriptedService::new());
    let engine = RunEngine::new(
        service.clone(),
        Arc::new(stub_tools()),
        EngineConfig::default(),
    );

    let outcome = engine.submit("hello").await;

    assert!(!outcome.success);
    assert!(outcome.message().contains("assistant_id"));
    assert!(service.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_completed_turn_event_sequence() {
    let service = Arc::new(
        ScriptedService::new()
            .then(RunStatus::InProgress)
            .then(RunStatus::Completed),
    );
    let sink = Arc::new(CollectingEventSink::new());
    let engine = engine(&service, stub_tools()).with_events(sink.clone());

    engine.submit("hello").await;

    assert_eq!(
        sink.event_types(),
        vec![
            events::RUN_CREATED,
            events::RUN_POLLED,
            events::RUN_POLLED,
            events::RUN_COMPLETED,
        ]
    );
    assert!(sink.events().iter().all(|e| e.thread_id.is_some()));
}
