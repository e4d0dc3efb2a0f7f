//! Resolving a requires-action batch into tool outputs.

use crate::errors::ToolError;
use crate::events::{self, EventSink, RunEvent};
use crate::observability::SpanTimer;
use crate::service::{RequiredToolCall, ToolCallOutput};
use crate::tools::AvailabilityMap;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

/// Where dispatch events are reported, and for which run.
#[derive(Clone, Copy)]
pub struct DispatchContext<'a> {
    /// Event destination.
    pub events: &'a dyn EventSink,
    /// Thread id for event tagging.
    pub thread_id: Option<&'a str>,
    /// Run id for event tagging.
    pub run_id: Option<&'a str>,
}

impl DispatchContext<'_> {
    fn emit(&self, event_type: &str, data: serde_json::Value) {
        self.events.try_emit(
            RunEvent::new(event_type)
                .with_ids(self.thread_id, self.run_id)
                .with_data(data),
        );
    }
}

/// Resolves every call in `calls` against `tools`.
///
/// Returns exactly one output per call, in call order. A call that cannot
/// be resolved, fails or panics contributes an error-tagged output; it never
/// prevents its siblings from running.
pub async fn dispatch_tool_calls(
    calls: &[RequiredToolCall],
    tools: &AvailabilityMap,
    parallel: bool,
    ctx: DispatchContext<'_>,
) -> Vec<ToolCallOutput> {
    if parallel {
        join_all(calls.iter().map(|call| resolve_call(call, tools, ctx))).await
    } else {
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            outputs.push(resolve_call(call, tools, ctx).await);
        }
        outputs
    }
}

async fn resolve_call(
    call: &RequiredToolCall,
    tools: &AvailabilityMap,
    ctx: DispatchContext<'_>,
) -> ToolCallOutput {
    let Some(tool) = tools.get(&call.name) else {
        let err = ToolError::not_available(&call.name);
        warn!(tool = %call.name, call_id = %call.id, "Tool not available");
        ctx.emit(
            events::TOOL_UNAVAILABLE,
            json!({"tool": call.name, "call_id": call.id}),
        );
        return ToolCallOutput::new(&call.id, err.to_string());
    };

    let args = match parse_arguments(call) {
        Ok(args) => args,
        Err(err) => return failed(call, &err, ctx, 0.0),
    };

    ctx.emit(
        events::TOOL_INVOKED,
        json!({"tool": call.name, "call_id": call.id}),
    );
    let timer = SpanTimer::start(&call.name);

    let invocation = AssertUnwindSafe(async { tool.call(args).await }).catch_unwind();
    match invocation.await {
        Ok(Ok(value)) => {
            let duration_ms = timer.finish();
            debug!(tool = %call.name, call_id = %call.id, duration_ms, "Tool completed");
            ctx.emit(
                events::TOOL_COMPLETED,
                json!({"tool": call.name, "call_id": call.id, "duration_ms": duration_ms}),
            );
            ToolCallOutput::new(&call.id, render_output(value))
        }
        Ok(Err(err)) => failed(call, &err, ctx, timer.finish()),
        Err(_) => {
            let err = ToolError::execution_failed(&call.name, "tool panicked");
            failed(call, &err, ctx, timer.finish())
        }
    }
}

fn failed(
    call: &RequiredToolCall,
    err: &ToolError,
    ctx: DispatchContext<'_>,
    duration_ms: f64,
) -> ToolCallOutput {
    warn!(tool = %call.name, call_id = %call.id, error = %err, "Tool call failed");
    let detail: serde_json::Map<String, serde_json::Value> = err.to_dict().into_iter().collect();
    ctx.emit(
        events::TOOL_FAILED,
        json!({
            "tool": call.name,
            "call_id": call.id,
            "duration_ms": duration_ms,
            "error": detail,
        }),
    );
    ToolCallOutput::new(&call.id, format!("error: {}", err.reason()))
}

/// Parses the JSON-string arguments; a blank string means no arguments.
fn parse_arguments(call: &RequiredToolCall) -> Result<serde_json::Value, ToolError> {
    if call.arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&call.arguments)
        .map_err(|e| ToolError::invalid_arguments(&call.name, format!("invalid arguments: {e}")))
}

/// String results are passed through verbatim; anything else is JSON text.
fn render_output(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx(sink: &CollectingEventSink) -> DispatchContext<'_> {
        DispatchContext {
            events: sink,
            thread_id: Some("th_1"),
            run_id: Some("run_1"),
        }
    }

    fn tools() -> AvailabilityMap {
        AvailabilityMap::new()
            .with_fn("list_files", |_| async { Ok(json!("[a.txt]")) })
            .with_fn("count", |args| async move { Ok(json!({"n": args["n"]})) })
            .with_fn("explode", |_| async {
                Err(ToolError::execution_failed("explode", "disk on fire"))
            })
            .with_fn("boom", |_| async {
                let empty: Vec<serde_json::Value> = Vec::new();
                Ok(empty[0].clone())
            })
    }

    #[tokio::test]
    async fn test_panicking_tool_keeps_sibling_outputs() {
        for parallel in [false, true] {
            let sink = CollectingEventSink::new();
            let calls = vec![
                RequiredToolCall::new("c1", "list_files", "{}"),
                RequiredToolCall::new("c2", "boom", "{}"),
                RequiredToolCall::new("c3", "count", r#"{"n": 1}"#),
            ];

            let outputs = dispatch_tool_calls(&calls, &tools(), parallel, ctx(&sink)).await;

            assert_eq!(
                outputs,
                vec![
                    ToolCallOutput::new("c1", "[a.txt]"),
                    ToolCallOutput::new("c2", "error: tool panicked"),
                    ToolCallOutput::new("c3", r#"{"n":1}"#),
                ]
            );
            let failed = sink.events_of_type(events::TOOL_FAILED);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].data["call_id"], "c2");
        }
    }

    #[tokio::test]
    async fn test_one_failure_in_batch_is_isolated() {
        let sink = CollectingEventSink::new();
        let calls = vec![
            RequiredToolCall::new("c1", "list_files", "{}"),
            RequiredToolCall::new("c2", "explode", "{}"),
            RequiredToolCall::new("c3", "count", r#"{"n": 3}"#),
        ];

        let outputs = dispatch_tool_calls(&calls, &tools(), false, ctx(&sink)).await;

        assert_eq!(
            outputs,
            vec![
                ToolCallOutput::new("c1", "[a.txt]"),
                ToolCallOutput::new("c2", "error: disk on fire"),
                ToolCallOutput::new("c3", r#"{"n":3}"#),
            ]
        );
        assert_eq!(outputs.iter().filter(|o| o.is_error()).count(), 1);
        assert_eq!(sink.events_of_type(events::TOOL_FAILED).len(), 1);
        assert_eq!(sink.events_of_type(events::TOOL_COMPLETED).len(), 2);
    }

    #[tokio::test]
    async fn test_missing_tool_output() {
        let sink = CollectingEventSink::new();
        let calls = vec![RequiredToolCall::new("c1", "web_search", "{}")];

        let outputs = dispatch_tool_calls(&calls, &tools(), false, ctx(&sink)).await;

        assert_eq!(outputs[0].output, "web_search is not available.");
        assert_eq!(sink.event_types(), vec![events::TOOL_UNAVAILABLE]);
    }

    #[tokio::test]
    async fn test_bad_arguments_are_error_outputs() {
        let sink = CollectingEventSink::new();
        let calls = vec![
            RequiredToolCall::new("c1", "count", "{not json"),
            RequiredToolCall::new("c2", "count", ""),
        ];

        let outputs = dispatch_tool_calls(&calls, &tools(), false, ctx(&sink)).await;

        assert!(outputs[0].output.starts_with("error: invalid arguments"));
        assert_eq!(outputs[1].output, r#"{"n":null}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_preserves_order_and_overlaps() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tools = AvailabilityMap::new();
        for (name, delay) in [("slow", 30u64), ("fast", 10u64)] {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            tools.insert_fn(name, move |_| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!(name))
                }
            });
        }

        let sink = CollectingEventSink::new();
        let calls = vec![
            RequiredToolCall::new("c1", "slow", "{}"),
            RequiredToolCall::new("c2", "fast", "{}"),
        ];
        let outputs = dispatch_tool_calls(&calls, &tools, true, ctx(&sink)).await;

        assert_eq!(outputs[0], ToolCallOutput::new("c1", "slow"));
        assert_eq!(outputs[1], ToolCallOutput::new("c2", "fast"));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_events_tagged_with_run() {
        let sink = CollectingEventSink::new();
        let calls = vec![RequiredToolCall::new("c1", "list_files", "{}")];
        dispatch_tool_calls(&calls, &tools(), false, ctx(&sink)).await;

        let invoked = &sink.events_of_type(events::TOOL_INVOKED)[0];
        assert_eq!(invoked.run_id.as_deref(), Some("run_1"));
        assert_eq!(invoked.data["tool"], "list_files");
    }
}
