//! Structured logging setup and run span helpers.

use crate::errors::ToolrunError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Installs a global `tracing` subscriber filtered by `RUST_LOG`, defaulting
/// to `info`.
pub fn init_tracing(format: LogFormat) -> Result<(), ToolrunError> {
    init_tracing_with_filter(format, "info")
}

/// Installs a global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` and falls back to `default_filter`
/// (e.g. `"toolrun=debug"`). Fails if a subscriber is already installed.
pub fn init_tracing_with_filter(format: LogFormat, default_filter: &str) -> Result<(), ToolrunError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| ToolrunError::Config(format!("invalid log filter: {e}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| ToolrunError::Config(format!("failed to install subscriber: {e}")))
}

/// Span attributes for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSpanAttributes {
    /// Assistant the run targets.
    pub assistant_id: Option<String>,
    /// Thread id.
    pub thread_id: Option<String>,
    /// Remote run id.
    pub run_id: Option<String>,
    /// Final phase.
    pub status: Option<String>,
    /// Tool calls dispatched during the run.
    pub tool_calls: usize,
    /// Status polls issued.
    pub polls: usize,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
}

impl RunSpanAttributes {
    /// Creates attributes for an assistant.
    #[must_use]
    pub fn new(assistant_id: impl Into<String>) -> Self {
        Self {
            assistant_id: Some(assistant_id.into()),
            ..Self::default()
        }
    }

    /// Sets the final status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Flattens to OpenTelemetry-style attribute names.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();

        if let Some(ref v) = self.assistant_id {
            attrs.insert("run.assistant_id".to_string(), v.clone());
        }
        if let Some(ref v) = self.thread_id {
            attrs.insert("run.thread_id".to_string(), v.clone());
        }
        if let Some(ref v) = self.run_id {
            attrs.insert("run.id".to_string(), v.clone());
        }
        if let Some(ref v) = self.status {
            attrs.insert("run.status".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("run.duration_ms".to_string(), v.to_string());
        }
        attrs.insert("run.tool_calls".to_string(), self.tool_calls.to_string());
        attrs.insert("run.polls".to_string(), self.polls.to_string());

        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_attributes() {
        let mut attrs = RunSpanAttributes::new("asst_1")
            .with_status("completed")
            .with_duration_ms(12.5);
        attrs.run_id = Some("run_9".into());
        attrs.tool_calls = 3;

        let otel = attrs.to_otel_attributes();
        assert_eq!(otel.get("run.assistant_id"), Some(&"asst_1".to_string()));
        assert_eq!(otel.get("run.id"), Some(&"run_9".to_string()));
        assert_eq!(otel.get("run.status"), Some(&"completed".to_string()));
        assert_eq!(otel.get("run.duration_ms"), Some(&"12.5".to_string()));
        assert_eq!(otel.get("run.tool_calls"), Some(&"3".to_string()));
        assert!(!otel.contains_key("run.thread_id"));
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("run");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(timer.name(), "run");
        assert!(timer.finish() >= 10.0);
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
