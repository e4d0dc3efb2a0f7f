//! Observability utilities.

mod tracing;

pub use tracing::{init_tracing, init_tracing_with_filter, LogFormat, RunSpanAttributes, SpanTimer};
