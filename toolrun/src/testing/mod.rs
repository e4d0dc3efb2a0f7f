//! Testing utilities for run engines and sessions.
//!
//! This module provides:
//! - [`ScriptedService`], an in-memory reasoning service that replays a
//!   scripted sequence of run statuses and records every call

mod service;

pub use service::{ScriptedService, ServiceCall};
