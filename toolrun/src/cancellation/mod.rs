//! Cooperative cancellation for in-flight runs.
//!
//! This module provides:
//! - [`CancellationToken`], checked by the run engine between polls and
//!   awaited alongside every poll sleep

mod token;

pub use token::CancellationToken;
