//! Concurrent conversation sessions.
//!
//! A [`SessionManager`] owns one [`RunEngine`](crate::engine::RunEngine) per
//! session and routes interactive input to the active one. Turns run on
//! spawned tasks, so background sessions keep polling while another session
//! is in the foreground.

mod manager;

pub use manager::{SessionInfo, SessionManager};
