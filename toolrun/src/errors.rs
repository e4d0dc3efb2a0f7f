//! Error types for the toolrun crate.
//!
//! Each subsystem has its own error enum; [`ToolrunError`] wraps them all for
//! callers that only want a single type to propagate.

use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// The main error type for toolrun operations.
#[derive(Debug, Error)]
pub enum ToolrunError {
    /// A registry operation was declined.
    #[error("{0}")]
    Registry(#[from] RegistryError),

    /// A tool invocation failed.
    #[error("{0}")]
    Tool(#[from] ToolError),

    /// The reasoning service returned an error.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// Persisting or loading tool records failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The run engine hit an unrecoverable error.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// A session operation was rejected.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a registry mutation is declined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A live tool with this name already exists.
    #[error("Tool already exists: {name}")]
    AlreadyExists {
        /// The tool name.
        name: String,
    },

    /// No live tool with this name exists.
    #[error("Tool not found: {name}")]
    NotFound {
        /// The tool name.
        name: String,
    },

    /// The requested version is not in the tool's history.
    #[error("Version {version} not found in history of tool {name}")]
    VersionNotFound {
        /// The tool name.
        name: String,
        /// The requested version.
        version: String,
    },

    /// A version string could not be parsed.
    #[error("Invalid version '{version}': expected MAJOR.MINOR.PATCH")]
    InvalidVersion {
        /// The offending input.
        version: String,
    },

    /// The tool's patch component cannot be incremented any further.
    #[error("Tool {name} is at version {version} and cannot be bumped")]
    VersionExhausted {
        /// The tool name.
        name: String,
        /// The current version.
        version: String,
    },
}

impl RegistryError {
    /// Creates an already-exists error.
    #[must_use]
    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a version-exhausted error.
    #[must_use]
    pub fn version_exhausted(name: impl Into<String>, version: impl ToString) -> Self {
        Self::VersionExhausted {
            name: name.into(),
            version: version.to_string(),
        }
    }

    /// Creates a version-not-found error.
    #[must_use]
    pub fn version_not_found(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::VersionNotFound {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Errors related to tool invocation.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// No callable is bound to this name.
    #[error("{name} is not available.")]
    NotAvailable {
        /// The tool name.
        name: String,
    },

    /// The call arguments were not valid JSON.
    #[error("Invalid arguments for tool {name}: {reason}")]
    InvalidArguments {
        /// The tool name.
        name: String,
        /// The parse failure.
        reason: String,
    },

    /// The tool body returned an error.
    #[error("Tool execution failed: {name} - {reason}")]
    ExecutionFailed {
        /// The tool name.
        name: String,
        /// The reason for failure.
        reason: String,
    },

    /// The tool body did not finish in time.
    #[error("Tool timed out: {name} after {timeout_seconds}s")]
    Timeout {
        /// The tool name.
        name: String,
        /// The timeout in seconds.
        timeout_seconds: f64,
    },

    /// The sandbox refused or failed to start the tool process.
    #[error("Sandbox error for tool {name}: {reason}")]
    Sandbox {
        /// The tool name.
        name: String,
        /// What went wrong.
        reason: String,
    },
}

impl ToolError {
    /// Creates a not-available error.
    #[must_use]
    pub fn not_available(name: impl Into<String>) -> Self {
        Self::NotAvailable { name: name.into() }
    }

    /// Creates an invalid-arguments error.
    #[must_use]
    pub fn invalid_arguments(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an execution failed error.
    #[must_use]
    pub fn execution_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(name: impl Into<String>, timeout_seconds: f64) -> Self {
        Self::Timeout {
            name: name.into(),
            timeout_seconds,
        }
    }

    /// Creates a sandbox error.
    #[must_use]
    pub fn sandbox(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Sandbox {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// The tool name this error refers to.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        match self {
            Self::NotAvailable { name }
            | Self::InvalidArguments { name, .. }
            | Self::ExecutionFailed { name, .. }
            | Self::Timeout { name, .. }
            | Self::Sandbox { name, .. } => name,
        }
    }

    /// The bare failure message, without the tool name prefix.
    ///
    /// This is what ends up after `error: ` in a tool-call output.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::NotAvailable { .. } => self.to_string(),
            Self::InvalidArguments { reason, .. }
            | Self::ExecutionFailed { reason, .. }
            | Self::Sandbox { reason, .. } => reason.clone(),
            Self::Timeout { timeout_seconds, .. } => {
                format!("timed out after {timeout_seconds}s")
            }
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        let kind = match self {
            Self::NotAvailable { .. } => "ToolNotAvailable",
            Self::InvalidArguments { .. } => "ToolInvalidArguments",
            Self::ExecutionFailed { .. } => "ToolExecutionError",
            Self::Timeout { .. } => "ToolTimeout",
            Self::Sandbox { .. } => "ToolSandboxError",
        };
        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("name".to_string(), serde_json::json!(self.tool_name()));
        map.insert("reason".to_string(), serde_json::json!(self.reason()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors returned by a reasoning service client.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The request never reached the service.
    #[error("Network error: {0}")]
    Network(String),

    /// The service answered with a non-success status.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// The service throttled the request itself (HTTP 429).
    #[error("Rate limited by the reasoning service")]
    RateLimited,

    /// The response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A required field was missing in a response.
    #[error("Missing field in response: {0}")]
    MissingField(String),
}

impl ServiceError {
    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        let kind = match self {
            Self::Network(_) => "ServiceNetworkError",
            Self::Api { status, .. } => {
                map.insert("status".to_string(), serde_json::json!(status));
                "ServiceApiError"
            }
            Self::RateLimited => "ServiceRateLimited",
            Self::Decode(_) => "ServiceDecodeError",
            Self::MissingField(_) => "ServiceMissingField",
        };
        map.insert("type".to_string(), serde_json::json!(kind));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors raised by tool stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("Store IO error at {path}: {source}")]
    Io {
        /// The path involved.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A record or definition could not be (de)serialized.
    #[error("Store serialization error: {0}")]
    Serialization(String),

    /// A definition file is structurally invalid.
    #[error("Invalid tool definition in {path}: {reason}")]
    InvalidDefinition {
        /// The file path.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The filesystem watcher could not be started.
    #[error("Watch error: {0}")]
    Watch(String),
}

impl StoreError {
    /// Creates an IO error bound to a path.
    #[must_use]
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors that stop a run engine turn.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A reasoning-service call failed.
    #[error("Reasoning service call '{operation}' failed: {source}")]
    Service {
        /// Which call failed.
        operation: &'static str,
        /// The underlying error.
        #[source]
        source: ServiceError,
    },

    /// The engine was asked to do something its state does not allow.
    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    /// Any other unexpected condition.
    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Wraps a service error with the name of the failing call.
    #[must_use]
    pub fn service(operation: &'static str, source: ServiceError) -> Self {
        Self::Service { operation, source }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        match self {
            Self::Service { operation, source } => {
                map.insert("type".to_string(), serde_json::json!("EngineServiceError"));
                map.insert("operation".to_string(), serde_json::json!(operation));
                let inner: serde_json::Map<String, serde_json::Value> =
                    source.to_dict().into_iter().collect();
                map.insert("source".to_string(), serde_json::Value::Object(inner));
            }
            Self::InvalidState(_) => {
                map.insert("type".to_string(), serde_json::json!("EngineInvalidState"));
            }
            Self::Internal(_) => {
                map.insert("type".to_string(), serde_json::json!("EngineInternalError"));
            }
        }
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Errors returned by the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No session has this id.
    #[error("Session not found: {0}")]
    NotFound(Uuid),

    /// No session is active.
    #[error("No active session")]
    NoActiveSession,

    /// The session already has a turn in flight.
    #[error("Session {0} is busy")]
    Busy(Uuid),

    /// The spawned turn panicked or was aborted.
    #[error("Session task failed: {0}")]
    TaskFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_to_dict() {
        let err = ToolError::execution_failed("my_tool", "boom");
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "ToolExecutionError");
        assert_eq!(dict.get("name").unwrap(), "my_tool");
        assert_eq!(dict.get("reason").unwrap(), "boom");
    }

    #[test]
    fn test_not_available_message() {
        let err = ToolError::not_available("list_files");
        assert_eq!(err.to_string(), "list_files is not available.");
        assert_eq!(err.reason(), "list_files is not available.");
    }

    #[test]
    fn test_timeout_reason() {
        let err = ToolError::timeout("slow", 2.5);
        assert_eq!(err.reason(), "timed out after 2.5s");
        assert_eq!(err.tool_name(), "slow");
    }

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::version_not_found("t", "9.9.9");
        assert_eq!(err.to_string(), "Version 9.9.9 not found in history of tool t");
    }

    #[test]
    fn test_engine_error_to_dict_nests_service_error() {
        let err = EngineError::service(
            "create_run",
            ServiceError::Api {
                status: 500,
                message: "oops".to_string(),
            },
        );
        let dict = err.to_dict();

        assert_eq!(dict.get("type").unwrap(), "EngineServiceError");
        assert_eq!(dict.get("operation").unwrap(), "create_run");
        assert_eq!(dict["source"]["status"], 500);
    }

    #[test]
    fn test_toolrun_error_from_registry() {
        let err: ToolrunError = RegistryError::not_found("x").into();
        assert!(matches!(err, ToolrunError::Registry(_)));
        assert_eq!(err.to_string(), "Tool not found: x");
    }

    #[test]
    fn test_session_error_display() {
        let id = Uuid::nil();
        let err: ToolrunError = SessionError::Busy(id).into();
        assert_eq!(
            err.to_string(),
            "Session 00000000-0000-0000-0000-000000000000 is busy"
        );
    }
}
