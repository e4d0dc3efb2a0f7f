//! Configuration types.
//!
//! Every struct deserializes from partial JSON: missing fields take their
//! defaults. [`ToolrunConfig`] aggregates them and can overlay environment
//! variables on top of a file.

use crate::engine::PollStrategy;
use crate::errors::ToolrunError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`HttpServiceConfig::api_key`].
pub const ENV_API_KEY: &str = "TOOLRUN_API_KEY";
/// Environment variable overriding [`HttpServiceConfig::base_url`].
pub const ENV_BASE_URL: &str = "TOOLRUN_BASE_URL";
/// Environment variable overriding [`EngineConfig::assistant_id`].
pub const ENV_ASSISTANT_ID: &str = "TOOLRUN_ASSISTANT_ID";
/// Environment variable overriding the fixed poll interval, in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "TOOLRUN_POLL_INTERVAL_MS";

/// Run engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The assistant every run is created against.
    #[serde(default)]
    pub assistant_id: String,
    /// How long to wait between status polls.
    #[serde(default)]
    pub poll: PollStrategy,
    /// Dispatch a requires-action batch concurrently instead of one by one.
    #[serde(default)]
    pub parallel_tool_calls: bool,
    /// Message recorded when a run is cancelled locally.
    #[serde(default = "default_cancel_notice")]
    pub cancel_notice: String,
    /// After a rate-limit backoff, start a fresh run on the same thread.
    #[serde(default = "default_recreate_run")]
    pub recreate_run_on_rate_limit: bool,
}

fn default_cancel_notice() -> String {
    "Run cancelled by user.".to_string()
}

fn default_recreate_run() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assistant_id: String::new(),
            poll: PollStrategy::default(),
            parallel_tool_calls: false,
            cancel_notice: default_cancel_notice(),
            recreate_run_on_rate_limit: default_recreate_run(),
        }
    }
}

impl EngineConfig {
    /// Creates a config for an assistant.
    #[must_use]
    pub fn new(assistant_id: impl Into<String>) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            ..Self::default()
        }
    }

    /// Sets the poll strategy.
    #[must_use]
    pub fn with_poll(mut self, poll: PollStrategy) -> Self {
        self.poll = poll;
        self
    }

    /// Uses a fixed poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll = PollStrategy::fixed(interval);
        self
    }

    /// Enables or disables concurrent tool dispatch.
    #[must_use]
    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    /// Sets the cancellation notice.
    #[must_use]
    pub fn with_cancel_notice(mut self, notice: impl Into<String>) -> Self {
        self.cancel_notice = notice.into();
        self
    }

    /// Controls whether a rate-limited run is recreated after backoff.
    #[must_use]
    pub fn with_recreate_run_on_rate_limit(mut self, recreate: bool) -> Self {
        self.recreate_run_on_rate_limit = recreate;
        self
    }
}

/// Settings for running script tool bodies in a child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter executable.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Arguments placed before the script body.
    #[serde(default = "default_interpreter_args")]
    pub interpreter_args: Vec<String>,
    /// Working directory of the child; inherits the parent's when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Wall-clock limit per invocation.
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_seconds: f64,
    /// Stdout beyond this many bytes is dropped.
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
    /// Environment variables passed through; everything else is cleared.
    #[serde(default = "default_allowed_env")]
    pub allowed_env: Vec<String>,
}

fn default_interpreter() -> String {
    "sh".to_string()
}

fn default_interpreter_args() -> Vec<String> {
    vec!["-c".to_string()]
}

fn default_sandbox_timeout() -> f64 {
    30.0
}

fn default_max_output() -> usize {
    1024 * 1024 // 1MiB
}

fn default_allowed_env() -> Vec<String> {
    vec!["PATH".to_string()]
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            interpreter_args: default_interpreter_args(),
            working_dir: None,
            timeout_seconds: default_sandbox_timeout(),
            max_output_bytes: default_max_output(),
            allowed_env: default_allowed_env(),
        }
    }
}

impl SandboxConfig {
    /// Creates the default sandbox configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interpreter and its leading arguments.
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>, args: Vec<String>) -> Self {
        self.interpreter = interpreter.into();
        self.interpreter_args = args;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the stdout cap.
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds.max(0.0))
    }
}

/// Settings for the HTTP reasoning-service client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServiceConfig {
    /// API root, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token.
    #[serde(default)]
    pub api_key: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: f64,
    /// Value of the `OpenAI-Beta` header, if any.
    #[serde(default = "default_beta_header")]
    pub beta_header: Option<String>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_http_timeout() -> f64 {
    60.0
}

#[allow(clippy::unnecessary_wraps)]
fn default_beta_header() -> Option<String> {
    Some("assistants=v2".to_string())
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_seconds: default_http_timeout(),
            beta_header: default_beta_header(),
        }
    }
}

impl HttpServiceConfig {
    /// Creates a config with an API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds.max(0.0))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolrunConfig {
    /// Run engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Script sandbox settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// HTTP client settings.
    #[serde(default)]
    pub service: HttpServiceConfig,
    /// Directory holding tool definition files, if any.
    #[serde(default)]
    pub tools_dir: Option<PathBuf>,
}

impl ToolrunConfig {
    /// Parses a JSON config string.
    pub fn from_json(json: &str) -> Result<Self, ToolrunError> {
        serde_json::from_str(json).map_err(|e| ToolrunError::Config(e.to_string()))
    }

    /// Loads a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ToolrunError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    /// Overlays `TOOLRUN_*` environment variables.
    pub fn apply_env(self) -> Result<Self, ToolrunError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlays variables from an arbitrary lookup.
    pub fn apply_vars<F>(mut self, lookup: F) -> Result<Self, ToolrunError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_API_KEY) {
            self.service.api_key = key;
        }
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.service = self.service.with_base_url(url);
        }
        if let Some(id) = lookup(ENV_ASSISTANT_ID) {
            self.engine.assistant_id = id;
        }
        if let Some(ms) = lookup(ENV_POLL_INTERVAL_MS) {
            let ms: u64 = ms.trim().parse().map_err(|_| {
                ToolrunError::Config(format!("{ENV_POLL_INTERVAL_MS} must be an integer, got '{ms}'"))
            })?;
            self.engine.poll = PollStrategy::fixed(Duration::from_millis(ms));
        }
        Ok(self)
    }
}
