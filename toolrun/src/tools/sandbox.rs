//! Child-process sandbox for script tool bodies.
//!
//! Script sources are never evaluated in-process. Each invocation spawns the
//! configured interpreter with the script body as its program, a cleared
//! environment (only allow-listed variables pass through), the call
//! parameters as JSON on stdin, and a hard wall-clock timeout. The child is
//! killed if the timeout fires or the invoking future is dropped.

use crate::config::SandboxConfig;
use crate::errors::ToolError;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variable carrying the invoked tool name into the child.
pub const TOOL_NAME_ENV: &str = "TOOLRUN_TOOL";

/// Runs script bodies as isolated child processes.
#[derive(Debug, Clone, Default)]
pub struct ScriptSandbox {
    config: SandboxConfig,
}

impl ScriptSandbox {
    /// Creates a sandbox.
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Runs `body` for tool `tool` with `params` on stdin.
    ///
    /// Stdout is parsed as JSON when possible and returned as a JSON string
    /// otherwise. A non-zero exit status is an execution failure carrying
    /// the child's stderr.
    pub async fn run(
        &self,
        tool: &str,
        body: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let mut cmd = Command::new(&self.config.interpreter);
        cmd.args(&self.config.interpreter_args)
            .arg(body)
            .env_clear()
            .env(TOOL_NAME_ENV, tool)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for key in &self.config.allowed_env {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ToolError::sandbox(
                tool,
                format!("failed to spawn {}: {e}", self.config.interpreter),
            )
        })?;

        let stdin = child.stdin.take();
        let input = params.to_string();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // Scripts that ignore stdin may exit before reading it.
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(tool, error = %e, "Script did not consume its input");
                }
            }
        };

        // Stdin is fed and output drained under one deadline.
        let exchange = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };
        let output = match tokio::time::timeout(self.config.timeout(), exchange).await {
            Ok(result) => result.map_err(|e| ToolError::sandbox(tool, e.to_string()))?,
            Err(_) => {
                warn!(tool, timeout_seconds = self.config.timeout_seconds, "Script timed out");
                return Err(ToolError::timeout(tool, self.config.timeout_seconds));
            }
        };

        if !output.status.success() {
            let stderr = truncate_lossy(&output.stderr, self.config.max_output_bytes);
            let stderr = stderr.trim();
            let reason = if stderr.is_empty() {
                format!("script exited with {}", output.status)
            } else {
                stderr.to_string()
            };
            return Err(ToolError::execution_failed(tool, reason));
        }

        if output.stdout.len() > self.config.max_output_bytes {
            warn!(
                tool,
                bytes = output.stdout.len(),
                limit = self.config.max_output_bytes,
                "Script output truncated"
            );
        }
        let stdout = truncate_lossy(&output.stdout, self.config.max_output_bytes);
        let stdout = stdout.trim();

        Ok(serde_json::from_str(stdout)
            .unwrap_or_else(|_| serde_json::Value::String(stdout.to_string())))
    }
}

fn truncate_lossy(bytes: &[u8], limit: usize) -> String {
    let end = bytes.len().min(limit);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
