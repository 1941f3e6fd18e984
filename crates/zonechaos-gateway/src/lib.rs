//! ---
//! zc_section: "05-networking-external-interfaces"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Control-plane gateway and command execution."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Thin execution layer between experiments and the external control plane.
//!
//! Every call is independent: the gateway never holds a session, never parses
//! output and never retries on its own. Retrying idempotent queries is opt-in
//! through [`retry::execute_idempotent`].
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub mod fakes;
pub mod probe;
pub mod retry;
pub mod shell;

pub use fakes::{RecordedCall, ScriptedGateway};
pub use probe::{missing_tools, probe, Tool};
pub use retry::{execute_idempotent, RetryPolicy};
pub use shell::ShellGateway;

/// Captured result of a single control-plane command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Standard output as UTF-8 (lossy).
    pub stdout: String,
    /// Standard error as UTF-8 (lossy).
    pub stderr: String,
    /// Exit status; `-1` when the process was terminated by a signal.
    pub status: i32,
}

impl CommandOutput {
    /// Successful output carrying the provided stdout.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: 0,
        }
    }

    /// Failed output with the provided status and stderr.
    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status,
        }
    }

    /// Whether the command exited with status zero.
    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    /// Stdout with surrounding whitespace removed.
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Non-empty, trimmed stdout lines (tab/newline separated CLI output).
    pub fn lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Best diagnostic text for log lines: stderr when present, stdout otherwise.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Transport-level failures. A non-zero exit status is *not* an error.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The command could not be started or its output could not be collected.
    #[error("failed to execute [{command}]: {message}")]
    Spawn {
        /// Command line that was attempted.
        command: String,
        /// Underlying I/O error rendered as text.
        message: String,
    },
    /// The command exceeded the per-call timeout and was killed.
    #[error("command [{command}] timed out after {}s", timeout.as_secs())]
    Timeout {
        /// Command line that was attempted.
        command: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },
}

/// Executes opaque command lines against the external control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Run `command` once and return its captured output.
    async fn execute(&self, command: &str) -> Result<CommandOutput, GatewayError>;
}

/// Shared handle used across experiments.
pub type SharedControlPlane = Arc<dyn ControlPlane>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_skip_blank_entries() {
        let output = CommandOutput::success("aks-a-1\n\n  aks-a-2 \n");
        assert_eq!(output.lines(), vec!["aks-a-1", "aks-a-2"]);
    }

    #[test]
    fn diagnostic_prefers_stderr() {
        let mut output = CommandOutput::failure(1, "  ResourceNotFound ");
        output.stdout = "ignored".into();
        assert_eq!(output.diagnostic(), "ResourceNotFound");
        assert_eq!(CommandOutput::success(" ok ").diagnostic(), "ok");
    }
}
