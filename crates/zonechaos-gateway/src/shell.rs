//! ---
//! zc_section: "05-networking-external-interfaces"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Control-plane gateway and command execution."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{CommandOutput, ControlPlane, GatewayError};

const DEFAULT_SHELL: &str = "sh";
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Gateway that runs each command through `<shell> -c`.
///
/// The child is killed when the per-call timeout elapses, so a hung CLI can
/// no longer block an experiment forever.
#[derive(Debug)]
pub struct ShellGateway {
    shell: String,
    call_timeout: Duration,
    counter: AtomicU64,
}

impl ShellGateway {
    /// Build a gateway with an explicit shell and per-call timeout.
    pub fn new(shell: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            call_timeout,
            counter: AtomicU64::new(0),
        }
    }

    /// Per-call timeout applied to every command.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

impl Default for ShellGateway {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL, DEFAULT_CALL_TIMEOUT)
    }
}

#[async_trait]
impl ControlPlane for ShellGateway {
    async fn execute(&self, command: &str) -> Result<CommandOutput, GatewayError> {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        info!(
            target: "zonechaos::gateway::shell",
            id,
            command,
            "running control-plane command"
        );

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| GatewayError::Spawn {
                command: command.to_owned(),
                message: err.to_string(),
            })?;

        let output = match timeout(self.call_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(GatewayError::Spawn {
                    command: command.to_owned(),
                    message: err.to_string(),
                })
            }
            Err(_) => {
                warn!(
                    target: "zonechaos::gateway::shell",
                    id,
                    command,
                    timeout_secs = self.call_timeout.as_secs(),
                    "control-plane command timed out; process killed"
                );
                return Err(GatewayError::Timeout {
                    command: command.to_owned(),
                    timeout: self.call_timeout,
                });
            }
        };

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        };

        if result.is_success() {
            debug!(
                target: "zonechaos::gateway::shell",
                id,
                status = result.status,
                stdout = %result.stdout.trim(),
                "control-plane command finished"
            );
        } else {
            warn!(
                target: "zonechaos::gateway::shell",
                id,
                status = result.status,
                stderr = %result.stderr.trim(),
                "control-plane command failed"
            );
        }
        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_status() {
        let gateway = ShellGateway::default();
        let output = gateway.execute("echo zone-1; exit 3").await.unwrap();
        assert_eq!(output.trimmed(), "zone-1");
        assert_eq!(output.status, 3);
        assert!(!output.is_success());
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let gateway = ShellGateway::new("sh", Duration::from_millis(50));
        let err = gateway.execute("sleep 5").await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }));
    }
}
