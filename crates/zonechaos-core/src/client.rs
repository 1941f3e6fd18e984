//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use zonechaos_common::GatewayConfig;
use zonechaos_gateway::{
    execute_idempotent, CommandOutput, ControlPlane, GatewayError, RetryPolicy, SharedControlPlane,
    ShellGateway,
};

/// Control-plane access split by call semantics.
///
/// `query` is for read-only discovery and goes through the retry policy;
/// `mutate` is for anything that changes the environment and runs exactly once.
#[derive(Clone)]
pub struct ControlPlaneClient {
    plane: SharedControlPlane,
    retry: RetryPolicy,
}

impl ControlPlaneClient {
    pub fn new(plane: SharedControlPlane, retry: RetryPolicy) -> Self {
        Self { plane, retry }
    }

    /// Build the production client (shell gateway) from configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let plane: SharedControlPlane =
            Arc::new(ShellGateway::new(config.shell.clone(), config.call_timeout));
        let retry = RetryPolicy::new(
            config.retry.max_attempts,
            Duration::from_millis(config.retry.base_delay_ms),
            Duration::from_millis(config.retry.jitter_ms),
        );
        Self::new(plane, retry)
    }

    pub fn plane(&self) -> &dyn ControlPlane {
        self.plane.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Idempotent read; retried on transport errors and non-zero status.
    pub async fn query(&self, command: &str) -> Result<CommandOutput, GatewayError> {
        execute_idempotent(self.plane.as_ref(), command, &self.retry).await
    }

    /// Read whose failure is meaningful on its own (e.g. "does X exist?").
    pub async fn probe(&self, command: &str) -> Result<CommandOutput, GatewayError> {
        self.plane.execute(command).await
    }

    /// Destructive or creating call; never retried.
    pub async fn mutate(&self, command: &str) -> Result<CommandOutput, GatewayError> {
        self.plane.execute(command).await
    }
}

impl std::fmt::Debug for ControlPlaneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlaneClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
