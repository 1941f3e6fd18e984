//! ---
//! zc_section: "05-networking-external-interfaces"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Control-plane gateway and command execution."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{CommandOutput, ControlPlane, GatewayError};

/// Bounded retry schedule for idempotent control-plane queries.
///
/// Destructive commands must never go through this path: a retried delete or
/// create could apply a fault twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: usize,
    /// Base delay applied before the second attempt (exponential backoff).
    pub base_delay: Duration,
    /// Maximum jitter added on top of each delay.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Construct a policy; at least one attempt is always made.
    pub fn new(max_attempts: usize, base_delay: Duration, jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter,
        }
    }

    /// Policy that issues every query exactly once.
    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the attempt following `attempt` (1-indexed).
    pub fn backoff_delay<R: Rng + ?Sized>(&self, attempt: usize, rng: &mut R) -> Duration {
        let exponent = (attempt.saturating_sub(1) as u32).min(8);
        let base = self.base_delay.mul_f64(2u32.pow(exponent) as f64);
        if self.jitter.is_zero() {
            base
        } else {
            let jitter_ms = rng.gen_range(0..=self.jitter.as_millis().max(1)) as u64;
            base + Duration::from_millis(jitter_ms)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_millis(100))
    }
}

/// Execute a read-only query, retrying transport errors and non-zero exits.
///
/// Returns the last observed result once attempts are exhausted, so callers
/// keep seeing the real status and diagnostics.
pub async fn execute_idempotent(
    plane: &dyn ControlPlane,
    command: &str,
    policy: &RetryPolicy,
) -> Result<CommandOutput, GatewayError> {
    let mut attempt = 1;
    loop {
        let result = plane.execute(command).await;
        let retryable = match &result {
            Ok(output) => !output.is_success(),
            Err(_) => true,
        };
        if !retryable {
            if attempt > 1 {
                debug!(
                    target: "zonechaos::gateway::retry",
                    command,
                    attempt,
                    "query succeeded after retry"
                );
            }
            return result;
        }
        if attempt >= policy.max_attempts {
            return result;
        }

        let delay = policy.backoff_delay(attempt, &mut rand::thread_rng());
        warn!(
            target: "zonechaos::gateway::retry",
            command,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "query failed; retrying"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedGateway;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), Duration::ZERO);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(policy.backoff_delay(1, &mut rng), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2, &mut rng), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3, &mut rng), Duration::from_millis(400));
    }

    #[test]
    fn zero_attempts_are_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let gateway = ScriptedGateway::new();
        gateway.on_sequence(
            "az aks show",
            vec![
                CommandOutput::failure(1, "throttled"),
                CommandOutput::success("MC_rg_cluster\n"),
            ],
        );
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::ZERO);
        let output = execute_idempotent(&gateway, "az aks show -n c", &policy)
            .await
            .unwrap();
        assert_eq!(output.trimmed(), "MC_rg_cluster");
        assert_eq!(gateway.count_matching("az aks show"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded() {
        let gateway = ScriptedGateway::new();
        gateway.on("az vmss list", CommandOutput::failure(2, "boom"));
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::ZERO);
        let output = execute_idempotent(&gateway, "az vmss list", &policy)
            .await
            .unwrap();
        assert_eq!(output.status, 2);
        assert_eq!(gateway.count_matching("az vmss list"), 3);
    }
}
