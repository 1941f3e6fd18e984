//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Hold & rollback: keep reversible faults active for the configured time,
//! then undo each of them exactly once.
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::client::ControlPlaneClient;
use crate::drivers::FaultDriver;
use crate::error::ExperimentError;
use crate::fault::InjectedFault;

/// A rollback or release step that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackFailure {
    /// Fault id or supporting-resource key.
    pub subject: String,
    pub resources: Vec<String>,
    pub error: ExperimentError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoldReport {
    pub held_for: Duration,
    pub attempted: usize,
    pub rolled_back: usize,
    pub failures: Vec<RollbackFailure>,
}

pub struct HoldController<'a, D: FaultDriver> {
    driver: &'a D,
    client: &'a ControlPlaneClient,
}

impl<'a, D: FaultDriver> HoldController<'a, D> {
    pub fn new(driver: &'a D, client: &'a ControlPlaneClient) -> Self {
        Self { driver, client }
    }

    /// Hold for `hold` when any reversible fault is active, then roll each
    /// such fault back once. `None` skips the wait and rolls back immediately.
    pub async fn hold_and_rollback(
        &self,
        hold: Option<Duration>,
        faults: &mut [InjectedFault<D::Handle>],
    ) -> HoldReport {
        let pending = faults.iter().filter(|fault| fault.needs_rollback()).count();
        let mut report = HoldReport::default();
        if pending == 0 {
            debug!(
                target: "zonechaos::core::hold",
                kind = %self.driver.kind(),
                "no reversible fault is active; not holding"
            );
            return report;
        }

        if let Some(duration) = hold {
            info!(
                target: "zonechaos::core::hold",
                kind = %self.driver.kind(),
                seconds = duration.as_secs(),
                faults = pending,
                "fault active; holding"
            );
            let started = Instant::now();
            tokio::time::sleep(duration).await;
            report.held_for = started.elapsed();
        }

        for fault in faults.iter_mut().filter(|fault| fault.needs_rollback()) {
            report.attempted += 1;
            fault.advance(InjectedFault::begin_rollback);
            match self.driver.rollback(self.client, fault).await {
                Ok(()) => {
                    fault.advance(InjectedFault::complete_rollback);
                    report.rolled_back += 1;
                }
                Err(err) => {
                    fault.advance(InjectedFault::fail);
                    error!(
                        target: "zonechaos::core::hold",
                        kind = %fault.kind(),
                        fault_id = %fault.id(),
                        resources = ?fault.resources(),
                        error = %err,
                        "rollback failed; the environment needs manual intervention"
                    );
                    report.failures.push(RollbackFailure {
                        subject: fault.id().to_string(),
                        resources: fault.resources().to_vec(),
                        error: err,
                    });
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use zonechaos_gateway::{CommandOutput, RetryPolicy, ScriptedGateway};

    use super::*;
    use crate::drivers::network_deny::DenyRule;
    use crate::drivers::NetworkDenyDriver;
    use crate::fault::{FaultKind, FaultState};

    fn active_rule(name: &str) -> InjectedFault<DenyRule> {
        let mut fault = InjectedFault::begin(
            FaultKind::NetworkDeny,
            true,
            DenyRule {
                nsg: "nsg".into(),
                rule: name.into(),
                adopted: false,
            },
        );
        fault.activate().unwrap();
        fault
    }

    fn setup() -> (Arc<ScriptedGateway>, ControlPlaneClient, NetworkDenyDriver) {
        let gateway = Arc::new(ScriptedGateway::new());
        let client = ControlPlaneClient::new(gateway.clone(), RetryPolicy::single_attempt());
        let driver =
            NetworkDenyDriver::new("rg", "vnet", "SubnetA", "SubnetB", Duration::from_secs(30));
        (gateway, client, driver)
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_waits_for_the_full_hold() {
        let (gateway, client, driver) = setup();
        let mut faults = vec![active_rule("r1")];
        let start = Instant::now();

        let report = HoldController::new(&driver, &client)
            .hold_and_rollback(Some(Duration::from_secs(30)), &mut faults)
            .await;

        let call = gateway.first_call("nsg rule delete").unwrap();
        assert!(call.at - start >= Duration::from_secs(30));
        assert!(report.held_for >= Duration::from_secs(30));
        assert!(report.held_for < Duration::from_secs(31));
        assert_eq!(report.rolled_back, 1);
        assert_eq!(faults[0].state(), FaultState::RolledBack);
    }

    #[tokio::test(start_paused = true)]
    async fn each_fault_is_attempted_once_even_after_failures() {
        let (gateway, client, driver) = setup();
        gateway.on("--name r1", CommandOutput::failure(1, "Conflict"));
        let mut faults = vec![active_rule("r1"), active_rule("r2")];

        let report = HoldController::new(&driver, &client)
            .hold_and_rollback(None, &mut faults)
            .await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error, ExperimentError::Rollback(_)));
        assert_eq!(faults[0].state(), FaultState::Failed);
        assert_eq!(faults[1].state(), FaultState::RolledBack);
        assert_eq!(gateway.count_matching("nsg rule delete"), 2);
        assert_eq!(report.held_for, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_active_means_no_hold() {
        let (gateway, client, driver) = setup();
        let mut faults: Vec<InjectedFault<DenyRule>> = Vec::new();
        let start = Instant::now();
        let report = HoldController::new(&driver, &client)
            .hold_and_rollback(Some(Duration::from_secs(30)), &mut faults)
            .await;
        assert_eq!(report, HoldReport::default());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(gateway.calls().is_empty());
    }
}
