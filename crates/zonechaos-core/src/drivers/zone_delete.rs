//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Zone outage: delete every node-pool instance located in one zone.
use async_trait::async_trait;
use tracing::{info, warn};
use zonechaos_gateway::Tool;

use super::{mutate_checked, FaultDriver, Injection};
use crate::client::ControlPlaneClient;
use crate::commands::{az, is_identifier};
use crate::error::{ExperimentError, PipelineStage};
use crate::fault::{FaultKind, InjectedFault};
use crate::ownership::OwnershipTracker;
use crate::target::{ExperimentTarget, TargetSelector};
use crate::topology::{self, ZoneTopology};

/// Machines deleted from one node pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDeletion {
    pub pool: String,
    pub machines: Vec<String>,
    pub autoscaling: bool,
}

#[derive(Debug, Clone)]
pub struct ZoneDeleteDriver {
    target: ExperimentTarget,
}

impl ZoneDeleteDriver {
    pub fn new(
        resource_group: impl Into<String>,
        cluster: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            target: ExperimentTarget::zone(resource_group, cluster, zone),
        }
    }

    fn zone(&self) -> &str {
        match self.target.selector() {
            TargetSelector::Zone { zone } => zone,
            _ => "",
        }
    }
}

#[async_trait]
impl FaultDriver for ZoneDeleteDriver {
    type Topology = ZoneTopology;
    type Handle = PoolDeletion;

    fn kind(&self) -> FaultKind {
        FaultKind::ZoneDelete
    }

    fn target(&self) -> &ExperimentTarget {
        &self.target
    }

    fn required_tools(&self) -> &'static [Tool] {
        &[Tool::AzureCli]
    }

    fn validate(&self) -> Result<(), ExperimentError> {
        if self.target.resource().trim().is_empty() {
            return Err(ExperimentError::Preflight("cluster name is empty".into()));
        }
        if self.zone().trim().is_empty() {
            return Err(ExperimentError::Preflight("target zone is empty".into()));
        }
        if !is_identifier(self.zone()) {
            return Err(ExperimentError::Preflight(format!(
                "target zone '{}' must be a zone number or name",
                self.zone()
            )));
        }
        Ok(())
    }

    async fn discover(&self, client: &ControlPlaneClient) -> Result<ZoneTopology, ExperimentError> {
        topology::discover_zone_instances(
            client,
            self.target.resource_group(),
            self.target.resource(),
            self.zone(),
        )
        .await
    }

    async fn inject(
        &self,
        client: &ControlPlaneClient,
        _tracker: &mut OwnershipTracker,
        topology: &ZoneTopology,
    ) -> Injection<PoolDeletion> {
        let cluster = self.target.resource();
        let zone = self.zone();
        let mut injection = Injection::new();

        for pool in &topology.pools {
            if pool.machines.is_empty() {
                warn!(
                    target: "zonechaos::core::drivers::zone_delete",
                    pool = %pool.name,
                    zone,
                    "no instances found in zone for node pool"
                );
                injection.warn(format!(
                    "no instances found in zone {zone} for node pool '{}'",
                    pool.name
                ));
                continue;
            }

            info!(
                target: "zonechaos::core::drivers::zone_delete",
                pool = %pool.name,
                zone,
                cluster,
                count = pool.machines.len(),
                "deleting instances"
            );
            let mut fault = InjectedFault::begin(
                FaultKind::ZoneDelete,
                false,
                PoolDeletion {
                    pool: pool.name.clone(),
                    machines: pool.machines.clone(),
                    autoscaling: pool.autoscaling,
                },
            );
            for machine in &pool.machines {
                fault.touch(format!("{}/{machine}", pool.name));
            }

            let command = az::aks_delete_machines(
                self.target.resource_group(),
                cluster,
                &pool.name,
                &pool.machines,
            );
            let deleted = mutate_checked(
                client,
                &command,
                PipelineStage::Injection,
                &format!("delete machines in node pool '{}'", pool.name),
            )
            .await;
            if let Err(err) = deleted {
                fault.advance(InjectedFault::fail);
                injection.faults.push(fault);
                return injection.abort(err);
            }
            fault.advance(InjectedFault::activate);

            if pool.autoscaling {
                info!(
                    target: "zonechaos::core::drivers::zone_delete",
                    pool = %pool.name,
                    cluster,
                    "machines deleted; autoscaling is enabled, so replacement is automatic"
                );
            } else {
                warn!(
                    target: "zonechaos::core::drivers::zone_delete",
                    pool = %pool.name,
                    cluster,
                    "machines deleted; autoscaling is disabled, scale the node pool manually to restore capacity"
                );
                injection.warn(format!(
                    "node pool '{}' has autoscaling disabled; capacity must be restored manually",
                    pool.name
                ));
            }
            injection.faults.push(fault);
        }

        if topology.machine_count() == 0 {
            warn!(
                target: "zonechaos::core::drivers::zone_delete",
                zone,
                cluster,
                "no instances found in zone; nothing to delete"
            );
            injection.warn(format!("no instances found in zone {zone}; nothing was deleted"));
        }
        injection
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use zonechaos_gateway::{CommandOutput, RetryPolicy, ScriptedGateway};

    use super::*;

    fn topology(pools: Vec<(&str, Vec<&str>)>) -> ZoneTopology {
        ZoneTopology {
            snapshot: Default::default(),
            node_resource_group: "MC_rg".into(),
            zone: "1".into(),
            pools: pools
                .into_iter()
                .map(|(name, machines)| topology::ZonePool {
                    name: name.into(),
                    autoscaling: true,
                    machines: machines.into_iter().map(String::from).collect(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn failed_deletion_keeps_earlier_pools_active() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on(
            "--nodepool-name poolb",
            CommandOutput::failure(1, "OperationNotAllowed"),
        );
        let client = ControlPlaneClient::new(gateway.clone(), RetryPolicy::single_attempt());
        let driver = ZoneDeleteDriver::new("rg", "aks", "1");
        let mut tracker = OwnershipTracker::new();

        let injection = driver
            .inject(
                &client,
                &mut tracker,
                &topology(vec![("poola", vec!["a-0"]), ("poolb", vec!["b-0"]), ("poolc", vec!["c-0"])]),
            )
            .await;

        assert!(matches!(injection.error, Some(ExperimentError::Injection(_))));
        assert_eq!(injection.faults.len(), 2);
        assert_eq!(injection.faults[0].state(), crate::fault::FaultState::Active);
        assert_eq!(injection.faults[1].state(), crate::fault::FaultState::Failed);
        assert_eq!(gateway.count_matching("poolc"), 0);
    }

    #[test]
    fn empty_zone_is_rejected_up_front() {
        let driver = ZoneDeleteDriver::new("rg", "aks", " ");
        assert!(matches!(driver.validate(), Err(ExperimentError::Preflight(_))));
        let driver = ZoneDeleteDriver::new("rg", "aks", "1$(echo INJECTED >&2)");
        assert!(matches!(driver.validate(), Err(ExperimentError::Preflight(ref m)) if m.contains("zone number")));
    }
}
