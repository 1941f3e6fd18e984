//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Subnet-to-subnet network block via a deny rule on the source subnet's NSG.
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use zonechaos_gateway::Tool;

use super::{mutate_checked, FaultDriver, Injection};
use crate::client::ControlPlaneClient;
use crate::commands::az;
use crate::error::{ExperimentError, PipelineStage};
use crate::fault::{FaultKind, InjectedFault};
use crate::ownership::{OwnershipTracker, SupportingResource};
use crate::target::{ExperimentTarget, TargetSelector};
use crate::topology::{self, SubnetTopology};

/// Priority of the injected deny rule.
pub const DENY_RULE_PRIORITY: u16 = 100;

/// Network security group associated with a subnet.
#[derive(Debug, Clone)]
pub struct SubnetSecurityGroup {
    resource_group: String,
    vnet: String,
    subnet: String,
}

impl SubnetSecurityGroup {
    pub fn new(
        resource_group: impl Into<String>,
        vnet: impl Into<String>,
        subnet: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            vnet: vnet.into(),
            subnet: subnet.into(),
        }
    }

    /// Name given to a security group created for the experiment.
    pub fn created_name(&self) -> String {
        format!("{}-chaostest-nsg", self.subnet)
    }

    async fn set_association(
        &self,
        client: &ControlPlaneClient,
        nsg: Option<&str>,
        stage: PipelineStage,
    ) -> Result<(), ExperimentError> {
        let what = match nsg {
            Some(name) => format!("associate NSG '{name}' with subnet '{}'", self.subnet),
            None => format!("disassociate NSG from subnet '{}'", self.subnet),
        };
        mutate_checked(
            client,
            &az::subnet_set_nsg(&self.resource_group, &self.vnet, &self.subnet, nsg),
            stage,
            &what,
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl SupportingResource for SubnetSecurityGroup {
    fn key(&self) -> String {
        format!("nsg:{}/{}/{}", self.resource_group, self.vnet, self.subnet)
    }

    async fn lookup(&self, client: &ControlPlaneClient) -> Result<Option<String>, ExperimentError> {
        let output = client
            .probe(&az::subnet_nsg_id(&self.resource_group, &self.vnet, &self.subnet))
            .await
            .map_err(|err| ExperimentError::from_gateway(PipelineStage::Injection, &err))?;
        let id = output.trimmed();
        if !output.is_success() || id.is_empty() {
            info!(
                target: "zonechaos::core::drivers::network_deny",
                subnet = %self.subnet,
                "no NSG associated with subnet; one will be created"
            );
            return Ok(None);
        }
        Ok(id.rsplit('/').next().map(ToOwned::to_owned))
    }

    async fn create(&self, client: &ControlPlaneClient) -> Result<String, ExperimentError> {
        let name = self.created_name();
        mutate_checked(
            client,
            &az::nsg_create(&self.resource_group, &name),
            PipelineStage::Injection,
            &format!("create NSG for subnet '{}'", self.subnet),
        )
        .await?;
        Ok(name)
    }

    async fn attach(&self, client: &ControlPlaneClient, name: &str) -> Result<(), ExperimentError> {
        self.set_association(client, Some(name), PipelineStage::Injection)
            .await
    }

    async fn detach(&self, client: &ControlPlaneClient, _name: &str) -> Result<(), ExperimentError> {
        self.set_association(client, None, PipelineStage::Rollback)
            .await
    }

    async fn delete(&self, client: &ControlPlaneClient, name: &str) -> Result<(), ExperimentError> {
        mutate_checked(
            client,
            &az::nsg_delete(&self.resource_group, name),
            PipelineStage::Rollback,
            &format!("delete NSG '{name}'"),
        )
        .await
        .map(|_| ())
    }
}

/// Deny rule placed on a security group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyRule {
    pub nsg: String,
    pub rule: String,
    /// Found already in place, left behind by an interrupted earlier run.
    pub adopted: bool,
}

#[derive(Debug, Clone)]
pub struct NetworkDenyDriver {
    target: ExperimentTarget,
    duration: Duration,
}

impl NetworkDenyDriver {
    pub fn new(
        resource_group: impl Into<String>,
        vnet: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            target: ExperimentTarget::subnets(resource_group, vnet, source, destination),
            duration,
        }
    }

    fn subnets(&self) -> (&str, &str) {
        match self.target.selector() {
            TargetSelector::SubnetPair {
                source,
                destination,
            } => (source, destination),
            _ => ("", ""),
        }
    }

    /// Security group of the source subnet, shared by every rule on it.
    pub fn security_group(&self) -> SubnetSecurityGroup {
        let (source, _) = self.subnets();
        SubnetSecurityGroup::new(self.target.resource_group(), self.target.resource(), source)
    }

    /// Deterministic rule name, so a crashed run's rule can be found again.
    pub fn rule_name(&self) -> String {
        let (source, destination) = self.subnets();
        format!("block-{source}-to-{destination}-rule")
    }

    async fn rule_exists(
        &self,
        client: &ControlPlaneClient,
        nsg: &str,
        rule: &str,
    ) -> Result<bool, ExperimentError> {
        let output = client
            .probe(&az::nsg_rule_show(self.target.resource_group(), nsg, rule))
            .await
            .map_err(|err| ExperimentError::from_gateway(PipelineStage::Injection, &err))?;
        Ok(output.is_success() && !output.trimmed().is_empty())
    }
}

#[async_trait]
impl FaultDriver for NetworkDenyDriver {
    type Topology = SubnetTopology;
    type Handle = DenyRule;

    fn kind(&self) -> FaultKind {
        FaultKind::NetworkDeny
    }

    fn target(&self) -> &ExperimentTarget {
        &self.target
    }

    fn required_tools(&self) -> &'static [Tool] {
        &[Tool::AzureCli]
    }

    fn validate(&self) -> Result<(), ExperimentError> {
        let (source, destination) = self.subnets();
        if self.target.resource().trim().is_empty() {
            return Err(ExperimentError::Preflight("virtual network name is empty".into()));
        }
        if source.trim().is_empty() || destination.trim().is_empty() {
            return Err(ExperimentError::Preflight("subnet names must not be empty".into()));
        }
        if self.duration.is_zero() {
            return Err(ExperimentError::Preflight("block duration must be positive".into()));
        }
        Ok(())
    }

    fn hold_duration(&self) -> Option<Duration> {
        Some(self.duration)
    }

    fn supporting_lock_keys(&self) -> Vec<String> {
        vec![self.security_group().key()]
    }

    async fn discover(&self, client: &ControlPlaneClient) -> Result<SubnetTopology, ExperimentError> {
        let (source, destination) = self.subnets();
        topology::discover_subnets(
            client,
            self.target.resource_group(),
            self.target.resource(),
            source,
            destination,
        )
        .await
    }

    async fn inject(
        &self,
        client: &ControlPlaneClient,
        tracker: &mut OwnershipTracker,
        topology: &SubnetTopology,
    ) -> Injection<DenyRule> {
        let (source, destination) = self.subnets();
        let resource_group = self.target.resource_group();
        let mut injection = Injection::new();

        let nsg = match tracker.ensure(client, Box::new(self.security_group())).await {
            Ok((owned, _)) => owned.name,
            Err(err) => return injection.abort(err),
        };

        let rule = self.rule_name();
        let exists = match self.rule_exists(client, &nsg, &rule).await {
            Ok(exists) => exists,
            Err(err) => return injection.abort(err),
        };

        let mut fault = InjectedFault::begin(
            FaultKind::NetworkDeny,
            true,
            DenyRule {
                nsg: nsg.clone(),
                rule: rule.clone(),
                adopted: exists,
            },
        );
        fault.touch(format!("{nsg}/{rule}"));

        if exists {
            warn!(
                target: "zonechaos::core::drivers::network_deny",
                nsg = %nsg,
                rule = %rule,
                "deny rule already present; adopting it and removing it at rollback"
            );
            injection.warn(format!(
                "rule '{rule}' already existed on NSG '{nsg}' and was adopted"
            ));
        } else {
            debug!(
                target: "zonechaos::core::drivers::network_deny",
                source_prefix = %topology.source_prefix,
                destination_prefix = %topology.destination_prefix,
                "creating deny rule"
            );
            let created = mutate_checked(
                client,
                &az::nsg_deny_rule_create(
                    resource_group,
                    &nsg,
                    &rule,
                    DENY_RULE_PRIORITY,
                    &topology.source_prefix,
                    &topology.destination_prefix,
                ),
                PipelineStage::Injection,
                &format!("create NSG rule '{rule}'"),
            )
            .await;
            if let Err(err) = created {
                fault.advance(InjectedFault::fail);
                injection.faults.push(fault);
                return injection.abort(err);
            }
        }

        fault.advance(InjectedFault::activate);
        info!(
            target: "zonechaos::core::drivers::network_deny",
            nsg = %nsg,
            rule = %rule,
            source,
            destination,
            "traffic between subnets is blocked"
        );
        injection.faults.push(fault);
        injection
    }

    async fn rollback(
        &self,
        client: &ControlPlaneClient,
        fault: &InjectedFault<DenyRule>,
    ) -> Result<(), ExperimentError> {
        let handle = fault.handle();
        mutate_checked(
            client,
            &az::nsg_rule_delete(self.target.resource_group(), &handle.nsg, &handle.rule),
            PipelineStage::Rollback,
            &format!("delete NSG rule '{}'", handle.rule),
        )
        .await?;
        info!(
            target: "zonechaos::core::drivers::network_deny",
            nsg = %handle.nsg,
            rule = %handle.rule,
            "deny rule deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use zonechaos_gateway::{CommandOutput, RetryPolicy, ScriptedGateway};

    use super::*;

    fn subnets() -> SubnetTopology {
        SubnetTopology {
            snapshot: Default::default(),
            source_prefix: "10.0.1.0/24".into(),
            destination_prefix: "10.0.2.0/24".into(),
        }
    }

    #[test]
    fn rule_name_is_deterministic() {
        let driver =
            NetworkDenyDriver::new("rg", "vnet", "SubnetA", "SubnetB", Duration::from_secs(30));
        assert_eq!(driver.rule_name(), "block-SubnetA-to-SubnetB-rule");
    }

    #[test]
    fn zero_duration_is_a_preflight_error() {
        let driver = NetworkDenyDriver::new("rg", "vnet", "SubnetA", "SubnetB", Duration::ZERO);
        assert!(matches!(driver.validate(), Err(ExperimentError::Preflight(_))));
    }

    #[tokio::test]
    async fn existing_rule_is_adopted_not_duplicated() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway
            .on(
                "--query \"networkSecurityGroup.id\"",
                CommandOutput::success("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/networkSecurityGroups/shared-nsg\n"),
            )
            .on(
                "az network nsg rule show",
                CommandOutput::success("block-SubnetA-to-SubnetB-rule\n"),
            );
        let client = ControlPlaneClient::new(gateway.clone(), RetryPolicy::single_attempt());
        let driver =
            NetworkDenyDriver::new("rg", "vnet", "SubnetA", "SubnetB", Duration::from_secs(30));
        let mut tracker = OwnershipTracker::new();

        let injection = driver.inject(&client, &mut tracker, &subnets()).await;
        assert!(injection.error.is_none());
        assert_eq!(injection.faults.len(), 1);
        assert!(injection.faults[0].handle().adopted);
        assert_eq!(injection.faults[0].handle().nsg, "shared-nsg");
        assert_eq!(injection.warnings.len(), 1);
        assert_eq!(gateway.count_matching("az network nsg rule create"), 0);
        assert_eq!(gateway.count_matching("az network nsg create"), 0);
    }

    #[tokio::test]
    async fn failed_rule_creation_reports_failed_fault() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway
            .on("--query \"networkSecurityGroup.id\"", CommandOutput::success(""))
            .on("az network nsg rule show", CommandOutput::failure(3, "NotFound"))
            .on("az network nsg rule create", CommandOutput::failure(1, "PriorityConflict"));
        let client = ControlPlaneClient::new(gateway.clone(), RetryPolicy::single_attempt());
        let driver =
            NetworkDenyDriver::new("rg", "vnet", "SubnetA", "SubnetB", Duration::from_secs(30));
        let mut tracker = OwnershipTracker::new();

        let injection = driver.inject(&client, &mut tracker, &subnets()).await;
        assert!(matches!(injection.error, Some(ExperimentError::Injection(_))));
        assert!(!injection.faults[0].needs_rollback());
        let owned = tracker.get("nsg:rg/vnet/SubnetA").unwrap();
        assert!(owned.created_by_experiment);
        assert_eq!(owned.name, "SubnetA-chaostest-nsg");
    }
}
