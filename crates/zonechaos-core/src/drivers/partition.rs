//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Zone network partition for the pods of one namespace, expressed as a
//! chaos-mesh `NetworkChaos` object.
//!
//! Pods are labeled with their zone number first; the policy selects on that
//! label. Labels are left in place afterwards.
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use zonechaos_gateway::Tool;

use super::{fetch_cluster_credentials, mutate_checked, FaultDriver, Injection};
use crate::client::ControlPlaneClient;
use crate::commands::{helm, is_identifier, kubectl};
use crate::error::{ExperimentError, PipelineStage};
use crate::fault::{FaultKind, InjectedFault};
use crate::ownership::{OwnershipTracker, SupportingResource};
use crate::target::{ExperimentTarget, TargetSelector};
use crate::topology::{self, TopologySnapshot, ZONE_LABEL};

/// The chaos-mesh helm release the partition policy depends on.
#[derive(Debug, Clone)]
pub struct ChaosMeshRelease {
    release: String,
    namespace: String,
}

impl Default for ChaosMeshRelease {
    fn default() -> Self {
        Self {
            release: "chaos-mesh".into(),
            namespace: "chaos-mesh".into(),
        }
    }
}

#[async_trait]
impl SupportingResource for ChaosMeshRelease {
    fn key(&self) -> String {
        format!("helm:{}/{}", self.namespace, self.release)
    }

    async fn lookup(&self, client: &ControlPlaneClient) -> Result<Option<String>, ExperimentError> {
        let output = client
            .probe(&helm::release_status(&self.release, &self.namespace))
            .await
            .map_err(|err| ExperimentError::from_gateway(PipelineStage::Injection, &err))?;
        Ok(output.is_success().then(|| self.release.clone()))
    }

    async fn create(&self, client: &ControlPlaneClient) -> Result<String, ExperimentError> {
        debug!(
            target: "zonechaos::core::drivers::partition",
            namespace = %self.namespace,
            "chaos-mesh not found on cluster, installing it"
        );
        mutate_checked(
            client,
            &helm::install_chaos_mesh(&self.release, &self.namespace),
            PipelineStage::Injection,
            "install chaos-mesh",
        )
        .await?;
        Ok(self.release.clone())
    }

    async fn delete(&self, client: &ControlPlaneClient, name: &str) -> Result<(), ExperimentError> {
        mutate_checked(
            client,
            &helm::uninstall(name, &self.namespace),
            PipelineStage::Rollback,
            "uninstall chaos-mesh",
        )
        .await
        .map(|_| ())
    }
}

/// Applied `NetworkChaos` object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPolicy {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkChaos<'a> {
    api_version: &'a str,
    kind: &'a str,
    metadata: ObjectMeta<'a>,
    spec: NetworkChaosSpec<'a>,
}

#[derive(Debug, Serialize)]
struct ObjectMeta<'a> {
    name: &'a str,
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
struct NetworkChaosSpec<'a> {
    action: &'a str,
    mode: &'a str,
    selector: PodSelector<'a>,
    direction: &'a str,
    target: PartitionTarget<'a>,
}

#[derive(Debug, Serialize)]
struct PartitionTarget<'a> {
    mode: &'a str,
    selector: PodSelector<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PodSelector<'a> {
    namespaces: Vec<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    label_selectors: BTreeMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    expression_selectors: Vec<Expression<'a>>,
}

#[derive(Debug, Serialize)]
struct Expression<'a> {
    key: &'a str,
    operator: &'a str,
    values: Vec<&'a str>,
}

#[derive(Debug, Clone)]
pub struct PartitionDriver {
    target: ExperimentTarget,
    duration: Duration,
}

impl PartitionDriver {
    pub fn new(
        resource_group: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        isolated_zone: impl Into<String>,
        zones: Vec<String>,
        duration: Duration,
    ) -> Self {
        Self {
            target: ExperimentTarget::partition(
                resource_group,
                cluster,
                namespace,
                isolated_zone,
                zones,
            ),
            duration,
        }
    }

    fn selection(&self) -> (&str, &str, &[String]) {
        match self.target.selector() {
            TargetSelector::IsolatedZone {
                namespace,
                isolated_zone,
                zones,
            } => (namespace, isolated_zone, zones),
            _ => ("", "", &[]),
        }
    }

    /// Every configured zone except the isolated one.
    pub fn target_zones(&self) -> Vec<&str> {
        let (_, isolated, zones) = self.selection();
        zones
            .iter()
            .map(String::as_str)
            .filter(|zone| *zone != isolated)
            .collect()
    }

    /// Policy name derived from namespace and isolated zone.
    pub fn policy_name(&self) -> String {
        let (namespace, isolated, _) = self.selection();
        format!("chaos-partition-{namespace}-zone-{isolated}").to_lowercase()
    }

    /// Render the `NetworkChaos` manifest as YAML.
    pub fn manifest(&self) -> Result<String, ExperimentError> {
        let (namespace, isolated, _) = self.selection();
        let name = self.policy_name();
        let chaos = NetworkChaos {
            api_version: "chaos-mesh.org/v1alpha1",
            kind: "NetworkChaos",
            metadata: ObjectMeta {
                name: &name,
                namespace,
            },
            spec: NetworkChaosSpec {
                action: "partition",
                mode: "all",
                selector: PodSelector {
                    namespaces: vec![namespace],
                    label_selectors: BTreeMap::from([(ZONE_LABEL, isolated)]),
                    expression_selectors: Vec::new(),
                },
                direction: "both",
                target: PartitionTarget {
                    mode: "all",
                    selector: PodSelector {
                        namespaces: vec![namespace],
                        label_selectors: BTreeMap::new(),
                        expression_selectors: vec![Expression {
                            key: ZONE_LABEL,
                            operator: "In",
                            values: self.target_zones(),
                        }],
                    },
                },
            },
        };
        serde_yaml::to_string(&chaos).map_err(|err| {
            ExperimentError::Injection(format!("failed to render NetworkChaos manifest: {err}"))
        })
    }
}

#[async_trait]
impl FaultDriver for PartitionDriver {
    type Topology = TopologySnapshot;
    type Handle = PartitionPolicy;

    fn kind(&self) -> FaultKind {
        FaultKind::PartitionPolicy
    }

    fn target(&self) -> &ExperimentTarget {
        &self.target
    }

    fn required_tools(&self) -> &'static [Tool] {
        &[Tool::AzureCli, Tool::Kubectl, Tool::Helm]
    }

    fn validate(&self) -> Result<(), ExperimentError> {
        let (namespace, isolated, zones) = self.selection();
        if namespace.trim().is_empty() {
            return Err(ExperimentError::Preflight("namespace is empty".into()));
        }
        if let Some(zone) = zones.iter().find(|zone| !is_identifier(zone)) {
            return Err(ExperimentError::Preflight(format!(
                "zone '{zone}' must be a zone number or name"
            )));
        }
        if !zones.iter().any(|zone| zone == isolated) {
            return Err(ExperimentError::Preflight(format!(
                "isolated zone '{isolated}' is not one of {zones:?}"
            )));
        }
        if self.target_zones().is_empty() {
            return Err(ExperimentError::Preflight(
                "partition needs at least one zone besides the isolated one".into(),
            ));
        }
        if self.duration.is_zero() {
            return Err(ExperimentError::Preflight(
                "partition duration must be positive".into(),
            ));
        }
        Ok(())
    }

    fn hold_duration(&self) -> Option<Duration> {
        Some(self.duration)
    }

    /// The chaos-mesh release is cluster-wide, so every partition of the
    /// cluster takes the same key whatever its namespace.
    fn supporting_lock_keys(&self) -> Vec<String> {
        vec![format!(
            "{}@{}/{}",
            ChaosMeshRelease::default().key(),
            self.target.resource_group(),
            self.target.resource()
        )]
    }

    async fn prepare(&self, client: &ControlPlaneClient) -> Result<(), ExperimentError> {
        fetch_cluster_credentials(client, &self.target).await
    }

    async fn discover(&self, client: &ControlPlaneClient) -> Result<TopologySnapshot, ExperimentError> {
        let (namespace, _, _) = self.selection();
        topology::discover_pod_zones(client, namespace).await
    }

    async fn inject(
        &self,
        client: &ControlPlaneClient,
        tracker: &mut OwnershipTracker,
        topology: &TopologySnapshot,
    ) -> Injection<PartitionPolicy> {
        let (namespace, isolated, _) = self.selection();
        let mut injection = Injection::new();

        if let Err(err) = tracker
            .ensure(client, Box::new(ChaosMeshRelease::default()))
            .await
        {
            return injection.abort(err);
        }

        let mut labeled = Vec::with_capacity(topology.len());
        for pod in topology.units() {
            let zone = pod.attribute.as_deref().unwrap_or_default();
            debug!(
                target: "zonechaos::core::drivers::partition",
                pod = %pod.name,
                zone,
                "labeling pod with its zone"
            );
            let result = mutate_checked(
                client,
                &kubectl::label_pod(namespace, &pod.name, ZONE_LABEL, zone),
                PipelineStage::Injection,
                &format!("label pod '{}' with zone {zone}", pod.name),
            )
            .await;
            if let Err(err) = result {
                error!(
                    target: "zonechaos::core::drivers::partition",
                    pod = %pod.name,
                    error = %err,
                    "labeling failed; partition policy will not be applied"
                );
                if !labeled.is_empty() {
                    injection.warn(labels_left_behind(&labeled));
                }
                return injection.abort(err);
            }
            labeled.push(pod.name.clone());
        }

        if !topology
            .units()
            .any(|pod| pod.attribute.as_deref() == Some(isolated))
        {
            warn!(
                target: "zonechaos::core::drivers::partition",
                namespace,
                isolated_zone = isolated,
                "no pods run in the isolated zone"
            );
            injection.warn(format!(
                "no pods of namespace '{namespace}' run in isolated zone {isolated}"
            ));
        }

        let name = self.policy_name();
        let mut fault = InjectedFault::begin(
            FaultKind::PartitionPolicy,
            true,
            PartitionPolicy {
                name: name.clone(),
                namespace: namespace.to_owned(),
            },
        );
        fault.touch(format!("networkchaos/{namespace}/{name}"));

        let applied = match self.manifest() {
            Ok(manifest) => {
                mutate_checked(
                    client,
                    &kubectl::apply_manifest(&manifest),
                    PipelineStage::Injection,
                    "apply NetworkChaos experiment",
                )
                .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = applied {
            fault.advance(InjectedFault::fail);
            injection.faults.push(fault);
            injection.warn(labels_left_behind(&labeled));
            return injection.abort(err);
        }

        fault.advance(InjectedFault::activate);
        info!(
            target: "zonechaos::core::drivers::partition",
            policy = %name,
            namespace,
            isolated_zone = isolated,
            target_zones = ?self.target_zones(),
            "network partition applied"
        );
        injection.faults.push(fault);
        injection
    }

    async fn rollback(
        &self,
        client: &ControlPlaneClient,
        fault: &InjectedFault<PartitionPolicy>,
    ) -> Result<(), ExperimentError> {
        let policy = fault.handle();
        mutate_checked(
            client,
            &kubectl::delete_network_chaos(&policy.namespace, &policy.name),
            PipelineStage::Rollback,
            &format!(
                "delete NetworkChaos '{}'; it may still be active, delete it manually",
                policy.name
            ),
        )
        .await?;
        info!(
            target: "zonechaos::core::drivers::partition",
            policy = %policy.name,
            namespace = %policy.namespace,
            "network partition removed"
        );
        Ok(())
    }
}

fn labels_left_behind(pods: &[String]) -> String {
    format!(
        "zone labels remain on {} pod(s): {}",
        pods.len(),
        pods.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(isolated: &str) -> PartitionDriver {
        PartitionDriver::new(
            "rg",
            "aks",
            "shop",
            isolated,
            vec!["1".into(), "2".into(), "3".into()],
            Duration::from_secs(60),
        )
    }

    #[test]
    fn policy_targets_every_other_zone() {
        let driver = driver("1");
        assert_eq!(driver.target_zones(), vec!["2", "3"]);
        assert_eq!(driver.policy_name(), "chaos-partition-shop-zone-1");

        let manifest: serde_yaml::Value = serde_yaml::from_str(&driver.manifest().unwrap()).unwrap();
        assert_eq!(manifest["kind"], "NetworkChaos");
        assert_eq!(manifest["metadata"]["namespace"], "shop");
        assert_eq!(manifest["spec"]["action"], "partition");
        assert_eq!(manifest["spec"]["direction"], "both");
        assert_eq!(
            manifest["spec"]["selector"]["labelSelectors"][ZONE_LABEL],
            "1"
        );
        let expression = &manifest["spec"]["target"]["selector"]["expressionSelectors"][0];
        assert_eq!(expression["operator"], "In");
        assert_eq!(
            expression["values"],
            serde_yaml::to_value(vec!["2", "3"]).unwrap()
        );
    }

    #[test]
    fn isolated_zone_must_be_known() {
        assert!(driver("2").validate().is_ok());
        assert!(matches!(
            driver("4").validate(),
            Err(ExperimentError::Preflight(_))
        ));
    }
}
