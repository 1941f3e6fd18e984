//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Label-selected pod eviction. Irreversible; the owning controllers recreate the pods.
use async_trait::async_trait;
use tracing::{info, warn};
use zonechaos_common::EvictionMode;
use zonechaos_gateway::Tool;

use super::{fetch_cluster_credentials, mutate_checked, FaultDriver, Injection};
use crate::client::ControlPlaneClient;
use crate::commands::kubectl;
use crate::error::{ExperimentError, PipelineStage};
use crate::fault::{FaultKind, InjectedFault};
use crate::ownership::OwnershipTracker;
use crate::target::{ExperimentTarget, TargetSelector};
use crate::topology::{self, TopologySnapshot};

/// Evicts pods selected by label; their controllers recreate them.
#[derive(Debug, Clone)]
pub struct PodKillDriver {
    target: ExperimentTarget,
    mode: EvictionMode,
}

impl PodKillDriver {
    pub fn new(
        resource_group: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        label_selector: impl Into<String>,
        mode: EvictionMode,
    ) -> Self {
        Self {
            target: ExperimentTarget::pods(resource_group, cluster, namespace, label_selector),
            mode,
        }
    }

    fn selection(&self) -> (&str, &str) {
        match self.target.selector() {
            TargetSelector::Labels {
                namespace,
                label_selector,
            } => (namespace, label_selector),
            _ => ("", ""),
        }
    }
}

#[async_trait]
impl FaultDriver for PodKillDriver {
    type Topology = TopologySnapshot;
    type Handle = ();

    fn kind(&self) -> FaultKind {
        FaultKind::PodKill
    }

    fn target(&self) -> &ExperimentTarget {
        &self.target
    }

    fn required_tools(&self) -> &'static [Tool] {
        &[Tool::AzureCli, Tool::Kubectl]
    }

    fn validate(&self) -> Result<(), ExperimentError> {
        let (namespace, label_selector) = self.selection();
        if namespace.trim().is_empty() {
            return Err(ExperimentError::Preflight("namespace is empty".into()));
        }
        if label_selector.trim().is_empty() {
            return Err(ExperimentError::Preflight("label selector is empty".into()));
        }
        Ok(())
    }

    async fn prepare(&self, client: &ControlPlaneClient) -> Result<(), ExperimentError> {
        fetch_cluster_credentials(client, &self.target).await
    }

    async fn discover(&self, client: &ControlPlaneClient) -> Result<TopologySnapshot, ExperimentError> {
        let (namespace, label_selector) = self.selection();
        topology::discover_pods(client, namespace, label_selector).await
    }

    async fn inject(
        &self,
        client: &ControlPlaneClient,
        _tracker: &mut OwnershipTracker,
        topology: &TopologySnapshot,
    ) -> Injection<()> {
        let (namespace, label_selector) = self.selection();
        let mut injection = Injection::new();
        if topology.is_empty() {
            warn!(
                target: "zonechaos::core::drivers::pod_kill",
                namespace,
                label_selector,
                "no pods match the selector; nothing to evict"
            );
            injection.warn(format!(
                "no pods matched '{label_selector}' in namespace '{namespace}'"
            ));
            return injection;
        }

        let forced = self.mode == EvictionMode::Forced;
        info!(
            target: "zonechaos::core::drivers::pod_kill",
            namespace,
            label_selector,
            pods = topology.len(),
            forced,
            "evicting pods"
        );
        let mut fault = InjectedFault::begin(FaultKind::PodKill, false, ());
        for pod in topology.units() {
            fault.touch(format!("{namespace}/{}", pod.name));
        }
        let evicted = mutate_checked(
            client,
            &kubectl::delete_pods(namespace, label_selector, forced),
            PipelineStage::Injection,
            &format!("delete pods matching '{label_selector}'"),
        )
        .await;
        match evicted {
            Ok(_) => {
                fault.advance(InjectedFault::activate);
                injection.faults.push(fault);
                injection
            }
            Err(err) => {
                fault.advance(InjectedFault::fail);
                injection.faults.push(fault);
                injection.abort(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use zonechaos_gateway::{RetryPolicy, ScriptedGateway};

    use super::*;
    use crate::fault::FaultState;
    use crate::topology::{DiscoveredUnit, UnitKind};

    fn driver(mode: EvictionMode) -> PodKillDriver {
        PodKillDriver::new("rg", "aks", "shop", "app=cart", mode)
    }

    fn pods(names: &[&str]) -> TopologySnapshot {
        let mut snapshot = TopologySnapshot::new();
        for name in names {
            snapshot.insert(DiscoveredUnit {
                name: (*name).into(),
                kind: UnitKind::Pod,
                group: None,
                attribute: None,
            });
        }
        snapshot
    }

    #[tokio::test]
    async fn nothing_matching_issues_no_delete() {
        let gateway = Arc::new(ScriptedGateway::new());
        let client = ControlPlaneClient::new(gateway.clone(), RetryPolicy::single_attempt());
        let mut tracker = OwnershipTracker::new();

        let injection = driver(EvictionMode::Forced)
            .inject(&client, &mut tracker, &pods(&[]))
            .await;
        assert!(injection.is_noop());
        assert_eq!(injection.warnings.len(), 1);
        assert!(gateway.commands().is_empty());
    }

    #[tokio::test]
    async fn one_delete_covers_every_selected_pod() {
        let gateway = Arc::new(ScriptedGateway::new());
        let client = ControlPlaneClient::new(gateway.clone(), RetryPolicy::single_attempt());
        let mut tracker = OwnershipTracker::new();

        let injection = driver(EvictionMode::Graceful)
            .inject(&client, &mut tracker, &pods(&["cart-0", "cart-1"]))
            .await;
        assert!(injection.error.is_none());
        assert_eq!(
            gateway.commands(),
            vec!["kubectl delete pod -l app=cart -n shop --grace-period=30 --ignore-not-found"]
        );
        let fault = &injection.faults[0];
        assert_eq!(fault.state(), FaultState::Active);
        assert!(!fault.needs_rollback());
        assert_eq!(fault.resources(), ["shop/cart-0", "shop/cart-1"]);
    }

    #[test]
    fn empty_selector_is_rejected() {
        let driver = PodKillDriver::new("rg", "aks", "shop", " ", EvictionMode::Forced);
        assert!(matches!(driver.validate(), Err(ExperimentError::Preflight(_))));
    }
}
