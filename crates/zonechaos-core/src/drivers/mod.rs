//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Fault injection drivers, one per fault kind.
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use zonechaos_gateway::{CommandOutput, Tool};

use crate::client::ControlPlaneClient;
use crate::commands::az;
use crate::error::{ExperimentError, PipelineStage};
use crate::fault::{FaultKind, InjectedFault};
use crate::ownership::OwnershipTracker;
use crate::target::ExperimentTarget;
use crate::topology::TopologySnapshot;

pub mod db_failover;
pub mod network_deny;
pub mod partition;
pub mod pod_kill;
pub mod zone_delete;

pub use db_failover::DatabaseFailoverDriver;
pub use network_deny::{NetworkDenyDriver, SubnetSecurityGroup};
pub use partition::{ChaosMeshRelease, PartitionDriver};
pub use pod_kill::PodKillDriver;
pub use zone_delete::ZoneDeleteDriver;

/// Result of a driver's injection step.
///
/// Faults are reported even when `error` is set, so the ones that reached
/// `Active` still get rolled back.
#[derive(Debug)]
pub struct Injection<H> {
    pub faults: Vec<InjectedFault<H>>,
    pub warnings: Vec<String>,
    pub error: Option<ExperimentError>,
}

impl<H> Default for Injection<H> {
    fn default() -> Self {
        Self {
            faults: Vec::new(),
            warnings: Vec::new(),
            error: None,
        }
    }
}

impl<H> Injection<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Record the failure that stopped injection.
    pub fn abort(mut self, error: ExperimentError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_noop(&self) -> bool {
        self.faults.is_empty() && self.error.is_none()
    }
}

/// One fault kind: how to discover its targets, inject it, and undo it.
#[async_trait]
pub trait FaultDriver: Send + Sync {
    type Topology: AsRef<TopologySnapshot> + Send + Sync;
    type Handle: fmt::Debug + Send + Sync;

    fn kind(&self) -> FaultKind;

    fn target(&self) -> &ExperimentTarget;

    fn required_tools(&self) -> &'static [Tool];

    /// Parameter checks that need no control-plane access.
    fn validate(&self) -> Result<(), ExperimentError> {
        Ok(())
    }

    /// How long reversible faults stay active. `None` for fire-and-forget kinds.
    fn hold_duration(&self) -> Option<Duration> {
        None
    }

    /// Lock keys for the supporting resources a run may create and later
    /// remove. They are locked together with the target, so a run never
    /// adopts a resource another run in flight is going to delete.
    fn supporting_lock_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Environment preparation that must succeed before discovery.
    async fn prepare(&self, _client: &ControlPlaneClient) -> Result<(), ExperimentError> {
        Ok(())
    }

    async fn discover(&self, client: &ControlPlaneClient) -> Result<Self::Topology, ExperimentError>;

    async fn inject(
        &self,
        client: &ControlPlaneClient,
        tracker: &mut OwnershipTracker,
        topology: &Self::Topology,
    ) -> Injection<Self::Handle>;

    /// Undo one active fault. Irreversible kinds keep the default.
    async fn rollback(
        &self,
        _client: &ControlPlaneClient,
        _fault: &InjectedFault<Self::Handle>,
    ) -> Result<(), ExperimentError> {
        Ok(())
    }
}

/// Issue a mutating command once and map failure onto `stage`.
pub(crate) async fn mutate_checked(
    client: &ControlPlaneClient,
    command: &str,
    stage: PipelineStage,
    what: &str,
) -> Result<CommandOutput, ExperimentError> {
    let output = client
        .mutate(command)
        .await
        .map_err(|err| ExperimentError::from_gateway(stage, &err))?;
    if output.is_success() {
        return Ok(output);
    }
    let message = format!("failed to {what}: {}", output.diagnostic());
    Err(match stage {
        PipelineStage::Preflight => ExperimentError::Preflight(message),
        PipelineStage::Discovery => ExperimentError::Discovery(message),
        PipelineStage::Injection => ExperimentError::Injection(message),
        PipelineStage::Hold | PipelineStage::Rollback => ExperimentError::Rollback(message),
    })
}

/// Merge kubeconfig credentials for `cluster` so `kubectl`/`helm` target it.
pub(crate) async fn fetch_cluster_credentials(
    client: &ControlPlaneClient,
    target: &ExperimentTarget,
) -> Result<(), ExperimentError> {
    mutate_checked(
        client,
        &az::aks_get_credentials(target.resource_group(), target.resource()),
        PipelineStage::Preflight,
        &format!("get credentials for cluster '{}'", target.resource()),
    )
    .await
    .map(|_| ())
}
