//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Fault-injection orchestration: discover targets, apply a fault, hold it,
//! roll it back, and clean up only what the experiment created.
pub mod client;
pub mod commands;
pub mod drivers;
pub mod entry;
pub mod error;
pub mod experiment;
pub mod fault;
pub mod hold;
pub mod locks;
pub mod metrics;
pub mod outcome;
pub mod ownership;
pub mod target;
pub mod topology;

pub use client::ControlPlaneClient;
pub use drivers::{
    ChaosMeshRelease, DatabaseFailoverDriver, FaultDriver, Injection, NetworkDenyDriver,
    PartitionDriver, PodKillDriver, SubnetSecurityGroup, ZoneDeleteDriver,
};
pub use entry::{
    aks_container_network_partition, aks_container_network_partition_outcome, aks_kill_pods,
    aks_kill_pods_outcome, aks_zone_down, aks_zone_down_outcome, block_network_access,
    block_network_access_outcome, postgres_failover, postgres_failover_outcome, run_configured,
};
pub use error::{ExperimentError, PipelineStage};
pub use experiment::ExperimentRunner;
pub use fault::{FaultKind, FaultState, FaultStateError, FaultSummary, InjectedFault};
pub use hold::{HoldController, HoldReport, RollbackFailure};
pub use locks::{TargetLease, TargetLocks};
pub use metrics::{new_registry, render_text, ExperimentMetrics, SharedRegistry};
pub use outcome::{ExperimentOutcome, ExperimentReport};
pub use ownership::{
    OwnedResource, OwnershipTracker, ReleaseAction, ReleaseFailure, SupportingResource,
};
pub use target::{ExperimentTarget, TargetSelector};
pub use topology::{DiscoveredUnit, SkippedUnit, TopologySnapshot, UnitKind};
