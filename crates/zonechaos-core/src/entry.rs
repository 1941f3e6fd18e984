//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Experiment entry points. The plain functions keep the boolean contract;
//! the `_outcome` variants return the structured result.
use std::time::Duration;

use zonechaos_common::{EvictionMode, ExperimentConfig, FailoverMode};

use crate::drivers::{
    DatabaseFailoverDriver, NetworkDenyDriver, PartitionDriver, PodKillDriver, ZoneDeleteDriver,
};
use crate::experiment::ExperimentRunner;
use crate::outcome::ExperimentOutcome;

pub async fn aks_zone_down_outcome(
    runner: &ExperimentRunner,
    resource_group: &str,
    cluster_name: &str,
    target_zone: &str,
) -> ExperimentOutcome {
    let driver = ZoneDeleteDriver::new(resource_group, cluster_name, target_zone);
    runner.run("aks_zone_down", &driver).await
}

/// Delete every node of `cluster_name` in `target_zone`.
pub async fn aks_zone_down(
    runner: &ExperimentRunner,
    resource_group: &str,
    cluster_name: &str,
    target_zone: &str,
) -> bool {
    aks_zone_down_outcome(runner, resource_group, cluster_name, target_zone)
        .await
        .is_success()
}

pub async fn block_network_access_outcome(
    runner: &ExperimentRunner,
    resource_group: &str,
    vnet: &str,
    subnet_source: &str,
    subnet_dest: &str,
    duration: Duration,
) -> ExperimentOutcome {
    let driver = NetworkDenyDriver::new(resource_group, vnet, subnet_source, subnet_dest, duration);
    runner.run("block_network_access", &driver).await
}

/// Deny traffic from `subnet_source` to `subnet_dest` for `duration`.
pub async fn block_network_access(
    runner: &ExperimentRunner,
    resource_group: &str,
    vnet: &str,
    subnet_source: &str,
    subnet_dest: &str,
    duration: Duration,
) -> bool {
    block_network_access_outcome(
        runner,
        resource_group,
        vnet,
        subnet_source,
        subnet_dest,
        duration,
    )
    .await
    .is_success()
}

pub async fn aks_kill_pods_outcome(
    runner: &ExperimentRunner,
    resource_group: &str,
    cluster_name: &str,
    namespace: &str,
    label_selector: &str,
    mode: EvictionMode,
) -> ExperimentOutcome {
    let driver = PodKillDriver::new(resource_group, cluster_name, namespace, label_selector, mode);
    runner.run("aks_kill_pods", &driver).await
}

/// Evict the pods matching `label_selector` in `namespace`.
pub async fn aks_kill_pods(
    runner: &ExperimentRunner,
    resource_group: &str,
    cluster_name: &str,
    namespace: &str,
    label_selector: &str,
    mode: EvictionMode,
) -> bool {
    aks_kill_pods_outcome(
        runner,
        resource_group,
        cluster_name,
        namespace,
        label_selector,
        mode,
    )
    .await
    .is_success()
}

pub async fn aks_container_network_partition_outcome(
    runner: &ExperimentRunner,
    resource_group: &str,
    cluster_name: &str,
    namespace: &str,
    isolated_zone: &str,
    zones: Vec<String>,
    duration: Duration,
) -> ExperimentOutcome {
    let driver = PartitionDriver::new(
        resource_group,
        cluster_name,
        namespace,
        isolated_zone,
        zones,
        duration,
    );
    runner.run("aks_container_network_partition", &driver).await
}

/// Partition the pods of `isolated_zone` from every other zone for `duration`.
pub async fn aks_container_network_partition(
    runner: &ExperimentRunner,
    resource_group: &str,
    cluster_name: &str,
    namespace: &str,
    isolated_zone: &str,
    zones: Vec<String>,
    duration: Duration,
) -> bool {
    aks_container_network_partition_outcome(
        runner,
        resource_group,
        cluster_name,
        namespace,
        isolated_zone,
        zones,
        duration,
    )
    .await
    .is_success()
}

pub async fn postgres_failover_outcome(
    runner: &ExperimentRunner,
    resource_group: &str,
    database_name: &str,
    mode: FailoverMode,
) -> ExperimentOutcome {
    let driver = DatabaseFailoverDriver::new(resource_group, database_name, mode);
    runner.run("postgres_failover", &driver).await
}

/// Fail a zone-redundant flexible server over to its standby.
pub async fn postgres_failover(
    runner: &ExperimentRunner,
    resource_group: &str,
    database_name: &str,
    mode: FailoverMode,
) -> bool {
    postgres_failover_outcome(runner, resource_group, database_name, mode)
        .await
        .is_success()
}

/// Run one configured experiment under the label `name`.
pub async fn run_configured(
    runner: &ExperimentRunner,
    name: &str,
    resource_group: &str,
    experiment: &ExperimentConfig,
) -> ExperimentOutcome {
    match experiment {
        ExperimentConfig::BlockNetworkAccess {
            vnet,
            subnet_source,
            subnet_dest,
            duration_sec,
        } => {
            let driver = NetworkDenyDriver::new(
                resource_group,
                vnet.as_str(),
                subnet_source.as_str(),
                subnet_dest.as_str(),
                *duration_sec,
            );
            runner.run(name, &driver).await
        }
        ExperimentConfig::AksZoneDown {
            cluster_name,
            target_zone,
        } => {
            let driver =
                ZoneDeleteDriver::new(resource_group, cluster_name.as_str(), target_zone.as_str());
            runner.run(name, &driver).await
        }
        ExperimentConfig::AksKillPods {
            cluster_name,
            namespace,
            label_selector,
            mode,
        } => {
            let driver = PodKillDriver::new(
                resource_group,
                cluster_name.as_str(),
                namespace.as_str(),
                label_selector.as_str(),
                *mode,
            );
            runner.run(name, &driver).await
        }
        ExperimentConfig::AksContainerNetworkPartition {
            cluster_name,
            namespace,
            isolated_zone,
            zones,
            duration_sec,
        } => {
            let driver = PartitionDriver::new(
                resource_group,
                cluster_name.as_str(),
                namespace.as_str(),
                isolated_zone.as_str(),
                zones.clone(),
                *duration_sec,
            );
            runner.run(name, &driver).await
        }
        ExperimentConfig::PostgresFailover {
            database_name,
            mode,
        } => {
            let driver = DatabaseFailoverDriver::new(resource_group, database_name.as_str(), *mode);
            runner.run(name, &driver).await
        }
    }
}
