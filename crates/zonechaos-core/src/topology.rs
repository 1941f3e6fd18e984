//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Topology discovery: fresh, per-run views of the resources a fault targets.
//!
//! Top-level queries that fail abort with [`ExperimentError::Discovery`];
//! failures scoped to one group (a node pool, a pod) are logged and the group
//! is recorded as skipped.
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info, warn};
use zonechaos_gateway::CommandOutput;

use crate::client::ControlPlaneClient;
use crate::commands::{az, is_identifier, kubectl};
use crate::error::{ExperimentError, PipelineStage};

/// Node label carrying the availability zone.
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UnitKind {
    VmssInstance,
    Pod,
    Subnet,
    Database,
}

/// One discovered unit and the attribute used to select it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredUnit {
    pub name: String,
    pub kind: UnitKind,
    /// Owning group, e.g. the node pool of an instance.
    pub group: Option<String>,
    /// Zone number or address prefix, when the fault needs one.
    pub attribute: Option<String>,
}

/// A group that could not be inspected during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedUnit {
    pub unit: String,
    pub reason: String,
}

/// Point-in-time view of the discovered units. Never reused across runs.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    captured_at: DateTime<Utc>,
    units: IndexMap<String, DiscoveredUnit>,
    skipped: Vec<SkippedUnit>,
}

impl Default for TopologySnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologySnapshot {
    pub fn new() -> Self {
        Self {
            captured_at: Utc::now(),
            units: IndexMap::new(),
            skipped: Vec::new(),
        }
    }

    pub fn insert(&mut self, unit: DiscoveredUnit) {
        self.units.insert(unit.name.clone(), unit);
    }

    pub fn skip(&mut self, unit: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(SkippedUnit {
            unit: unit.into(),
            reason: reason.into(),
        });
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn get(&self, name: &str) -> Option<&DiscoveredUnit> {
        self.units.get(name)
    }

    pub fn units(&self) -> impl Iterator<Item = &DiscoveredUnit> {
        self.units.values()
    }

    pub fn in_group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a DiscoveredUnit> {
        self.units
            .values()
            .filter(move |unit| unit.group.as_deref() == Some(group))
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn skipped(&self) -> &[SkippedUnit] {
        &self.skipped
    }
}

impl AsRef<TopologySnapshot> for TopologySnapshot {
    fn as_ref(&self) -> &TopologySnapshot {
        self
    }
}

/// Reduce a zone label such as `westeurope-1` to its zone number.
pub fn zone_number(label: &str) -> &str {
    label.rsplit('-').next().unwrap_or(label)
}

async fn discovery_query(
    client: &ControlPlaneClient,
    command: &str,
    what: &str,
) -> Result<CommandOutput, ExperimentError> {
    let output = client
        .query(command)
        .await
        .map_err(|err| ExperimentError::from_gateway(PipelineStage::Discovery, &err))?;
    if !output.is_success() {
        return Err(ExperimentError::Discovery(format!(
            "failed to {what}: {}",
            output.diagnostic()
        )));
    }
    Ok(output)
}

fn parse_json<T: for<'de> Deserialize<'de>>(
    output: &CommandOutput,
    what: &str,
) -> Result<T, ExperimentError> {
    serde_json::from_str(&output.stdout)
        .map_err(|err| ExperimentError::Discovery(format!("failed to parse {what}: {err}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodePoolRecord {
    name: String,
    #[serde(default)]
    enable_auto_scaling: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default)]
    node_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PodRecord {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Deserialize)]
struct NodeRecord {
    metadata: ObjectMeta,
}

#[derive(Debug, Default, Deserialize)]
struct HighAvailability {
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlexibleServerRecord {
    #[serde(default)]
    high_availability: Option<HighAvailability>,
    #[serde(default)]
    availability_zone: Option<String>,
}

/// Node pool with the instances it runs in the target zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZonePool {
    pub name: String,
    pub autoscaling: bool,
    pub machines: Vec<String>,
}

/// Instances of every node pool in one zone.
#[derive(Debug, Clone)]
pub struct ZoneTopology {
    pub snapshot: TopologySnapshot,
    pub node_resource_group: String,
    pub zone: String,
    pub pools: Vec<ZonePool>,
}

impl ZoneTopology {
    pub fn machine_count(&self) -> usize {
        self.pools.iter().map(|pool| pool.machines.len()).sum()
    }
}

impl AsRef<TopologySnapshot> for ZoneTopology {
    fn as_ref(&self) -> &TopologySnapshot {
        &self.snapshot
    }
}

/// Resolve every node-pool instance of `cluster` located in `zone`.
pub async fn discover_zone_instances(
    client: &ControlPlaneClient,
    resource_group: &str,
    cluster: &str,
    zone: &str,
) -> Result<ZoneTopology, ExperimentError> {
    let node_rg = discovery_query(
        client,
        &az::aks_node_resource_group(resource_group, cluster),
        &format!("retrieve node resource group for cluster '{cluster}'"),
    )
    .await?;
    let node_resource_group = node_rg.trimmed().to_owned();
    if node_resource_group.is_empty() {
        return Err(ExperimentError::Discovery(format!(
            "cluster '{cluster}' reported an empty node resource group"
        )));
    }

    let pools_output = discovery_query(
        client,
        &az::aks_nodepool_list(resource_group, cluster),
        &format!("list node pools for cluster '{cluster}'"),
    )
    .await?;
    let records: Vec<NodePoolRecord> = parse_json(&pools_output, "node pool list")?;
    debug!(
        target: "zonechaos::core::topology",
        cluster,
        pools = records.len(),
        "node pools listed"
    );

    let mut snapshot = TopologySnapshot::new();
    let mut pools = Vec::with_capacity(records.len());
    for record in records {
        if !is_identifier(&record.name) {
            warn!(
                target: "zonechaos::core::topology",
                pool = %record.name,
                "node pool name has unexpected characters; skipping"
            );
            snapshot.skip(&record.name, "node pool name is not a plain identifier");
            continue;
        }
        let autoscaling = record.enable_auto_scaling.unwrap_or(false);
        let vmss = match client
            .query(&az::vmss_for_pool(&node_resource_group, &record.name))
            .await
        {
            Ok(output) if output.is_success() => output.lines().into_iter().next(),
            Ok(output) => {
                warn!(
                    target: "zonechaos::core::topology",
                    pool = %record.name,
                    diagnostic = %output.diagnostic(),
                    "failed to list scale sets for node pool; skipping"
                );
                snapshot.skip(&record.name, output.diagnostic());
                continue;
            }
            Err(err) => {
                warn!(
                    target: "zonechaos::core::topology",
                    pool = %record.name,
                    error = %err,
                    "failed to list scale sets for node pool; skipping"
                );
                snapshot.skip(&record.name, err.to_string());
                continue;
            }
        };
        let Some(vmss) = vmss else {
            info!(
                target: "zonechaos::core::topology",
                pool = %record.name,
                "no scale set found for node pool"
            );
            pools.push(ZonePool {
                name: record.name,
                autoscaling,
                machines: Vec::new(),
            });
            continue;
        };

        let machines = match client
            .query(&az::vmss_instances_in_zone(&node_resource_group, &vmss, zone))
            .await
        {
            Ok(output) if output.is_success() => output.lines(),
            Ok(output) => {
                warn!(
                    target: "zonechaos::core::topology",
                    pool = %record.name,
                    vmss = %vmss,
                    diagnostic = %output.diagnostic(),
                    "failed to list scale set instances; skipping"
                );
                snapshot.skip(&record.name, output.diagnostic());
                continue;
            }
            Err(err) => {
                warn!(
                    target: "zonechaos::core::topology",
                    pool = %record.name,
                    vmss = %vmss,
                    error = %err,
                    "failed to list scale set instances; skipping"
                );
                snapshot.skip(&record.name, err.to_string());
                continue;
            }
        };
        for machine in &machines {
            snapshot.insert(DiscoveredUnit {
                name: machine.clone(),
                kind: UnitKind::VmssInstance,
                group: Some(record.name.clone()),
                attribute: Some(zone.to_owned()),
            });
        }
        pools.push(ZonePool {
            name: record.name,
            autoscaling,
            machines,
        });
    }

    let topology = ZoneTopology {
        snapshot,
        node_resource_group,
        zone: zone.to_owned(),
        pools,
    };
    if topology.machine_count() == 0 && !topology.snapshot.skipped().is_empty() {
        return Err(ExperimentError::Discovery(format!(
            "no instances found in zone {zone}; {} node pool(s) could not be inspected",
            topology.snapshot.skipped().len()
        )));
    }
    Ok(topology)
}

/// Pods matching a label selector.
pub async fn discover_pods(
    client: &ControlPlaneClient,
    namespace: &str,
    label_selector: &str,
) -> Result<TopologySnapshot, ExperimentError> {
    let output = discovery_query(
        client,
        &kubectl::pods_by_selector(namespace, label_selector),
        &format!("list pods matching '{label_selector}' in namespace '{namespace}'"),
    )
    .await?;
    let pods: ItemList<PodRecord> = parse_json(&output, "pod list")?;
    let mut snapshot = TopologySnapshot::new();
    for pod in pods.items {
        snapshot.insert(DiscoveredUnit {
            name: pod.metadata.name,
            kind: UnitKind::Pod,
            group: Some(namespace.to_owned()),
            attribute: None,
        });
    }
    Ok(snapshot)
}

/// Every pod of `namespace` with the zone number of the node it runs on.
///
/// Pods that are unscheduled, or whose node carries no zone label, are
/// skipped with a warning. An empty result is a discovery failure.
pub async fn discover_pod_zones(
    client: &ControlPlaneClient,
    namespace: &str,
) -> Result<TopologySnapshot, ExperimentError> {
    let pods_output = discovery_query(
        client,
        &kubectl::pods_in_namespace(namespace),
        &format!("list pods in namespace '{namespace}'"),
    )
    .await?;
    let pods: ItemList<PodRecord> = parse_json(&pods_output, "pod list")?;

    let nodes_output = discovery_query(client, &kubectl::nodes(), "list cluster nodes").await?;
    let nodes: ItemList<NodeRecord> = parse_json(&nodes_output, "node list")?;
    let zones: HashMap<String, String> = nodes
        .items
        .into_iter()
        .filter_map(|node| {
            let zone = node.metadata.labels.get(ZONE_LABEL)?;
            Some((node.metadata.name, zone_number(zone).to_owned()))
        })
        .collect();

    let mut snapshot = TopologySnapshot::new();
    for pod in pods.items {
        let name = pod.metadata.name;
        let Some(node) = pod.spec.node_name else {
            warn!(target: "zonechaos::core::topology", pod = %name, "pod is not scheduled; skipping");
            snapshot.skip(name, "pod is not scheduled on a node");
            continue;
        };
        let Some(zone) = zones.get(&node) else {
            warn!(
                target: "zonechaos::core::topology",
                pod = %name,
                node = %node,
                "node has no zone label; skipping pod"
            );
            snapshot.skip(name, format!("node '{node}' has no zone label"));
            continue;
        };
        debug!(target: "zonechaos::core::topology", pod = %name, zone = %zone, "pod resolved");
        snapshot.insert(DiscoveredUnit {
            name,
            kind: UnitKind::Pod,
            group: Some(node),
            attribute: Some(zone.clone()),
        });
    }

    if snapshot.is_empty() {
        return Err(ExperimentError::Discovery(format!(
            "no pods with a resolvable zone found in namespace '{namespace}'"
        )));
    }
    Ok(snapshot)
}

/// Address prefixes of a source and destination subnet.
#[derive(Debug, Clone)]
pub struct SubnetTopology {
    pub snapshot: TopologySnapshot,
    pub source_prefix: String,
    pub destination_prefix: String,
}

impl AsRef<TopologySnapshot> for SubnetTopology {
    fn as_ref(&self) -> &TopologySnapshot {
        &self.snapshot
    }
}

async fn subnet_prefix(
    client: &ControlPlaneClient,
    resource_group: &str,
    vnet: &str,
    subnet: &str,
) -> Result<String, ExperimentError> {
    let output = discovery_query(
        client,
        &az::subnet_address_prefix(resource_group, vnet, subnet),
        &format!("retrieve address prefix of subnet '{subnet}'"),
    )
    .await?;
    let prefix = output.trimmed();
    if prefix.is_empty() {
        return Err(ExperimentError::Discovery(format!(
            "subnet '{subnet}' has no address prefix"
        )));
    }
    Ok(prefix.to_owned())
}

/// Resolve the address prefixes of both subnets of a pair.
pub async fn discover_subnets(
    client: &ControlPlaneClient,
    resource_group: &str,
    vnet: &str,
    source: &str,
    destination: &str,
) -> Result<SubnetTopology, ExperimentError> {
    let source_prefix = subnet_prefix(client, resource_group, vnet, source).await?;
    let destination_prefix = subnet_prefix(client, resource_group, vnet, destination).await?;
    debug!(
        target: "zonechaos::core::topology",
        source,
        source_prefix = %source_prefix,
        destination,
        destination_prefix = %destination_prefix,
        "subnet prefixes resolved"
    );

    let mut snapshot = TopologySnapshot::new();
    snapshot.insert(DiscoveredUnit {
        name: source.to_owned(),
        kind: UnitKind::Subnet,
        group: Some(vnet.to_owned()),
        attribute: Some(source_prefix.clone()),
    });
    snapshot.insert(DiscoveredUnit {
        name: destination.to_owned(),
        kind: UnitKind::Subnet,
        group: Some(vnet.to_owned()),
        attribute: Some(destination_prefix.clone()),
    });
    Ok(SubnetTopology {
        snapshot,
        source_prefix,
        destination_prefix,
    })
}

/// High-availability settings of a flexible database server.
#[derive(Debug, Clone)]
pub struct DatabaseTopology {
    pub snapshot: TopologySnapshot,
    pub ha_mode: Option<String>,
    pub zone: Option<String>,
}

impl DatabaseTopology {
    pub fn is_zone_redundant(&self) -> bool {
        self.ha_mode.as_deref() == Some("ZoneRedundant")
    }
}

impl AsRef<TopologySnapshot> for DatabaseTopology {
    fn as_ref(&self) -> &TopologySnapshot {
        &self.snapshot
    }
}

/// Read the HA mode and current zone of `server`.
pub async fn discover_database(
    client: &ControlPlaneClient,
    resource_group: &str,
    server: &str,
) -> Result<DatabaseTopology, ExperimentError> {
    let output = discovery_query(
        client,
        &az::postgres_show(resource_group, server),
        &format!("retrieve database '{server}' in resource group '{resource_group}'"),
    )
    .await?;
    let record: FlexibleServerRecord = parse_json(&output, "database configuration")?;
    let ha_mode = record.high_availability.and_then(|ha| ha.mode);

    let mut snapshot = TopologySnapshot::new();
    snapshot.insert(DiscoveredUnit {
        name: server.to_owned(),
        kind: UnitKind::Database,
        group: None,
        attribute: record.availability_zone.clone(),
    });
    Ok(DatabaseTopology {
        snapshot,
        ha_mode,
        zone: record.availability_zone,
    })
}
