//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use std::fmt;

use serde::Serialize;

use crate::fault::FaultKind;

/// Selector narrowing a target down to the units that will be faulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "selector", rename_all = "snake_case")]
pub enum TargetSelector {
    /// Every compute unit in one availability zone.
    Zone { zone: String },
    /// Pods matching a label selector inside a namespace.
    Labels {
        namespace: String,
        label_selector: String,
    },
    /// Traffic from one subnet to another inside a virtual network.
    SubnetPair { source: String, destination: String },
    /// Pods of one zone against the pods of every other zone.
    IsolatedZone {
        namespace: String,
        isolated_zone: String,
        zones: Vec<String>,
    },
    /// The whole resource (database server).
    Whole,
}

/// Identifies what an experiment faults. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentTarget {
    resource_group: String,
    resource: String,
    selector: TargetSelector,
}

impl ExperimentTarget {
    /// All nodes of `cluster` located in `zone`.
    pub fn zone(
        resource_group: impl Into<String>,
        cluster: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            resource: cluster.into(),
            selector: TargetSelector::Zone { zone: zone.into() },
        }
    }

    /// Pods of `cluster` selected by `label_selector` in `namespace`.
    pub fn pods(
        resource_group: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        label_selector: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            resource: cluster.into(),
            selector: TargetSelector::Labels {
                namespace: namespace.into(),
                label_selector: label_selector.into(),
            },
        }
    }

    /// Traffic from `source` to `destination`, both subnets of `vnet`.
    pub fn subnets(
        resource_group: impl Into<String>,
        vnet: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            resource: vnet.into(),
            selector: TargetSelector::SubnetPair {
                source: source.into(),
                destination: destination.into(),
            },
        }
    }

    /// Pods of `namespace` in `isolated_zone` against every other zone in `zones`.
    pub fn partition(
        resource_group: impl Into<String>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        isolated_zone: impl Into<String>,
        zones: Vec<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            resource: cluster.into(),
            selector: TargetSelector::IsolatedZone {
                namespace: namespace.into(),
                isolated_zone: isolated_zone.into(),
                zones,
            },
        }
    }

    /// A database server as a whole.
    pub fn database(resource_group: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            resource: database.into(),
            selector: TargetSelector::Whole,
        }
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    /// Cluster, virtual network, or database name depending on the selector.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn selector(&self) -> &TargetSelector {
        &self.selector
    }

    /// Stable key serializing runs of `kind` against this target.
    ///
    /// Zone deletion locks the whole cluster; the other kinds lock only the
    /// slice their selector names, so e.g. partitions of two namespaces may
    /// overlap.
    pub fn lock_key(&self, kind: FaultKind) -> String {
        let scope = match &self.selector {
            TargetSelector::Zone { .. } | TargetSelector::Whole => String::new(),
            TargetSelector::Labels { namespace, .. } => format!("/{namespace}"),
            TargetSelector::SubnetPair {
                source,
                destination,
            } => format!("/{source}->{destination}"),
            TargetSelector::IsolatedZone { namespace, .. } => format!("/{namespace}"),
        };
        format!(
            "{}:{}/{}{}",
            kind, self.resource_group, self.resource, scope
        )
    }
}

impl fmt::Display for ExperimentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.resource)?;
        match &self.selector {
            TargetSelector::Zone { zone } => write!(f, " zone={zone}"),
            TargetSelector::Labels {
                namespace,
                label_selector,
            } => write!(f, " ns={namespace} selector={label_selector}"),
            TargetSelector::SubnetPair {
                source,
                destination,
            } => write!(f, " {source}->{destination}"),
            TargetSelector::IsolatedZone {
                namespace,
                isolated_zone,
                ..
            } => write!(f, " ns={namespace} isolated_zone={isolated_zone}"),
            TargetSelector::Whole => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_include_kind_and_scope() {
        let target = ExperimentTarget::subnets("rg", "vnet", "SubnetA", "SubnetB");
        assert_eq!(
            target.lock_key(FaultKind::NetworkDeny),
            "network_deny:rg/vnet/SubnetA->SubnetB"
        );
        let zone = ExperimentTarget::zone("rg", "aks", "1");
        assert_eq!(zone.lock_key(FaultKind::ZoneDelete), "zone_delete:rg/aks");
    }

    #[test]
    fn display_describes_selector() {
        let target = ExperimentTarget::pods("rg", "aks", "shop", "app=cart");
        assert_eq!(target.to_string(), "rg/aks ns=shop selector=app=cart");
    }
}
