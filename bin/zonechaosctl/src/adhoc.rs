//! ---
//! zc_section: "05-networking-external-interfaces"
//! zc_subsection: "binary"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Control CLI for running zone redundancy experiments."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! One-off experiments described entirely on the command line.
use std::time::Duration;

use anyhow::Result;
use clap::{Args, ValueEnum};
use zonechaos_common::{EvictionMode, ExperimentConfig, FailoverMode, GatewayConfig};
use zonechaos_core::{run_configured, ControlPlaneClient};
use zonechaos_logging as logging;

use crate::report::Output;

#[derive(Debug, Args)]
pub struct Common {
    #[arg(long, short = 'g', env = "ZONECHAOS_RESOURCE_GROUP")]
    resource_group: String,
}

#[derive(Debug, Args)]
pub struct ZoneDownArgs {
    #[command(flatten)]
    common: Common,
    #[arg(long)]
    cluster_name: String,
    #[arg(long, default_value = "1")]
    target_zone: String,
}

#[derive(Debug, Args)]
pub struct BlockNetworkArgs {
    #[command(flatten)]
    common: Common,
    #[arg(long)]
    vnet: String,
    #[arg(long)]
    subnet_source: String,
    #[arg(long)]
    subnet_dest: String,
    /// Seconds to keep the deny rule in place.
    #[arg(long, default_value_t = 30)]
    duration_sec: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliEviction {
    Graceful,
    Forced,
}

#[derive(Debug, Args)]
pub struct KillPodsArgs {
    #[command(flatten)]
    common: Common,
    #[arg(long)]
    cluster_name: String,
    #[arg(long)]
    namespace: String,
    #[arg(long)]
    label_selector: String,
    #[arg(long, value_enum, default_value = "graceful")]
    mode: CliEviction,
}

#[derive(Debug, Args)]
pub struct PartitionArgs {
    #[command(flatten)]
    common: Common,
    #[arg(long)]
    cluster_name: String,
    #[arg(long)]
    namespace: String,
    #[arg(long)]
    isolated_zone: String,
    /// Every zone of the cluster, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "1,2,3")]
    zones: Vec<String>,
    #[arg(long, default_value_t = 60)]
    duration_sec: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliFailover {
    Planned,
    Forced,
}

#[derive(Debug, Args)]
pub struct PostgresFailoverArgs {
    #[command(flatten)]
    common: Common,
    #[arg(long)]
    database_name: String,
    #[arg(long, value_enum, default_value = "planned")]
    mode: CliFailover,
}

/// A resource group paired with the experiment to run against it.
pub struct AdhocExperiment {
    resource_group: String,
    experiment: ExperimentConfig,
}

impl ZoneDownArgs {
    pub fn into_experiment(self) -> AdhocExperiment {
        AdhocExperiment {
            resource_group: self.common.resource_group,
            experiment: ExperimentConfig::AksZoneDown {
                cluster_name: self.cluster_name,
                target_zone: self.target_zone,
            },
        }
    }
}

impl BlockNetworkArgs {
    pub fn into_experiment(self) -> AdhocExperiment {
        AdhocExperiment {
            resource_group: self.common.resource_group,
            experiment: ExperimentConfig::BlockNetworkAccess {
                vnet: self.vnet,
                subnet_source: self.subnet_source,
                subnet_dest: self.subnet_dest,
                duration_sec: Duration::from_secs(self.duration_sec),
            },
        }
    }
}

impl KillPodsArgs {
    pub fn into_experiment(self) -> AdhocExperiment {
        AdhocExperiment {
            resource_group: self.common.resource_group,
            experiment: ExperimentConfig::AksKillPods {
                cluster_name: self.cluster_name,
                namespace: self.namespace,
                label_selector: self.label_selector,
                mode: match self.mode {
                    CliEviction::Graceful => EvictionMode::Graceful,
                    CliEviction::Forced => EvictionMode::Forced,
                },
            },
        }
    }
}

impl PartitionArgs {
    pub fn into_experiment(self) -> AdhocExperiment {
        AdhocExperiment {
            resource_group: self.common.resource_group,
            experiment: ExperimentConfig::AksContainerNetworkPartition {
                cluster_name: self.cluster_name,
                namespace: self.namespace,
                isolated_zone: self.isolated_zone,
                zones: self.zones,
                duration_sec: Duration::from_secs(self.duration_sec),
            },
        }
    }
}

impl PostgresFailoverArgs {
    pub fn into_experiment(self) -> AdhocExperiment {
        AdhocExperiment {
            resource_group: self.common.resource_group,
            experiment: ExperimentConfig::PostgresFailover {
                database_name: self.database_name,
                mode: match self.mode {
                    CliFailover::Planned => FailoverMode::Planned,
                    CliFailover::Forced => FailoverMode::Forced,
                },
            },
        }
    }
}

/// Validate and run a single command-line experiment with default gateway settings.
pub async fn run(adhoc: AdhocExperiment, output: &Output) -> Result<bool> {
    logging::init();
    adhoc.experiment.validate()?;
    let runner = output.runner(ControlPlaneClient::from_config(&GatewayConfig::default()))?;
    let name = adhoc.experiment.label();
    let outcome = run_configured(&runner, name, &adhoc.resource_group, &adhoc.experiment).await;
    output.record(name, &outcome)?;
    output.finish()?;
    Ok(outcome.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_zones_split_on_commas() {
        let args = PartitionArgs {
            common: Common {
                resource_group: "rg".into(),
            },
            cluster_name: "aks".into(),
            namespace: "shop".into(),
            isolated_zone: "1".into(),
            zones: vec!["1".into(), "2".into()],
            duration_sec: 45,
        };
        let adhoc = args.into_experiment();
        assert_eq!(adhoc.resource_group, "rg");
        assert!(adhoc.experiment.validate().is_ok());
        match adhoc.experiment {
            ExperimentConfig::AksContainerNetworkPartition { duration_sec, .. } => {
                assert_eq!(duration_sec, Duration::from_secs(45))
            }
            other => panic!("unexpected experiment {other:?}"),
        }
    }
}
