//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! PostgreSQL flexible server failover to the standby zone.
use async_trait::async_trait;
use tracing::{info, warn};
use zonechaos_common::FailoverMode;
use zonechaos_gateway::Tool;

use super::{mutate_checked, FaultDriver, Injection};
use crate::client::ControlPlaneClient;
use crate::commands::az;
use crate::error::{ExperimentError, PipelineStage};
use crate::fault::{FaultKind, InjectedFault};
use crate::ownership::OwnershipTracker;
use crate::target::ExperimentTarget;
use crate::topology::{self, DatabaseTopology};

/// Zones observed around a failover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverRecord {
    pub from_zone: Option<String>,
    pub to_zone: Option<String>,
}

/// Promotes the standby of a zone-redundant flexible server.
#[derive(Debug, Clone)]
pub struct DatabaseFailoverDriver {
    target: ExperimentTarget,
    mode: FailoverMode,
}

impl DatabaseFailoverDriver {
    pub fn new(
        resource_group: impl Into<String>,
        database: impl Into<String>,
        mode: FailoverMode,
    ) -> Self {
        Self {
            target: ExperimentTarget::database(resource_group, database),
            mode,
        }
    }
}

#[async_trait]
impl FaultDriver for DatabaseFailoverDriver {
    type Topology = DatabaseTopology;
    type Handle = FailoverRecord;

    fn kind(&self) -> FaultKind {
        FaultKind::DatabaseFailover
    }

    fn target(&self) -> &ExperimentTarget {
        &self.target
    }

    fn required_tools(&self) -> &'static [Tool] {
        &[Tool::AzureCli]
    }

    fn validate(&self) -> Result<(), ExperimentError> {
        if self.target.resource().trim().is_empty() {
            return Err(ExperimentError::Preflight("database name is empty".into()));
        }
        Ok(())
    }

    async fn discover(&self, client: &ControlPlaneClient) -> Result<DatabaseTopology, ExperimentError> {
        let database = self.target.resource();
        let topology =
            topology::discover_database(client, self.target.resource_group(), database).await?;
        if !topology.is_zone_redundant() {
            return Err(ExperimentError::Discovery(format!(
                "database '{database}' is not configured for zone-redundant high availability"
            )));
        }
        info!(
            target: "zonechaos::core::drivers::db_failover",
            database,
            zone = topology.zone.as_deref().unwrap_or("unknown"),
            "database is HA enabled"
        );
        Ok(topology)
    }

    async fn inject(
        &self,
        client: &ControlPlaneClient,
        _tracker: &mut OwnershipTracker,
        topology: &DatabaseTopology,
    ) -> Injection<FailoverRecord> {
        let resource_group = self.target.resource_group();
        let database = self.target.resource();
        let forced = self.mode == FailoverMode::Forced;
        let mut injection = Injection::new();

        let mut fault = InjectedFault::begin(
            FaultKind::DatabaseFailover,
            false,
            FailoverRecord {
                from_zone: topology.zone.clone(),
                to_zone: None,
            },
        );
        fault.touch(database);

        info!(
            target: "zonechaos::core::drivers::db_failover",
            database,
            forced,
            "starting failover"
        );
        let restarted = mutate_checked(
            client,
            &az::postgres_failover(resource_group, database, forced),
            PipelineStage::Injection,
            &format!("fail over database '{database}'"),
        )
        .await;
        if let Err(err) = restarted {
            fault.advance(InjectedFault::fail);
            injection.faults.push(fault);
            return injection.abort(err);
        }
        fault.advance(InjectedFault::activate);

        match topology::discover_database(client, resource_group, database).await {
            Ok(after) => {
                info!(
                    target: "zonechaos::core::drivers::db_failover",
                    database,
                    zone = after.zone.as_deref().unwrap_or("unknown"),
                    "failover completed"
                );
                if after.zone.is_some() && after.zone == topology.zone {
                    injection.warn(format!(
                        "database '{database}' still reports zone {} after failover",
                        after.zone.as_deref().unwrap_or_default()
                    ));
                }
                fault.handle_mut().to_zone = after.zone;
            }
            Err(err) => {
                warn!(
                    target: "zonechaos::core::drivers::db_failover",
                    database,
                    error = %err,
                    "could not read database zone after failover"
                );
                injection.warn(format!(
                    "zone of database '{database}' after failover is unknown: {}",
                    err.message()
                ));
            }
        }
        injection.faults.push(fault);
        injection
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use zonechaos_gateway::{CommandOutput, RetryPolicy, ScriptedGateway};

    use super::*;

    fn redundant_in(zone: &str) -> DatabaseTopology {
        DatabaseTopology {
            snapshot: Default::default(),
            ha_mode: Some("ZoneRedundant".into()),
            zone: Some(zone.into()),
        }
    }

    #[tokio::test]
    async fn planned_failover_records_both_zones() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on(
            "flexible-server show",
            CommandOutput::success(
                r#"{"highAvailability":{"mode":"ZoneRedundant"},"availabilityZone":"2"}"#,
            ),
        );
        let client = ControlPlaneClient::new(gateway.clone(), RetryPolicy::single_attempt());
        let driver = DatabaseFailoverDriver::new("rg", "pg", FailoverMode::Planned);
        let mut tracker = OwnershipTracker::new();

        let injection = driver.inject(&client, &mut tracker, &redundant_in("1")).await;
        assert!(injection.error.is_none());
        assert!(injection.warnings.is_empty());
        assert_eq!(
            gateway.first_call("flexible-server restart").unwrap().command,
            "az postgres flexible-server restart --resource-group rg --name pg --failover Planned"
        );
        assert_eq!(
            injection.faults[0].handle(),
            &FailoverRecord {
                from_zone: Some("1".into()),
                to_zone: Some("2".into()),
            }
        );
    }

    #[tokio::test]
    async fn unchanged_zone_is_a_warning() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.on(
            "flexible-server show",
            CommandOutput::success(
                r#"{"highAvailability":{"mode":"ZoneRedundant"},"availabilityZone":"1"}"#,
            ),
        );
        let client = ControlPlaneClient::new(gateway.clone(), RetryPolicy::single_attempt());
        let driver = DatabaseFailoverDriver::new("rg", "pg", FailoverMode::Forced);
        let mut tracker = OwnershipTracker::new();

        let injection = driver.inject(&client, &mut tracker, &redundant_in("1")).await;
        assert!(injection.error.is_none());
        assert!(injection.warnings[0].contains("still reports zone 1"));
    }

    #[test]
    fn empty_database_name_is_rejected() {
        let driver = DatabaseFailoverDriver::new("rg", "", FailoverMode::Forced);
        assert!(matches!(driver.validate(), Err(ExperimentError::Preflight(_))));
    }
}
