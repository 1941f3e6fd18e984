//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Ownership of supporting resources created for the duration of one run.
//!
//! Invariant: a resource is deleted on release only when this run created it.
use std::fmt;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use strum::Display;
use tracing::{error, info, warn};

use crate::client::ControlPlaneClient;
use crate::error::ExperimentError;

/// A side-effect resource an experiment may need to bring into existence.
#[async_trait]
pub trait SupportingResource: Send + Sync + fmt::Debug {
    /// Stable identity used to track the resource.
    fn key(&self) -> String;

    /// Name of the existing resource, if one is already in place.
    async fn lookup(&self, client: &ControlPlaneClient) -> Result<Option<String>, ExperimentError>;

    /// Create the resource and return its name.
    async fn create(&self, client: &ControlPlaneClient) -> Result<String, ExperimentError>;

    /// Associate the freshly created resource with whatever it supports.
    async fn attach(&self, _client: &ControlPlaneClient, _name: &str) -> Result<(), ExperimentError> {
        Ok(())
    }

    /// Undo [`SupportingResource::attach`].
    async fn detach(&self, _client: &ControlPlaneClient, _name: &str) -> Result<(), ExperimentError> {
        Ok(())
    }

    async fn delete(&self, client: &ControlPlaneClient, name: &str) -> Result<(), ExperimentError>;
}

/// A tracked supporting resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedResource {
    pub key: String,
    pub name: String,
    pub created_by_experiment: bool,
    pub attached: bool,
}

/// What releasing a tracked key did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReleaseAction {
    /// Created by this run; detached and deleted.
    Deleted,
    /// Pre-existing; untouched.
    LeftInPlace,
    /// Unknown or already released key.
    NotTracked,
}

/// A release that could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseFailure {
    pub key: String,
    pub name: String,
    pub error: ExperimentError,
}

#[derive(Debug)]
struct Tracked {
    resource: Box<dyn SupportingResource>,
    owned: OwnedResource,
}

/// Records which supporting resources pre-existed and which this run created.
#[derive(Debug, Default)]
pub struct OwnershipTracker {
    records: IndexMap<String, Tracked>,
}

impl OwnershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Tracked resources in acquisition order.
    pub fn resources(&self) -> impl Iterator<Item = &OwnedResource> {
        self.records.values().map(|tracked| &tracked.owned)
    }

    pub fn get(&self, key: &str) -> Option<&OwnedResource> {
        self.records.get(key).map(|tracked| &tracked.owned)
    }

    /// Make sure `resource` exists, creating and attaching it when absent.
    ///
    /// Returns the record and whether this call created the resource. A
    /// resource that was created but failed to attach stays tracked as owned.
    pub async fn ensure(
        &mut self,
        client: &ControlPlaneClient,
        resource: Box<dyn SupportingResource>,
    ) -> Result<(OwnedResource, bool), ExperimentError> {
        let key = resource.key();
        if let Some(tracked) = self.records.get(&key) {
            return Ok((tracked.owned.clone(), false));
        }

        if let Some(name) = resource.lookup(client).await? {
            info!(
                target: "zonechaos::core::ownership",
                key = %key,
                name = %name,
                "reusing existing supporting resource"
            );
            let owned = OwnedResource {
                key: key.clone(),
                name,
                created_by_experiment: false,
                attached: true,
            };
            self.records.insert(
                key,
                Tracked {
                    resource,
                    owned: owned.clone(),
                },
            );
            return Ok((owned, false));
        }

        let name = resource.create(client).await?;
        info!(
            target: "zonechaos::core::ownership",
            key = %key,
            name = %name,
            "created supporting resource"
        );
        let attach = resource.attach(client, &name).await;
        let owned = OwnedResource {
            key: key.clone(),
            name,
            created_by_experiment: true,
            attached: attach.is_ok(),
        };
        self.records.insert(
            key,
            Tracked {
                resource,
                owned: owned.clone(),
            },
        );
        attach?;
        Ok((owned, true))
    }

    /// Release one record. The record is consumed, so its flag is read once.
    pub async fn release(
        &mut self,
        client: &ControlPlaneClient,
        key: &str,
    ) -> Result<ReleaseAction, ExperimentError> {
        let Some(tracked) = self.records.shift_remove(key) else {
            return Ok(ReleaseAction::NotTracked);
        };
        Self::release_tracked(client, tracked).await
    }

    /// Release every record in reverse acquisition order, collecting failures.
    pub async fn release_all(&mut self, client: &ControlPlaneClient) -> Vec<ReleaseFailure> {
        let mut failures = Vec::new();
        while let Some((key, tracked)) = self.records.pop() {
            let name = tracked.owned.name.clone();
            if let Err(err) = Self::release_tracked(client, tracked).await {
                failures.push(ReleaseFailure {
                    key,
                    name,
                    error: err,
                });
            }
        }
        failures
    }

    async fn release_tracked(
        client: &ControlPlaneClient,
        tracked: Tracked,
    ) -> Result<ReleaseAction, ExperimentError> {
        let Tracked { resource, owned } = tracked;
        if !owned.created_by_experiment {
            info!(
                target: "zonechaos::core::ownership",
                key = %owned.key,
                name = %owned.name,
                "leaving pre-existing resource in place"
            );
            return Ok(ReleaseAction::LeftInPlace);
        }

        if owned.attached {
            if let Err(err) = resource.detach(client, &owned.name).await {
                error!(
                    target: "zonechaos::core::ownership",
                    key = %owned.key,
                    name = %owned.name,
                    error = %err,
                    "failed to detach owned resource; manual cleanup required"
                );
                return Err(err);
            }
        } else {
            warn!(
                target: "zonechaos::core::ownership",
                key = %owned.key,
                name = %owned.name,
                "owned resource was never attached; deleting directly"
            );
        }

        if let Err(err) = resource.delete(client, &owned.name).await {
            error!(
                target: "zonechaos::core::ownership",
                key = %owned.key,
                name = %owned.name,
                error = %err,
                "failed to delete owned resource; manual cleanup required"
            );
            return Err(err);
        }
        info!(
            target: "zonechaos::core::ownership",
            key = %owned.key,
            name = %owned.name,
            "deleted owned resource"
        );
        Ok(ReleaseAction::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use zonechaos_gateway::{CommandOutput, RetryPolicy, ScriptedGateway};

    use super::*;

    /// Resource backed by plain `widget` commands on the scripted gateway.
    #[derive(Debug)]
    struct Widget(&'static str);

    async fn run(client: &ControlPlaneClient, command: String) -> Result<(), ExperimentError> {
        let output = client
            .mutate(&command)
            .await
            .map_err(|err| ExperimentError::Injection(err.to_string()))?;
        if output.is_success() {
            Ok(())
        } else {
            Err(ExperimentError::Rollback(format!("{command} failed")))
        }
    }

    #[async_trait]
    impl SupportingResource for Widget {
        fn key(&self) -> String {
            format!("widget:{}", self.0)
        }

        async fn lookup(
            &self,
            client: &ControlPlaneClient,
        ) -> Result<Option<String>, ExperimentError> {
            let output = client
                .probe(&format!("widget show {}", self.0))
                .await
                .map_err(|err| ExperimentError::Injection(err.to_string()))?;
            Ok(output.is_success().then(|| self.0.to_owned()))
        }

        async fn create(&self, client: &ControlPlaneClient) -> Result<String, ExperimentError> {
            run(client, format!("widget create {}", self.0))
                .await
                .map_err(|err| ExperimentError::Injection(err.message().to_owned()))?;
            Ok(self.0.to_owned())
        }

        async fn attach(&self, client: &ControlPlaneClient, name: &str) -> Result<(), ExperimentError> {
            run(client, format!("widget attach {name}"))
                .await
                .map_err(|err| ExperimentError::Injection(err.message().to_owned()))
        }

        async fn detach(&self, client: &ControlPlaneClient, name: &str) -> Result<(), ExperimentError> {
            run(client, format!("widget detach {name}")).await
        }

        async fn delete(&self, client: &ControlPlaneClient, name: &str) -> Result<(), ExperimentError> {
            run(client, format!("widget delete {name}")).await
        }
    }

    fn setup() -> (Arc<ScriptedGateway>, ControlPlaneClient) {
        let gateway = Arc::new(ScriptedGateway::new());
        let client = ControlPlaneClient::new(gateway.clone(), RetryPolicy::single_attempt());
        (gateway, client)
    }

    #[tokio::test]
    async fn created_resources_are_deleted_once() {
        let (gateway, client) = setup();
        gateway.on("widget show", CommandOutput::failure(3, "NotFound"));

        let mut tracker = OwnershipTracker::new();
        let (owned, created) = tracker.ensure(&client, Box::new(Widget("w1"))).await.unwrap();
        assert!(created);
        assert!(owned.created_by_experiment);

        let action = tracker.release(&client, "widget:w1").await.unwrap();
        assert_eq!(action, ReleaseAction::Deleted);
        assert!(gateway.position("widget detach w1") < gateway.position("widget delete w1"));

        let again = tracker.release(&client, "widget:w1").await.unwrap();
        assert_eq!(again, ReleaseAction::NotTracked);
        assert_eq!(gateway.count_matching("widget delete"), 1);
    }

    #[tokio::test]
    async fn pre_existing_resources_are_left_alone() {
        let (gateway, client) = setup();
        gateway.on("widget show", CommandOutput::success("w1"));

        let mut tracker = OwnershipTracker::new();
        let (_, created) = tracker.ensure(&client, Box::new(Widget("w1"))).await.unwrap();
        assert!(!created);
        assert!(tracker.release_all(&client).await.is_empty());
        assert_eq!(gateway.count_matching("widget create"), 0);
        assert_eq!(gateway.count_matching("widget delete"), 0);
        assert_eq!(gateway.count_matching("widget detach"), 0);
    }

    #[tokio::test]
    async fn failed_attach_keeps_ownership() {
        let (gateway, client) = setup();
        gateway
            .on("widget show", CommandOutput::failure(3, "NotFound"))
            .on("widget attach", CommandOutput::failure(1, "conflict"));

        let mut tracker = OwnershipTracker::new();
        let err = tracker
            .ensure(&client, Box::new(Widget("w1")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExperimentError::Injection(_)));
        let owned = tracker.get("widget:w1").unwrap();
        assert!(owned.created_by_experiment);
        assert!(!owned.attached);

        assert!(tracker.release_all(&client).await.is_empty());
        assert_eq!(gateway.count_matching("widget detach"), 0);
        assert_eq!(gateway.count_matching("widget delete w1"), 1);
    }

    #[tokio::test]
    async fn release_all_runs_in_reverse_and_collects_failures() {
        let (gateway, client) = setup();
        gateway
            .on("widget show", CommandOutput::failure(3, "NotFound"))
            .on("widget delete first", CommandOutput::failure(1, "locked"));

        let mut tracker = OwnershipTracker::new();
        tracker.ensure(&client, Box::new(Widget("first"))).await.unwrap();
        tracker.ensure(&client, Box::new(Widget("second"))).await.unwrap();

        let failures = tracker.release_all(&client).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "widget:first");
        assert!(gateway.position("widget delete second") < gateway.position("widget delete first"));
        assert!(tracker.is_empty());
    }
}
