//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display};
use tracing::warn;
use uuid::Uuid;

/// Kinds of faults the drivers know how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FaultKind {
    ZoneDelete,
    NetworkDeny,
    PodKill,
    PartitionPolicy,
    DatabaseFailover,
}

/// Lifecycle of a single fault.
///
/// `Idle → Injecting → Active → RollingBack → RolledBack`, plus the absorbing
/// `Failed` state reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FaultState {
    Idle,
    Injecting,
    Active,
    RollingBack,
    RolledBack,
    Failed,
}

impl FaultState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FaultState::RolledBack | FaultState::Failed)
    }

    pub fn can_transition_to(&self, next: FaultState) -> bool {
        use FaultState::*;
        match (self, next) {
            (Idle, Injecting)
            | (Injecting, Active)
            | (Active, RollingBack)
            | (RollingBack, RolledBack) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("illegal fault transition {from} -> {to}")]
pub struct FaultStateError {
    pub from: FaultState,
    pub to: FaultState,
}

/// One fault applied to the environment, with the driver-specific handle
/// needed to undo it.
#[derive(Debug, Clone)]
pub struct InjectedFault<H> {
    id: Uuid,
    kind: FaultKind,
    resources: Vec<String>,
    reversible: bool,
    state: FaultState,
    activated_at: Option<DateTime<Utc>>,
    handle: H,
}

impl<H> InjectedFault<H> {
    /// Start tracking a fault; the returned value is already `Injecting`.
    pub fn begin(kind: FaultKind, reversible: bool, handle: H) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            resources: Vec::new(),
            reversible,
            state: FaultState::Injecting,
            activated_at: None,
            handle,
        }
    }

    /// Record a concrete resource identifier touched by this fault.
    pub fn touch(&mut self, resource: impl Into<String>) -> &mut Self {
        self.resources.push(resource.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn is_reversible(&self) -> bool {
        self.reversible
    }

    pub fn state(&self) -> FaultState {
        self.state
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.activated_at
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    /// Reversible and active: the hold controller owes it one rollback.
    pub fn needs_rollback(&self) -> bool {
        self.reversible && self.state == FaultState::Active
    }

    pub fn activate(&mut self) -> Result<(), FaultStateError> {
        self.transition(FaultState::Active)?;
        self.activated_at = Some(Utc::now());
        Ok(())
    }

    pub fn begin_rollback(&mut self) -> Result<(), FaultStateError> {
        self.transition(FaultState::RollingBack)
    }

    pub fn complete_rollback(&mut self) -> Result<(), FaultStateError> {
        self.transition(FaultState::RolledBack)
    }

    pub fn fail(&mut self) -> Result<(), FaultStateError> {
        self.transition(FaultState::Failed)
    }

    /// Apply one lifecycle step, logging it when the state machine rejects
    /// it. The fault keeps its state in that case. Returns whether it moved.
    pub fn advance(&mut self, step: fn(&mut Self) -> Result<(), FaultStateError>) -> bool {
        match step(self) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target: "zonechaos::core::fault",
                    fault_id = %self.id,
                    kind = %self.kind,
                    error = %err,
                    "fault lifecycle step rejected"
                );
                false
            }
        }
    }

    fn transition(&mut self, next: FaultState) -> Result<(), FaultStateError> {
        if !self.state.can_transition_to(next) {
            return Err(FaultStateError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn summary(&self) -> FaultSummary {
        FaultSummary {
            id: self.id,
            kind: self.kind,
            resources: self.resources.clone(),
            reversible: self.reversible,
            state: self.state,
            activated_at: self.activated_at,
        }
    }
}

/// Handle-free view of a fault for reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultSummary {
    pub id: Uuid,
    pub kind: FaultKind,
    pub resources: Vec<String>,
    pub reversible: bool,
    pub state: FaultState,
    pub activated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_the_state_machine() {
        let mut fault = InjectedFault::begin(FaultKind::NetworkDeny, true, ());
        assert_eq!(fault.state(), FaultState::Injecting);
        assert!(!fault.needs_rollback());
        fault.activate().unwrap();
        assert!(fault.needs_rollback());
        fault.begin_rollback().unwrap();
        fault.complete_rollback().unwrap();
        assert_eq!(fault.state(), FaultState::RolledBack);
        assert!(fault.summary().activated_at.is_some());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut fault = InjectedFault::begin(FaultKind::PartitionPolicy, true, ());
        let err = fault.complete_rollback().unwrap_err();
        assert_eq!(err.from, FaultState::Injecting);
        assert_eq!(err.to, FaultState::RolledBack);

        fault.fail().unwrap();
        assert!(fault.activate().is_err());
        assert!(fault.fail().is_err());
    }

    #[test]
    fn rejected_step_is_reported_and_leaves_state_alone() {
        let mut fault = InjectedFault::begin(FaultKind::NetworkDeny, true, ());
        assert!(fault.advance(InjectedFault::fail));
        assert!(!fault.advance(InjectedFault::activate));
        assert!(!fault.advance(InjectedFault::begin_rollback));
        assert_eq!(fault.state(), FaultState::Failed);
        assert!(fault.activated_at().is_none());
    }

    #[test]
    fn irreversible_faults_never_need_rollback() {
        let mut fault = InjectedFault::begin(FaultKind::PodKill, false, ());
        fault.activate().unwrap();
        assert!(!fault.needs_rollback());
    }

    #[test]
    fn kinds_render_snake_case() {
        assert_eq!(FaultKind::PartitionPolicy.to_string(), "partition_policy");
        assert_eq!(FaultKind::ZoneDelete.as_ref(), "zone_delete");
    }
}
