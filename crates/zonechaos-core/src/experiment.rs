//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! The experiment pipeline shared by every fault kind:
//! preflight, discovery, injection, hold, rollback, release, result.
use zonechaos_gateway::missing_tools;
use zonechaos_logging::{
    log_experiment_event, zc_error, zc_info, zc_warn, ExperimentEventOutcome, LogContext,
};

use crate::client::ControlPlaneClient;
use crate::drivers::FaultDriver;
use crate::error::ExperimentError;
use crate::hold::{HoldController, RollbackFailure};
use crate::locks::{TargetLease, TargetLocks};
use crate::metrics::ExperimentMetrics;
use crate::outcome::{ExperimentOutcome, ExperimentReport};
use crate::ownership::OwnershipTracker;
use crate::topology::TopologySnapshot;

/// Runs drivers through the fixed experiment pipeline.
#[derive(Debug, Clone)]
pub struct ExperimentRunner {
    client: ControlPlaneClient,
    locks: TargetLocks,
    metrics: Option<ExperimentMetrics>,
}

impl ExperimentRunner {
    /// Runner using the process-wide target lock registry.
    pub fn new(client: ControlPlaneClient) -> Self {
        Self {
            client,
            locks: TargetLocks::global(),
            metrics: None,
        }
    }

    pub fn with_locks(mut self, locks: TargetLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_metrics(mut self, metrics: ExperimentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn client(&self) -> &ControlPlaneClient {
        &self.client
    }

    pub fn locks(&self) -> &TargetLocks {
        &self.locks
    }

    pub fn metrics(&self) -> Option<&ExperimentMetrics> {
        self.metrics.as_ref()
    }

    /// Run `driver` to completion. Never returns before every active
    /// reversible fault had its rollback attempt.
    pub async fn run<D: FaultDriver>(&self, experiment: &str, driver: &D) -> ExperimentOutcome {
        let kind = driver.kind();
        let target = driver.target();
        let target_label = target.to_string();
        let ctx = LogContext::new()
            .with_experiment(experiment)
            .with_fault(kind.as_ref())
            .with_target(&target_label);
        let mut report = ExperimentReport::new(experiment, kind, target.clone());
        zc_info!(context = ctx.clone().with_stage("preflight"), "starting experiment");

        let _leases = match self.preflight(driver).await {
            Ok(leases) => leases,
            Err(err) => return self.finish(report, Some(err), &ctx),
        };

        let topology = match driver.discover(&self.client).await {
            Ok(topology) => topology,
            Err(err) => return self.finish(report, Some(err), &ctx),
        };
        let snapshot: &TopologySnapshot = topology.as_ref();
        report.discovered_at = Some(snapshot.captured_at());
        report.discovered = snapshot.len();
        report.skipped = snapshot.skipped().to_vec();
        for skipped in snapshot.skipped() {
            report
                .warnings
                .push(format!("skipped {}: {}", skipped.unit, skipped.reason));
        }
        zc_info!(
            context = ctx.clone().with_stage("discovery"),
            "discovered {} unit(s), skipped {}",
            snapshot.len(),
            snapshot.skipped().len()
        );

        let mut tracker = OwnershipTracker::new();
        let injection = driver.inject(&self.client, &mut tracker, &topology).await;
        report.warnings.extend(injection.warnings.iter().cloned());
        let mut faults = injection.faults;
        let injection_error = injection.error;
        let active = faults
            .iter()
            .filter(|fault| fault.activated_at().is_some())
            .count();
        if let Some(metrics) = &self.metrics {
            metrics.record_injected(kind, active);
        }
        match &injection_error {
            Some(err) => zc_error!(
                context = ctx.clone().with_stage("injection"),
                "injection failed after {} active fault(s): {}",
                active,
                err
            ),
            None if faults.is_empty() => zc_warn!(
                context = ctx.clone().with_stage("injection"),
                "no targets selected; nothing was injected"
            ),
            None => zc_info!(
                context = ctx.clone().with_stage("injection"),
                "{} fault(s) injected",
                active
            ),
        }

        let hold = match injection_error {
            None => driver.hold_duration(),
            Some(_) => None,
        };
        let held = HoldController::new(driver, &self.client)
            .hold_and_rollback(hold, &mut faults)
            .await;
        report.held_for = held.held_for;
        report.rollback_failures.extend(held.failures);
        if let Some(metrics) = &self.metrics {
            if !held.held_for.is_zero() {
                metrics.observe_hold(kind, held.held_for);
            }
        }

        report.owned_resources = tracker.resources().cloned().collect();
        for failure in tracker.release_all(&self.client).await {
            report.rollback_failures.push(RollbackFailure {
                subject: failure.key,
                resources: vec![failure.name],
                error: failure.error,
            });
        }
        report.faults = faults.iter().map(|fault| fault.summary()).collect();

        let error = if report.rollback_failures.is_empty() {
            injection_error
        } else {
            if let Some(err) = injection_error {
                report.warnings.push(format!("injection failed first: {err}"));
            }
            Some(ExperimentError::Rollback(format!(
                "{} cleanup action(s) failed; manual intervention required: {}",
                report.rollback_failures.len(),
                report
                    .rollback_failures
                    .iter()
                    .map(|failure| failure.error.message())
                    .collect::<Vec<_>>()
                    .join("; ")
            )))
        };
        self.finish(report, error, &ctx)
    }

    async fn preflight<D: FaultDriver>(
        &self,
        driver: &D,
    ) -> Result<Vec<TargetLease>, ExperimentError> {
        let mut leases = vec![self
            .locks
            .try_acquire(&driver.target().lock_key(driver.kind()))?];
        for key in driver.supporting_lock_keys() {
            leases.push(self.locks.try_acquire(&key)?);
        }
        driver.validate()?;
        let missing = missing_tools(self.client.plane(), driver.required_tools()).await;
        if !missing.is_empty() {
            let names = missing
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ExperimentError::Preflight(format!(
                "required tools not available: {names}"
            )));
        }
        driver.prepare(&self.client).await?;
        Ok(leases)
    }

    fn finish(
        &self,
        report: ExperimentReport,
        error: Option<ExperimentError>,
        ctx: &LogContext<'_>,
    ) -> ExperimentOutcome {
        let kind = report.kind;
        let rollback_failures = report.rollback_failures.len();
        let outcome = ExperimentOutcome::conclude(report, error);
        if let Some(metrics) = &self.metrics {
            metrics.record_outcome(kind, outcome.label());
            metrics.record_rollback_failures(kind, rollback_failures);
        }

        let stage = outcome.stage().map(|stage| stage.as_ref().to_owned());
        let ctx = match &stage {
            Some(stage) => ctx.clone().with_stage(stage),
            None => ctx.clone(),
        };
        let elapsed = outcome
            .report()
            .finished_at
            .map(|finished| (finished - outcome.report().started_at).num_milliseconds())
            .unwrap_or_default();
        match &outcome {
            ExperimentOutcome::Succeeded(_) => log_experiment_event(
                Some(&ctx),
                "experiment.finished",
                &format!("experiment completed successfully in {elapsed} ms"),
                ExperimentEventOutcome::Success,
            ),
            ExperimentOutcome::SucceededWithWarnings(report) => log_experiment_event(
                Some(&ctx),
                "experiment.finished",
                &format!(
                    "experiment completed successfully with {} warning(s) in {elapsed} ms",
                    report.warnings.len()
                ),
                ExperimentEventOutcome::Degraded,
            ),
            ExperimentOutcome::Failed { error, .. } => log_experiment_event(
                Some(&ctx),
                "experiment.finished",
                &format!("experiment failed: {error}"),
                ExperimentEventOutcome::Fault,
            ),
        }
        outcome
    }
}
