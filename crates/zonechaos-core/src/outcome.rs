//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::{ExperimentError, PipelineStage};
use crate::fault::{FaultKind, FaultSummary};
use crate::hold::RollbackFailure;
use crate::ownership::OwnedResource;
use crate::target::ExperimentTarget;
use crate::topology::SkippedUnit;

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Everything observed during one experiment run.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub experiment: String,
    pub kind: FaultKind,
    pub target: ExperimentTarget,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub discovered_at: Option<DateTime<Utc>>,
    pub discovered: usize,
    pub skipped: Vec<SkippedUnit>,
    pub faults: Vec<FaultSummary>,
    pub owned_resources: Vec<OwnedResource>,
    pub warnings: Vec<String>,
    pub rollback_failures: Vec<RollbackFailure>,
    #[serde(rename = "held_for_secs", serialize_with = "serialize_secs")]
    pub held_for: Duration,
}

impl ExperimentReport {
    pub fn new(experiment: impl Into<String>, kind: FaultKind, target: ExperimentTarget) -> Self {
        Self {
            experiment: experiment.into(),
            kind,
            target,
            started_at: Utc::now(),
            finished_at: None,
            discovered_at: None,
            discovered: 0,
            skipped: Vec::new(),
            faults: Vec::new(),
            owned_resources: Vec::new(),
            warnings: Vec::new(),
            rollback_failures: Vec::new(),
            held_for: Duration::ZERO,
        }
    }
}

/// Terminal value of an experiment.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExperimentOutcome {
    Succeeded(ExperimentReport),
    SucceededWithWarnings(ExperimentReport),
    Failed {
        stage: PipelineStage,
        error: ExperimentError,
        report: ExperimentReport,
    },
}

impl ExperimentOutcome {
    /// Build the outcome for a finished report and the error that ended it, if any.
    pub fn conclude(mut report: ExperimentReport, error: Option<ExperimentError>) -> Self {
        report.finished_at = Some(Utc::now());
        match error {
            Some(error) => ExperimentOutcome::Failed {
                stage: error.stage(),
                error,
                report,
            },
            None if report.warnings.is_empty() => ExperimentOutcome::Succeeded(report),
            None => ExperimentOutcome::SucceededWithWarnings(report),
        }
    }

    /// The boolean contract of the experiment entry points.
    pub fn is_success(&self) -> bool {
        !matches!(self, ExperimentOutcome::Failed { .. })
    }

    pub fn report(&self) -> &ExperimentReport {
        match self {
            ExperimentOutcome::Succeeded(report)
            | ExperimentOutcome::SucceededWithWarnings(report)
            | ExperimentOutcome::Failed { report, .. } => report,
        }
    }

    pub fn error(&self) -> Option<&ExperimentError> {
        match self {
            ExperimentOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            ExperimentOutcome::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Metric/label form of the variant.
    pub fn label(&self) -> &'static str {
        match self {
            ExperimentOutcome::Succeeded(_) => "succeeded",
            ExperimentOutcome::SucceededWithWarnings(_) => "succeeded_with_warnings",
            ExperimentOutcome::Failed { .. } => "failed",
        }
    }
}
