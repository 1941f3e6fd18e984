//! ---
//! zc_section: "03-logging"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Structured logging adapters for the experiment trail."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
#![warn(missing_docs)]

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber for ad-hoc runs without a config file.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Experiment label (configured name or experiment type).
    pub experiment: Option<&'a str>,
    /// Fault kind being exercised.
    pub fault: Option<&'a str>,
    /// Human-readable target description.
    pub target: Option<&'a str>,
    /// Pipeline stage the event belongs to.
    pub stage: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an experiment label.
    pub fn with_experiment(mut self, experiment: &'a str) -> Self {
        self.experiment = Some(experiment);
        self
    }

    /// Attach a fault kind.
    pub fn with_fault(mut self, fault: &'a str) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Attach a target description.
    pub fn with_target(mut self, target: &'a str) -> Self {
        self.target = Some(target);
        self
    }

    /// Attach a pipeline stage.
    pub fn with_stage(mut self, stage: &'a str) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// Terminal outcome used when emitting experiment lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentEventOutcome {
    /// The experiment completed and cleaned up.
    Success,
    /// The experiment completed but reported warnings.
    Degraded,
    /// The experiment failed or could not clean up.
    Fault,
}

impl ExperimentEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ExperimentEventOutcome::Success => "success",
            ExperimentEventOutcome::Degraded => "degraded",
            ExperimentEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized experiment event with its outcome.
pub fn log_experiment_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: ExperimentEventOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    // `tracing::event!` requires a constant level.
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.as_str(),
                experiment = ctx.experiment.unwrap_or(""),
                fault = ctx.fault.unwrap_or(""),
                experiment_target = ctx.target.unwrap_or(""),
                stage = ctx.stage.unwrap_or(""),
                message = %message
            )
        };
    }
    match outcome {
        ExperimentEventOutcome::Success => emit!(Level::INFO),
        ExperimentEventOutcome::Degraded => emit!(Level::WARN),
        ExperimentEventOutcome::Fault => emit!(Level::ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_experiment("aks_zone_down")
            .with_stage("discovery");
        zc_info!(context = ctx.clone(), "discovered {} node pools", 2);
        zc_debug!("debug message");
        zc_warn!(context = ctx.clone(), "pool skipped");
        zc_error!(context = ctx, "error code: {}", 42);
    }

    #[test]
    fn experiment_event_helper_emits() {
        init();
        let ctx = LogContext::new()
            .with_experiment("block_network_access")
            .with_fault("network_deny");
        log_experiment_event(
            Some(&ctx),
            "experiment.finished",
            "experiment completed",
            ExperimentEventOutcome::Success,
        );
        log_experiment_event(
            None,
            "experiment.finished",
            "rollback failed",
            ExperimentEventOutcome::Fault,
        );
    }
}
