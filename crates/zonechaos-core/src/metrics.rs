//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::fault::FaultKind;

/// Shared registry type used by the runner and the CLI.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every family in `registry` in the text exposition format.
pub fn render_text(registry: &Registry) -> Result<String> {
    let families = registry.gather();
    Ok(TextEncoder::new().encode_to_string(&families)?)
}

/// Metrics published by the experiment runner.
#[derive(Clone)]
pub struct ExperimentMetrics {
    registry: SharedRegistry,
    experiments_total: IntCounterVec,
    injected_faults_total: IntCounterVec,
    rollback_failures_total: IntCounterVec,
    hold_seconds: HistogramVec,
}

impl ExperimentMetrics {
    /// Register the experiment metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let experiments_total = IntCounterVec::new(
            Opts::new(
                "zonechaos_experiments_total",
                "Experiments finished, by fault kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(experiments_total.clone()))?;

        let injected_faults_total = IntCounterVec::new(
            Opts::new(
                "zonechaos_injected_faults_total",
                "Faults that reached the active state",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(injected_faults_total.clone()))?;

        let rollback_failures_total = IntCounterVec::new(
            Opts::new(
                "zonechaos_rollback_failures_total",
                "Rollback or release actions that failed and need manual cleanup",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(rollback_failures_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "zonechaos_hold_seconds",
            "Observed time a fault was held before rollback",
        )
        .buckets(prometheus::exponential_buckets(1.0, 2.0, 12)?);
        let hold_seconds = HistogramVec::new(histogram_opts, &["kind"])?;
        registry.register(Box::new(hold_seconds.clone()))?;

        Ok(Self {
            registry,
            experiments_total,
            injected_faults_total,
            rollback_failures_total,
            hold_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_outcome(&self, kind: FaultKind, outcome: &str) {
        self.experiments_total
            .with_label_values(&[kind.as_ref(), outcome])
            .inc();
    }

    pub fn record_injected(&self, kind: FaultKind, count: usize) {
        self.injected_faults_total
            .with_label_values(&[kind.as_ref()])
            .inc_by(count as u64);
    }

    pub fn record_rollback_failures(&self, kind: FaultKind, count: usize) {
        if count == 0 {
            return;
        }
        self.rollback_failures_total
            .with_label_values(&[kind.as_ref()])
            .inc_by(count as u64);
    }

    pub fn observe_hold(&self, kind: FaultKind, held_for: Duration) {
        self.hold_seconds
            .with_label_values(&[kind.as_ref()])
            .observe(held_for.as_secs_f64());
    }
}

impl std::fmt::Debug for ExperimentMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentMetrics").finish_non_exhaustive()
    }
}
