//! ---
//! zc_section: "05-networking-external-interfaces"
//! zc_subsection: "binary"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Control CLI for running zone redundancy experiments."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use zonechaos_core::{
    new_registry, render_text, ControlPlaneClient, ExperimentMetrics, ExperimentOutcome,
    ExperimentRunner, SharedRegistry,
};

/// Where outcomes and metrics go once experiments finish.
pub struct Output {
    json: bool,
    metrics_out: Option<PathBuf>,
    registry: Option<SharedRegistry>,
}

impl Output {
    pub fn new(json: bool, metrics_out: Option<PathBuf>) -> Result<Self> {
        let registry = metrics_out.as_ref().map(|_| new_registry());
        Ok(Self {
            json,
            metrics_out,
            registry,
        })
    }

    pub fn runner(&self, client: ControlPlaneClient) -> Result<ExperimentRunner> {
        let runner = ExperimentRunner::new(client);
        Ok(match &self.registry {
            Some(registry) => runner.with_metrics(ExperimentMetrics::new(registry.clone())?),
            None => runner,
        })
    }

    /// Log the outcome and, with `--json`, print it to stdout.
    pub fn record(&self, name: &str, outcome: &ExperimentOutcome) -> Result<()> {
        match outcome {
            ExperimentOutcome::Failed { stage, error, .. } => {
                error!(experiment = name, stage = %stage, "{name} failed: {error}")
            }
            ExperimentOutcome::SucceededWithWarnings(report) => {
                for warning in &report.warnings {
                    warn!(experiment = name, "{warning}");
                }
                info!(experiment = name, "{name} completed successfully")
            }
            ExperimentOutcome::Succeeded(_) => {
                info!(experiment = name, "{name} completed successfully")
            }
        }
        if self.json {
            println!(
                "{}",
                serde_json::to_string(outcome).context("failed to serialise outcome")?
            );
        }
        Ok(())
    }

    pub fn finish(&self) -> Result<()> {
        if let (Some(path), Some(registry)) = (&self.metrics_out, &self.registry) {
            let text = render_text(registry)?;
            fs::write(path, text)
                .with_context(|| format!("unable to write metrics to {}", path.display()))?;
            info!(path = %path.display(), "metrics written");
        }
        Ok(())
    }
}
