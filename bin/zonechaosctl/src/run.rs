//! ---
//! zc_section: "05-networking-external-interfaces"
//! zc_subsection: "binary"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Control CLI for running zone redundancy experiments."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::{info, Instrument};
use zonechaos_common::{init_tracing, AppConfig, LoadedAppConfig};
use zonechaos_core::{run_configured, ControlPlaneClient};

use crate::report::Output;

/// Options shared by the configuration-driven commands.
#[derive(Debug, Args)]
pub struct ConfigOptions {
    /// Path to the experiment configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RunOptions {
    #[command(flatten)]
    pub config: ConfigOptions,
    /// Run only the enabled experiments with this name (repeatable).
    #[arg(long = "only", value_name = "NAME")]
    pub only: Vec<String>,
}

impl RunOptions {
    fn selects(&self, name: &str) -> bool {
        self.only.is_empty() || self.only.iter().any(|only| only == name)
    }
}

fn load(options: &ConfigOptions) -> Result<LoadedAppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = &options.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/zonechaos.toml"));
    candidates.push(PathBuf::from("configs/example.toml"));
    AppConfig::load_with_source(&candidates)
}

/// Run every enabled experiment in order. Later experiments still run after
/// an earlier one fails; the return value reports whether all succeeded.
pub async fn run(options: &RunOptions, output: &Output) -> Result<bool> {
    let LoadedAppConfig { config, source } = load(&options.config)?;
    let session = init_tracing("zonechaosctl", &config.logging)?;
    info!(config_path = %source.display(), run_id = %session.run_id(), "configuration loaded");

    let runner = output.runner(ControlPlaneClient::from_config(&config.gateway))?;
    let all_succeeded = async {
        let mut all_succeeded = true;
        let selected = config
            .enabled_experiments()
            .filter(|entry| options.selects(entry.display_name()));
        for (index, entry) in selected.enumerate() {
            let name = entry.display_name();
            info!("Experiment {}: {}", index + 1, name);
            let outcome = run_configured(
                &runner,
                name,
                config.resource_group_for(entry),
                &entry.experiment,
            )
            .await;
            all_succeeded &= outcome.is_success();
            output.record(name, &outcome)?;
        }
        info!("All experiments completed");
        anyhow::Ok(all_succeeded)
    }
    .instrument(session.span().clone())
    .await?;
    output.finish()?;
    Ok(all_succeeded)
}

pub fn validate(options: &ConfigOptions) -> Result<bool> {
    let LoadedAppConfig { config, source } = load(options)?;
    let enabled = config.enabled_experiments().count();
    println!(
        "{}: {} experiment(s), {} enabled",
        source.display(),
        config.experiments.len(),
        enabled
    );
    for entry in &config.experiments {
        println!(
            "  [{}] {} ({})",
            if entry.enabled { "x" } else { " " },
            entry.display_name(),
            entry.experiment.label()
        );
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_only_list_selects_everything() {
        let mut options = RunOptions {
            config: ConfigOptions { config: None },
            only: Vec::new(),
        };
        assert!(options.selects("PostgreSQL failover"));
        options.only.push("AKS zone down".into());
        assert!(options.selects("AKS zone down"));
        assert!(!options.selects("PostgreSQL failover"));
    }
}
