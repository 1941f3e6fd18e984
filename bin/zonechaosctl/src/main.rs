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
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod adhoc;
mod report;
mod run;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "zonechaos fault-injection experiment runner",
    long_about = None
)]
struct Cli {
    #[arg(long, global = true, help = "Print each experiment outcome as JSON")]
    json: bool,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Write Prometheus text metrics to FILE once the run ends"
    )]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run every enabled experiment from a configuration file")]
    Run(run::RunOptions),
    #[command(about = "Parse and validate a configuration file without touching the cloud")]
    Validate(run::ConfigOptions),
    #[command(about = "Delete every cluster node in one availability zone")]
    ZoneDown(adhoc::ZoneDownArgs),
    #[command(about = "Deny traffic between two subnets for a bounded duration")]
    BlockNetwork(adhoc::BlockNetworkArgs),
    #[command(about = "Delete the pods matching a label selector")]
    KillPods(adhoc::KillPodsArgs),
    #[command(about = "Partition one zone's pods from the other zones")]
    Partition(adhoc::PartitionArgs),
    #[command(about = "Fail a zone-redundant PostgreSQL flexible server over")]
    PostgresFailover(adhoc::PostgresFailoverArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let output = report::Output::new(cli.json, cli.metrics_out)?;

    let succeeded = match cli.command {
        Commands::Run(options) => run::run(&options, &output).await?,
        Commands::Validate(options) => run::validate(&options)?,
        Commands::ZoneDown(args) => adhoc::run(args.into_experiment(), &output).await?,
        Commands::BlockNetwork(args) => adhoc::run(args.into_experiment(), &output).await?,
        Commands::KillPods(args) => adhoc::run(args.into_experiment(), &output).await?,
        Commands::Partition(args) => adhoc::run(args.into_experiment(), &output).await?,
        Commands::PostgresFailover(args) => adhoc::run(args.into_experiment(), &output).await?,
    };

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "zonechaosctl",
            "kill-pods",
            "--resource-group",
            "rg",
            "--cluster-name",
            "aks",
            "--namespace",
            "shop",
            "--label-selector",
            "app=cart",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::KillPods(_)));
    }
}
