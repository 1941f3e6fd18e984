//! ---
//! zc_section: "15-testing-qa-runbook"
//! zc_subsection: "integration-tests"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Repository layout and shipped configuration checks."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use zonechaos_common::{AppConfig, ExperimentConfig, FailoverMode};

fn root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..")
}

fn read(path: &str) -> String {
    let full = root().join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

fn rust_sources(dir: &Path, out: &mut Vec<PathBuf>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            rust_sources(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

#[test]
fn example_config_parses_and_enables_only_the_failover() {
    let config: AppConfig = read("configs/example.toml").parse().unwrap();
    assert_eq!(config.experiments.len(), 5);

    let enabled: Vec<_> = config.enabled_experiments().collect();
    assert_eq!(enabled.len(), 1);
    assert_eq!(
        enabled[0].experiment,
        ExperimentConfig::PostgresFailover {
            database_name: "chaos-test-pgdb".into(),
            mode: FailoverMode::Forced,
        }
    );

    let labels: Vec<_> = config
        .experiments
        .iter()
        .map(|entry| entry.experiment.label())
        .collect();
    assert_eq!(
        labels,
        [
            "block_network_access",
            "aks_zone_down",
            "aks_kill_pods",
            "aks_container_network_partition",
            "postgres_failover",
        ]
    );
}

#[test]
fn sources_and_manifests_carry_frontmatter() {
    let mut sources = Vec::new();
    for dir in ["crates", "bin"] {
        rust_sources(&root().join(dir), &mut sources);
    }
    assert!(!sources.is_empty());
    for path in sources {
        let content = fs::read_to_string(&path).unwrap();
        assert!(
            content.starts_with("//! ---"),
            "{} must include frontmatter header",
            path.display()
        );
        assert!(content.contains("zc_version:"), "{} lacks zc_version", path.display());
    }

    for manifest in [
        "Cargo.toml",
        "crates/zonechaos-core/Cargo.toml",
        "bin/zonechaosctl/Cargo.toml",
        "configs/example.toml",
    ] {
        assert!(
            read(manifest).starts_with("# ---"),
            "{manifest} must include frontmatter header"
        );
    }
}
