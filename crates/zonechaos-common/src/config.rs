//! ---
//! zc_section: "01-core-functionality"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Shared primitives and utilities for the experiment runtime."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_enabled() -> bool {
    true
}

fn default_shell() -> String {
    "sh".to_owned()
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_retry_attempts() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_jitter_ms() -> u64 {
    100
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_zones() -> Vec<String> {
    vec!["1".to_owned(), "2".to_owned(), "3".to_owned()]
}

/// Primary configuration object: global settings plus the experiment list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Resource group used by experiments that do not override it.
    pub resource_group: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Experiments in execution order.
    #[serde(default)]
    pub experiments: Vec<ExperimentEntry>,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "ZONECHAOS_CONFIG";

    /// Load configuration from disk, respecting the `ZONECHAOS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Experiments with `enabled = true`, in declaration order.
    pub fn enabled_experiments(&self) -> impl Iterator<Item = &ExperimentEntry> {
        self.experiments.iter().filter(|entry| entry.enabled)
    }

    /// Effective resource group for an experiment entry.
    pub fn resource_group_for<'a>(&'a self, entry: &'a ExperimentEntry) -> &'a str {
        entry
            .resource_group
            .as_deref()
            .unwrap_or(self.resource_group.as_str())
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.resource_group.trim().is_empty() {
            return Err(anyhow!("resource_group must not be empty"));
        }
        if self.experiments.is_empty() {
            return Err(anyhow!("configuration must contain at least one experiment"));
        }
        self.gateway.validate()?;
        for (index, entry) in self.experiments.iter().enumerate() {
            entry
                .experiment
                .validate()
                .with_context(|| format!("experiment #{} ({})", index + 1, entry.display_name()))?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// One configured experiment together with its toggle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides [`AppConfig::resource_group`] for this experiment only.
    #[serde(default)]
    pub resource_group: Option<String>,
    #[serde(flatten)]
    pub experiment: ExperimentConfig,
}

impl ExperimentEntry {
    /// Operator-facing label: the configured name, or the experiment type.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.experiment.label())
    }
}

/// Supported experiments and their fault parameters.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExperimentConfig {
    /// Deny traffic between two subnets for a bounded duration.
    BlockNetworkAccess {
        vnet: String,
        subnet_source: String,
        subnet_dest: String,
        #[serde_as(as = "DurationSeconds<u64>")]
        duration_sec: Duration,
    },
    /// Delete every cluster node located in one availability zone.
    AksZoneDown {
        cluster_name: String,
        #[serde(deserialize_with = "deserialize_string")]
        target_zone: String,
    },
    /// Delete pods matching a label selector.
    AksKillPods {
        cluster_name: String,
        namespace: String,
        label_selector: String,
        #[serde(default)]
        mode: EvictionMode,
    },
    /// Partition one zone's pods from every other zone for a bounded duration.
    AksContainerNetworkPartition {
        cluster_name: String,
        namespace: String,
        #[serde(deserialize_with = "deserialize_string")]
        isolated_zone: String,
        #[serde(default = "default_zones")]
        zones: Vec<String>,
        #[serde_as(as = "DurationSeconds<u64>")]
        duration_sec: Duration,
    },
    /// Fail a zone-redundant PostgreSQL flexible server over to its standby.
    PostgresFailover {
        database_name: String,
        #[serde(default)]
        mode: FailoverMode,
    },
}

impl ExperimentConfig {
    /// Static label matching the serialized `type` tag.
    pub fn label(&self) -> &'static str {
        match self {
            ExperimentConfig::BlockNetworkAccess { .. } => "block_network_access",
            ExperimentConfig::AksZoneDown { .. } => "aks_zone_down",
            ExperimentConfig::AksKillPods { .. } => "aks_kill_pods",
            ExperimentConfig::AksContainerNetworkPartition { .. } => {
                "aks_container_network_partition"
            }
            ExperimentConfig::PostgresFailover { .. } => "postgres_failover",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ExperimentConfig::BlockNetworkAccess {
                vnet,
                subnet_source,
                subnet_dest,
                duration_sec,
            } => {
                require_non_empty("vnet", vnet)?;
                require_non_empty("subnet_source", subnet_source)?;
                require_non_empty("subnet_dest", subnet_dest)?;
                if subnet_source == subnet_dest {
                    return Err(anyhow!("subnet_source and subnet_dest must differ"));
                }
                require_positive("duration_sec", *duration_sec)
            }
            ExperimentConfig::AksZoneDown {
                cluster_name,
                target_zone,
            } => {
                require_non_empty("cluster_name", cluster_name)?;
                require_identifier("target_zone", target_zone)
            }
            ExperimentConfig::AksKillPods {
                cluster_name,
                namespace,
                label_selector,
                ..
            } => {
                require_non_empty("cluster_name", cluster_name)?;
                require_non_empty("namespace", namespace)?;
                require_non_empty("label_selector", label_selector)
            }
            ExperimentConfig::AksContainerNetworkPartition {
                cluster_name,
                namespace,
                isolated_zone,
                zones,
                duration_sec,
            } => {
                require_non_empty("cluster_name", cluster_name)?;
                require_non_empty("namespace", namespace)?;
                for zone in zones {
                    require_identifier("zones", zone)?;
                }
                if !zones.iter().any(|zone| zone == isolated_zone) {
                    return Err(anyhow!(
                        "isolated_zone '{}' is not one of the cluster zones [{}]",
                        isolated_zone,
                        zones.join(", ")
                    ));
                }
                if zones.len() < 2 {
                    return Err(anyhow!("a partition needs at least two zones"));
                }
                require_positive("duration_sec", *duration_sec)
            }
            ExperimentConfig::PostgresFailover { database_name, .. } => {
                require_non_empty("database_name", database_name)
            }
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} must not be empty", field));
    }
    Ok(())
}

/// Zone numbers and pool names are spliced into CLI queries.
fn require_identifier(field: &str, value: &str) -> Result<()> {
    require_non_empty(field, value)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return Err(anyhow!(
            "{} '{}' may only contain letters, digits, '-' and '_'",
            field,
            value
        ));
    }
    Ok(())
}

fn require_positive(field: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(anyhow!("{} must be greater than zero", field));
    }
    Ok(())
}

fn deserialize_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;

    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("string or integer")
        }

        fn visit_str<E>(self, value: &str) -> Result<String, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_owned())
        }

        fn visit_u64<E>(self, value: u64) -> Result<String, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<String, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(Visitor)
}

/// How pods are evicted by the pod-kill experiment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionMode {
    /// 30 second grace period.
    #[default]
    Graceful,
    /// Zero grace period with `--force`.
    Forced,
}

/// Failover flavour requested from the database service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailoverMode {
    #[default]
    Planned,
    Forced,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Per-call timeout applied to every control-plane command.
    #[serde(default = "default_call_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub call_timeout: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            call_timeout: default_call_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("gateway.shell", &self.shell)?;
        require_positive("gateway.call_timeout", self.call_timeout)
    }
}

/// Retry schedule for idempotent discovery queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            jitter_ms: default_retry_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        resource_group = "test"

        [gateway]
        call_timeout = 60

        [[experiments]]
        name = "Experiment 1"
        enabled = false
        type = "block_network_access"
        vnet = "chaos-vnet"
        subnet_source = "SubnetA"
        subnet_dest = "SubnetB"
        duration_sec = 30

        [[experiments]]
        type = "aks_zone_down"
        cluster_name = "aks-test-1"
        target_zone = 1

        [[experiments]]
        type = "postgres_failover"
        resource_group = "db-rg"
        database_name = "test-pgdb"
        mode = "forced"
    "#;

    #[test]
    fn parses_experiment_list_with_defaults() {
        let config: AppConfig = SAMPLE.parse().unwrap();
        assert_eq!(config.experiments.len(), 3);
        assert_eq!(config.gateway.call_timeout, Duration::from_secs(60));
        assert_eq!(config.gateway.retry.max_attempts, 3);

        let enabled: Vec<_> = config.enabled_experiments().collect();
        assert_eq!(enabled.len(), 2);
        assert_eq!(enabled[0].display_name(), "aks_zone_down");
        assert_eq!(
            enabled[0].experiment,
            ExperimentConfig::AksZoneDown {
                cluster_name: "aks-test-1".into(),
                target_zone: "1".into(),
            }
        );
        assert_eq!(config.resource_group_for(enabled[0]), "test");
        assert_eq!(config.resource_group_for(enabled[1]), "db-rg");
        assert!(matches!(
            enabled[1].experiment,
            ExperimentConfig::PostgresFailover {
                mode: FailoverMode::Forced,
                ..
            }
        ));
        assert_eq!(config.experiments[0].display_name(), "Experiment 1");
    }

    #[test]
    fn partition_requires_isolated_zone_in_zone_set() {
        let err = r#"
            resource_group = "test"
            [[experiments]]
            type = "aks_container_network_partition"
            cluster_name = "aks"
            namespace = "shop"
            isolated_zone = "4"
            duration_sec = 10
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("isolated_zone '4'"));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let err = r#"
            resource_group = "test"
            [[experiments]]
            type = "block_network_access"
            vnet = "v"
            subnet_source = "a"
            subnet_dest = "b"
            duration_sec = 0
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("duration_sec must be greater than zero"));
    }

    #[test]
    fn zone_with_shell_syntax_is_rejected() {
        let err = r#"
            resource_group = "test"
            [[experiments]]
            type = "aks_zone_down"
            cluster_name = "aks"
            target_zone = "1$(echo INJECTED >&2)"
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("target_zone '1$(echo INJECTED >&2)' may only contain"));

        let err = r#"
            resource_group = "test"
            [[experiments]]
            type = "aks_container_network_partition"
            cluster_name = "aks"
            namespace = "shop"
            isolated_zone = "1"
            zones = ["1", "2`id`"]
            duration_sec = 10
        "#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(format!("{err:#}").contains("zones '2`id`'"));
    }

    #[test]
    fn empty_experiment_list_is_rejected() {
        assert!("resource_group = \"test\"".parse::<AppConfig>().is_err());
    }

    #[test]
    fn loads_first_existing_candidate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let missing = PathBuf::from("does/not/exist.toml");
        let loaded =
            AppConfig::load_with_source(&[missing, file.path().to_path_buf()]).unwrap();
        assert_eq!(loaded.source, file.path());
        assert_eq!(loaded.config.resource_group, "test");
    }
}
