//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use serde::Serialize;
use strum::{AsRefStr, Display};
use zonechaos_gateway::GatewayError;

/// Pipeline stage an experiment was in when something happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PipelineStage {
    Preflight,
    Discovery,
    Injection,
    Hold,
    Rollback,
}

/// Four-way error taxonomy shared by every experiment.
///
/// Only `Preflight` and `Discovery` guarantee that nothing was mutated.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExperimentError {
    /// Required tooling, parameters, or the target lock are unavailable.
    #[error("preflight failed: {0}")]
    Preflight(String),
    /// Topology queries failed or yielded no usable targets.
    #[error("discovery failed: {0}")]
    Discovery(String),
    /// Fault application failed partway.
    #[error("injection failed: {0}")]
    Injection(String),
    /// Cleanup failed; the environment may still be faulted.
    #[error("rollback failed: {0}")]
    Rollback(String),
}

impl ExperimentError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            ExperimentError::Preflight(_) => PipelineStage::Preflight,
            ExperimentError::Discovery(_) => PipelineStage::Discovery,
            ExperimentError::Injection(_) => PipelineStage::Injection,
            ExperimentError::Rollback(_) => PipelineStage::Rollback,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ExperimentError::Preflight(message)
            | ExperimentError::Discovery(message)
            | ExperimentError::Injection(message)
            | ExperimentError::Rollback(message) => message,
        }
    }

    /// Wrap a transport failure observed during `stage`.
    pub fn from_gateway(stage: PipelineStage, err: &GatewayError) -> Self {
        let message = err.to_string();
        match stage {
            PipelineStage::Preflight => ExperimentError::Preflight(message),
            PipelineStage::Discovery => ExperimentError::Discovery(message),
            PipelineStage::Injection => ExperimentError::Injection(message),
            PipelineStage::Hold | PipelineStage::Rollback => ExperimentError::Rollback(message),
        }
    }
}

impl Serialize for ExperimentError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn errors_map_to_stages() {
        assert_eq!(
            ExperimentError::Discovery("x".into()).stage(),
            PipelineStage::Discovery
        );
        assert_eq!(
            ExperimentError::Rollback("x".into()).stage().to_string(),
            "rollback"
        );
    }

    #[test]
    fn gateway_errors_keep_their_stage() {
        let err = GatewayError::Timeout {
            command: "az aks show".into(),
            timeout: Duration::from_secs(5),
        };
        let wrapped = ExperimentError::from_gateway(PipelineStage::Discovery, &err);
        assert!(matches!(wrapped, ExperimentError::Discovery(_)));
        assert!(wrapped.message().contains("timed out after 5s"));
    }
}
