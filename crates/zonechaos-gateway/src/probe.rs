//! ---
//! zc_section: "05-networking-external-interfaces"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Control-plane gateway and command execution."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
use strum::{AsRefStr, Display};
use tracing::{debug, warn};

use crate::ControlPlane;

/// Client tools an experiment may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Tool {
    /// Azure CLI (`az`).
    #[strum(to_string = "az")]
    AzureCli,
    /// Kubernetes CLI.
    Kubectl,
    /// Helm package manager.
    Helm,
}

impl Tool {
    /// Cheap, side-effect free command used to detect the tool.
    pub fn probe_command(&self) -> &'static str {
        match self {
            Tool::AzureCli => "az version --output none",
            Tool::Kubectl => "kubectl version --client",
            Tool::Helm => "helm version --short",
        }
    }
}

/// Return whether `tool` answers its probe command successfully.
pub async fn probe(plane: &dyn ControlPlane, tool: Tool) -> bool {
    match plane.execute(tool.probe_command()).await {
        Ok(output) if output.is_success() => {
            debug!(target: "zonechaos::gateway::probe", tool = %tool, "tool available");
            true
        }
        Ok(output) => {
            warn!(
                target: "zonechaos::gateway::probe",
                tool = %tool,
                status = output.status,
                diagnostic = %output.diagnostic(),
                "tool probe failed"
            );
            false
        }
        Err(err) => {
            warn!(target: "zonechaos::gateway::probe", tool = %tool, error = %err, "tool probe failed");
            false
        }
    }
}

/// Probe every tool and return the ones that are missing, in input order.
pub async fn missing_tools(plane: &dyn ControlPlane, tools: &[Tool]) -> Vec<Tool> {
    let mut missing = Vec::new();
    for tool in tools {
        if !probe(plane, *tool).await {
            missing.push(*tool);
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandOutput, ScriptedGateway};

    #[test]
    fn tool_names_match_binaries() {
        assert_eq!(Tool::AzureCli.to_string(), "az");
        assert_eq!(Tool::Kubectl.to_string(), "kubectl");
        assert_eq!(Tool::Helm.as_ref(), "helm");
    }

    #[tokio::test]
    async fn reports_only_missing_tools() {
        let gateway = ScriptedGateway::new();
        gateway.on("helm version", CommandOutput::failure(127, "helm: not found"));
        let missing = missing_tools(&gateway, &[Tool::AzureCli, Tool::Helm, Tool::Kubectl]).await;
        assert_eq!(missing, vec![Tool::Helm]);
    }
}
