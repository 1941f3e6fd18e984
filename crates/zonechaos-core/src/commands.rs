//! ---
//! zc_section: "07-fault-injection"
//! zc_subsection: "module"
//! zc_type: "source"
//! zc_scope: "code"
//! zc_description: "Fault-injection orchestration and experiment pipeline."
//! zc_version: "v0.0.0-prealpha"
//! zc_owner: "tbd"
//! ---
//! Vendor command lines. Everything `az`/`kubectl`/`helm` specific lives here
//! so orchestration code only deals in intents.

/// Single-quote `value` for `sh -c` unless it is made of safe characters.
pub fn quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '='));
    if safe {
        value.to_owned()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Zone numbers and node pool names end up inside JMESPath literals, so
/// they are limited to `[A-Za-z0-9_-]`.
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
}

pub mod az {
    use super::quote;

    pub fn aks_node_resource_group(resource_group: &str, cluster: &str) -> String {
        format!(
            "az aks show --resource-group {} --name {} --query nodeResourceGroup -o tsv",
            quote(resource_group),
            quote(cluster)
        )
    }

    pub fn aks_get_credentials(resource_group: &str, cluster: &str) -> String {
        format!(
            "az aks get-credentials --resource-group {} --name {} --overwrite-existing",
            quote(resource_group),
            quote(cluster)
        )
    }

    pub fn aks_nodepool_list(resource_group: &str, cluster: &str) -> String {
        format!(
            "az aks nodepool list --resource-group {} --cluster-name {} -o json",
            quote(resource_group),
            quote(cluster)
        )
    }

    pub fn vmss_for_pool(node_resource_group: &str, pool: &str) -> String {
        let query = format!("[?contains(name, '{pool}')].name");
        format!(
            "az vmss list --resource-group {} --query {} -o tsv",
            quote(node_resource_group),
            quote(&query)
        )
    }

    pub fn vmss_instances_in_zone(node_resource_group: &str, vmss: &str, zone: &str) -> String {
        let query = format!("[?zones[0]=='{zone}'].osProfile.computerName");
        format!(
            "az vmss list-instances --resource-group {} --name {} --query {} -o tsv",
            quote(node_resource_group),
            quote(vmss),
            quote(&query)
        )
    }

    pub fn aks_delete_machines(
        resource_group: &str,
        cluster: &str,
        pool: &str,
        machines: &[String],
    ) -> String {
        let machines = machines
            .iter()
            .map(|machine| quote(machine))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "az aks nodepool delete-machines --resource-group {} --cluster-name {} --nodepool-name {} --machine-names {}",
            quote(resource_group),
            quote(cluster),
            quote(pool),
            machines
        )
    }

    pub fn subnet_nsg_id(resource_group: &str, vnet: &str, subnet: &str) -> String {
        format!(
            "az network vnet subnet show --resource-group {} --vnet-name {} --name {} --query \"networkSecurityGroup.id\" -o tsv",
            quote(resource_group),
            quote(vnet),
            quote(subnet)
        )
    }

    pub fn subnet_address_prefix(resource_group: &str, vnet: &str, subnet: &str) -> String {
        format!(
            "az network vnet subnet show --resource-group {} --vnet-name {} --name {} --query \"addressPrefix\" -o tsv",
            quote(resource_group),
            quote(vnet),
            quote(subnet)
        )
    }

    pub fn nsg_create(resource_group: &str, nsg: &str) -> String {
        format!(
            "az network nsg create --resource-group {} --name {}",
            quote(resource_group),
            quote(nsg)
        )
    }

    pub fn nsg_delete(resource_group: &str, nsg: &str) -> String {
        format!(
            "az network nsg delete --resource-group {} --name {}",
            quote(resource_group),
            quote(nsg)
        )
    }

    /// Associate `nsg` with the subnet, or detach when `nsg` is `None`.
    pub fn subnet_set_nsg(
        resource_group: &str,
        vnet: &str,
        subnet: &str,
        nsg: Option<&str>,
    ) -> String {
        format!(
            "az network vnet subnet update --resource-group {} --vnet-name {} --name {} --network-security-group {}",
            quote(resource_group),
            quote(vnet),
            quote(subnet),
            nsg.map(quote).unwrap_or_else(|| "null".to_owned())
        )
    }

    pub fn nsg_rule_show(resource_group: &str, nsg: &str, rule: &str) -> String {
        format!(
            "az network nsg rule show --resource-group {} --nsg-name {} --name {} -o tsv --query name",
            quote(resource_group),
            quote(nsg),
            quote(rule)
        )
    }

    pub fn nsg_deny_rule_create(
        resource_group: &str,
        nsg: &str,
        rule: &str,
        priority: u16,
        source_prefix: &str,
        destination_prefix: &str,
    ) -> String {
        format!(
            "az network nsg rule create --resource-group {} --nsg-name {} --name {} --priority {} --direction Inbound --access Deny --protocol '*' --source-address-prefixes {} --destination-address-prefixes {} --destination-port-ranges '*'",
            quote(resource_group),
            quote(nsg),
            quote(rule),
            priority,
            quote(source_prefix),
            quote(destination_prefix)
        )
    }

    pub fn nsg_rule_delete(resource_group: &str, nsg: &str, rule: &str) -> String {
        format!(
            "az network nsg rule delete --resource-group {} --nsg-name {} --name {}",
            quote(resource_group),
            quote(nsg),
            quote(rule)
        )
    }

    pub fn postgres_show(resource_group: &str, server: &str) -> String {
        format!(
            "az postgres flexible-server show --resource-group {} --name {} -o json",
            quote(resource_group),
            quote(server)
        )
    }

    pub fn postgres_failover(resource_group: &str, server: &str, forced: bool) -> String {
        format!(
            "az postgres flexible-server restart --resource-group {} --name {} --failover {}",
            quote(resource_group),
            quote(server),
            if forced { "Forced" } else { "Planned" }
        )
    }
}

pub mod kubectl {
    use super::quote;

    pub fn pods_by_selector(namespace: &str, label_selector: &str) -> String {
        format!(
            "kubectl get pods -n {} -l {} -o json",
            quote(namespace),
            quote(label_selector)
        )
    }

    pub fn pods_in_namespace(namespace: &str) -> String {
        format!("kubectl get pods -n {} -o json", quote(namespace))
    }

    pub fn nodes() -> String {
        "kubectl get nodes -o json".to_owned()
    }

    pub fn delete_pods(namespace: &str, label_selector: &str, forced: bool) -> String {
        let grace = if forced {
            "--grace-period=0 --force"
        } else {
            "--grace-period=30"
        };
        format!(
            "kubectl delete pod -l {} -n {} {} --ignore-not-found",
            quote(label_selector),
            quote(namespace),
            grace
        )
    }

    pub fn label_pod(namespace: &str, pod: &str, key: &str, value: &str) -> String {
        format!(
            "kubectl label pod {} -n {} {}={} --overwrite",
            quote(pod),
            quote(namespace),
            key,
            quote(value)
        )
    }

    /// Apply a manifest through a quoted heredoc so the YAML is passed verbatim.
    pub fn apply_manifest(manifest: &str) -> String {
        format!("kubectl apply -f - <<'ZONECHAOS_EOF'\n{manifest}\nZONECHAOS_EOF")
    }

    pub fn delete_network_chaos(namespace: &str, name: &str) -> String {
        format!(
            "kubectl delete networkchaos {} -n {}",
            quote(name),
            quote(namespace)
        )
    }
}

pub mod helm {
    use super::quote;

    pub fn release_status(release: &str, namespace: &str) -> String {
        format!(
            "helm status {} -n {}",
            quote(release),
            quote(namespace)
        )
    }

    pub fn install_chaos_mesh(release: &str, namespace: &str) -> String {
        format!(
            "helm repo add chaos-mesh https://charts.chaos-mesh.org --force-update && helm install {} chaos-mesh/chaos-mesh -n {} --create-namespace --set chaosDaemon.runtime=containerd --set chaosDaemon.socketPath=/run/containerd/containerd.sock --wait",
            quote(release),
            quote(namespace)
        )
    }

    pub fn uninstall(release: &str, namespace: &str) -> String {
        format!("helm uninstall {} -n {}", quote(release), quote(namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_leaves_safe_values_alone() {
        assert_eq!(quote("SubnetA"), "SubnetA");
        assert_eq!(quote("app=cart"), "app=cart");
        assert_eq!(quote("10.0.1.0/24"), "10.0.1.0/24");
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn forced_eviction_uses_zero_grace() {
        let cmd = kubectl::delete_pods("shop", "app=cart", true);
        assert!(cmd.contains("--grace-period=0 --force"));
        let cmd = kubectl::delete_pods("shop", "app=cart", false);
        assert!(cmd.contains("--grace-period=30"));
        assert!(!cmd.contains("--force"));
    }

    #[test]
    fn jmespath_arguments_are_quoted_whole() {
        let cmd = az::vmss_instances_in_zone("MC_rg", "aks-poola-vmss", "1$(echo INJECTED >&2)");
        assert!(cmd.contains(
            r"--query '[?zones[0]=='\''1$(echo INJECTED >&2)'\''].osProfile.computerName' -o tsv"
        ));
        let cmd = az::vmss_for_pool("MC_rg", "poola");
        assert!(cmd.contains(r"--query '[?contains(name, '\''poola'\'')].name' -o tsv"));

        assert!(is_identifier("1"));
        assert!(is_identifier("user_pool-2"));
        assert!(!is_identifier("1$(echo INJECTED >&2)"));
        assert!(!is_identifier("1'"));
        assert!(!is_identifier(""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hostile_zone_reaches_the_cli_as_a_literal() {
        use zonechaos_gateway::{ControlPlane, ShellGateway};

        let cmd = az::vmss_instances_in_zone("MC_rg", "vmss", "1$(echo INJECTED >&2)");
        let echoed = cmd.replacen("az ", "echo ", 1);
        let output = ShellGateway::default().execute(&echoed).await.unwrap();
        assert!(output.is_success());
        assert!(!output.stderr.contains("INJECTED"));
        assert!(output
            .stdout
            .contains("[?zones[0]=='1$(echo INJECTED >&2)'].osProfile.computerName"));
    }

    #[test]
    fn detach_uses_null_security_group() {
        let cmd = az::subnet_set_nsg("rg", "vnet", "SubnetA", None);
        assert!(cmd.ends_with("--network-security-group null"));
    }
}
