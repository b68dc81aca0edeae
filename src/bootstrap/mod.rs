/// Synthesis of the RKE2 install/update shell scripts run on each node.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;

use crate::error::{ControlPlaneError, Result};

/// Build the RKE2 config document for a node.
///
/// `node_ip`/`node_external_ip` are left as shell variables (`${PRIVATE_IP}`,
/// `${PUBLIC_IP}`) so the value is resolved on the box at install time, not
/// baked in by the control plane.
pub fn rke2_config(
    node_name: &str,
    is_server: bool,
    cluster_server: Option<&str>,
    cluster_token: Option<&str>,
) -> Result<serde_json::Value> {
    let mut config = json!({
        "node-name": node_name,
        "node-ip": "${PRIVATE_IP}",
        "node-external-ip": "${PUBLIC_IP}",
    });
    let obj = config.as_object_mut().unwrap();

    if cluster_server.is_some() || cluster_token.is_some() {
        let (server, token) = match (cluster_server, cluster_token) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                return Err(ControlPlaneError::Config(
                    "cluster server and token must both be present or both absent".into(),
                ))
            }
        };
        obj.insert("server".into(), json!(server));
        obj.insert("token".into(), json!(token));
    }

    if is_server {
        obj.insert("bind-address".into(), json!("0.0.0.0"));
        obj.insert("advertise-address".into(), json!("${PRIVATE_IP}"));
        obj.insert(
            "tls-san".into(),
            json!(["0.0.0.0", "${PRIVATE_IP}", "${PUBLIC_IP}"]),
        );
    } else if cluster_server.is_none() || cluster_token.is_none() {
        return Err(ControlPlaneError::Config(
            "agent nodes require a cluster server and token".into(),
        ));
    }

    Ok(config)
}

pub fn systemd_unit(is_server: bool) -> &'static str {
    if is_server {
        "rke2-server"
    } else {
        "rke2-agent"
    }
}

fn ip_exports() -> &'static str {
    "export PUBLIC_IP=$(ip -4 addr show dev eth0 | grep inet | awk '{print $2}' | cut -d/ -f1) && \
export PRIVATE_IP=$(ip -4 addr show dev eth1 | grep inet | awk '{print $2}' | cut -d/ -f1)"
}

fn config_b64(config: &serde_json::Value) -> Result<String> {
    let encoded = serde_json::to_vec(config).map_err(|_| ControlPlaneError::Opaque)?;
    Ok(BASE64.encode(encoded))
}

/// The install script: first-time bootstrap of a node. Writes the config,
/// installs and enables RKE2, and wires `PATH`/`KUBECONFIG` into the shell.
pub fn install_script(
    node_name: &str,
    is_server: bool,
    rke2_version: &str,
    cluster_server: Option<&str>,
    cluster_token: Option<&str>,
) -> Result<String> {
    let config = rke2_config(node_name, is_server, cluster_server, cluster_token)?;
    let b64 = config_b64(&config)?;
    let unit = systemd_unit(is_server);
    let install_type = if is_server { "server" } else { "agent" };

    let steps = [
        ip_exports().to_string(),
        "mkdir -p /etc/rancher/rke2".to_string(),
        format!("echo {b64} | base64 -d | envsubst > /etc/rancher/rke2/config.yaml"),
        format!(
            "curl -sfL https://get.rke2.io | INSTALL_RKE2_VERSION={rke2_version} INSTALL_RKE2_TYPE={install_type} sh -"
        ),
        format!("systemctl enable {unit}"),
        format!("systemctl start {unit}"),
        "echo PATH='$PATH:/var/lib/rancher/rke2/bin' >> ~/.bashrc".to_string(),
        "echo export KUBECONFIG=/etc/rancher/rke2/rke2.yaml >> ~/.bashrc".to_string(),
    ];
    Ok(steps.join(" && "))
}

/// The update script: rewrite config, re-run the installer, restart the
/// unit. No `enable`/`start`/`mkdir`/`.bashrc` steps — the node is already
/// installed.
pub fn update_script(
    node_name: &str,
    is_server: bool,
    rke2_version: &str,
    cluster_server: Option<&str>,
    cluster_token: Option<&str>,
) -> Result<String> {
    let config = rke2_config(node_name, is_server, cluster_server, cluster_token)?;
    let b64 = config_b64(&config)?;
    let unit = systemd_unit(is_server);
    let install_type = if is_server { "server" } else { "agent" };

    let steps = [
        ip_exports().to_string(),
        format!("echo {b64} | base64 -d | envsubst > /etc/rancher/rke2/config.yaml"),
        format!(
            "curl -sfL https://get.rke2.io | INSTALL_RKE2_VERSION={rke2_version} INSTALL_RKE2_TYPE={install_type} sh -"
        ),
        format!("systemctl restart {unit}"),
    ];
    Ok(steps.join(" && "))
}

/// A guard that short-circuits to a no-op if the systemd unit is already
/// active, so the install script only ever runs once per node.
pub fn guarded(unit: &str, script: &str) -> String {
    format!("if systemctl is-active {unit}; then echo already installed; else {script}; fi")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_sets_tls_san_and_bind_address() {
        let config = rke2_config("controlplane-1", true, None, None).unwrap();
        assert_eq!(config["bind-address"], "0.0.0.0");
        assert_eq!(config["advertise-address"], "${PRIVATE_IP}");
        assert_eq!(
            config["tls-san"],
            json!(["0.0.0.0", "${PRIVATE_IP}", "${PUBLIC_IP}"])
        );
        assert!(config.get("server").is_none());
    }

    #[test]
    fn agent_without_server_and_token_is_an_error() {
        let err = rke2_config("worker-1", false, None, None).unwrap_err();
        assert!(matches!(err, ControlPlaneError::Config(_)));
    }

    #[test]
    fn agent_with_server_and_token_is_valid() {
        let config = rke2_config(
            "worker-1",
            false,
            Some("https://1.2.3.4:9345"),
            Some("tok"),
        )
        .unwrap();
        assert_eq!(config["server"], "https://1.2.3.4:9345");
        assert_eq!(config["token"], "tok");
    }

    #[test]
    fn install_script_enables_and_starts_the_unit() {
        let script =
            install_script("controlplane-1", true, "v1.31.1+rke2r1", None, None).unwrap();
        assert!(script.contains("systemctl enable rke2-server"));
        assert!(script.contains("systemctl start rke2-server"));
        assert!(script.contains("mkdir -p /etc/rancher/rke2"));
        assert!(script.contains("INSTALL_RKE2_TYPE=server"));
    }

    #[test]
    fn update_script_only_restarts() {
        let script =
            update_script("controlplane-1", true, "v1.31.1+rke2r1", None, None).unwrap();
        assert!(script.contains("systemctl restart rke2-server"));
        assert!(!script.contains("systemctl enable"));
        assert!(!script.contains("mkdir"));
    }

    #[test]
    fn guard_skips_when_unit_already_active() {
        let guarded = guarded("rke2-server", "echo install");
        assert!(guarded.starts_with("if systemctl is-active rke2-server"));
    }
}
