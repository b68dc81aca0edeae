/// Per-node state machine: ensure-server, wait-command, ensure-RKE2.
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::bootstrap;
use crate::cloudapi::{CreateServerSpec, ServerInfo, CREATE_SERVER_COMMAND_INFO};
use crate::config::{merge_json, Cnf};
use crate::error::{ControlPlaneError, Result};

use super::cluster;
use super::EngineContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOpResult {
    pub nodepool_name: String,
    pub node_number: u32,
    pub message: String,
}

/// `"{cluster}-{pool}-{number}"` — the prefix a server's actual name
/// (which carries a random suffix) must start with.
pub fn server_name_prefix(cluster_name: &str, pool_name: &str, node_number: u32) -> String {
    format!("{cluster_name}-{pool_name}-{node_number}")
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL.encode(bytes).chars().take(5).collect()
}

fn fresh_server_name(prefix: &str) -> String {
    format!("{prefix}-{}", random_suffix())
}

async fn get_server_info(
    ctx: &EngineContext,
    creds: &(String, String),
    prefix: &str,
) -> Result<Option<ServerInfo>> {
    ctx.cloud.get_server_info(creds, prefix).await
}

/// Create the VM backing a node if it does not already exist, then render
/// and execute the RKE2 install script (guarded against re-install).
pub async fn create(cnf: &Cnf, pool_name: &str, node_number: u32, ctx: &EngineContext) -> Result<NodeOpResult> {
    let creds = cnf
        .creds
        .clone()
        .ok_or_else(|| ControlPlaneError::Auth("missing credentials".into()))?;
    let pool = cnf
        .node_pool(pool_name)
        .ok_or_else(|| ControlPlaneError::NotFound(format!("node pool {pool_name} not found")))?;

    let prefix = server_name_prefix(&cnf.cluster.name, pool_name, node_number);

    let mut server_info = get_server_info(ctx, &creds, &prefix).await?;

    if server_info.is_none() {
        let in_flight = ctx
            .cloud
            .find_server_command_in_queue(&creds, CREATE_SERVER_COMMAND_INFO, &prefix)
            .await?;

        let command_id = match in_flight {
            Some(id) => id,
            None => {
                // Three layers, lowest to highest precedence: the process's
                // `DEFAULT_SERVER_CONFIG` env default, the document's own
                // `default-node-config`, then this pool's `node-config`
                // override — mirrors the original's
                // `{**config.DEFAULT_SERVER_CONFIG, **node_pool.node_config}`
                // layering in `lib/node.py::create_server`.
                let base = merge_json(&ctx.settings.default_server_config, &cnf.default_node_config);
                let node_config = pool.merged_node_config(&base);
                let spec = CreateServerSpec {
                    name: fresh_server_name(&prefix),
                    password: String::new(),
                    ssh_key: cnf.cluster.ssh_key.public.clone(),
                    datacenter: cnf.cluster.datacenter.clone(),
                    private_network_name: cnf.cluster.private_network.name.clone(),
                    node_config,
                };
                ctx.cloud.create_server(&creds, spec).await?
            }
        };

        ctx.cloud.wait_command(&creds, &command_id).await?;
        server_info = get_server_info(ctx, &creds, &prefix).await?;
    }

    let server_info = server_info.ok_or_else(|| {
        ControlPlaneError::NotFound(format!("server {prefix} not found after creation"))
    })?;

    let is_server = pool.is_server(pool_name);
    let (cluster_server, cluster_token) = if is_server && pool_name == "controlplane" && node_number == 1 {
        (None, None)
    } else {
        let (server, token) = cluster::get_cluster_server_token(cnf, ctx).await?;
        (Some(server), Some(token))
    };

    let script = bootstrap::install_script(
        &server_info.name,
        is_server,
        &ctx.settings.rke2_version,
        cluster_server.as_deref(),
        cluster_token.as_deref(),
    )?;
    let unit = bootstrap::systemd_unit(is_server);
    let guarded_script = bootstrap::guarded(unit, &script);

    let (public_ip, _private_ip) = server_info.public_private_ips()?;
    ctx.ssh
        .ssh_run_script(&public_ip, &cnf.cluster.ssh_key.private, &guarded_script)
        .await?;

    Ok(NodeOpResult {
        nodepool_name: pool_name.to_string(),
        node_number,
        message: "Server Created Successfully".to_string(),
    })
}

/// Rewrite a node's RKE2 configuration and restart the unit. Requires the
/// server to already exist.
pub async fn update(cnf: &Cnf, pool_name: &str, node_number: u32, ctx: &EngineContext) -> Result<NodeOpResult> {
    let creds = cnf
        .creds
        .clone()
        .ok_or_else(|| ControlPlaneError::Auth("missing credentials".into()))?;
    let pool = cnf
        .node_pool(pool_name)
        .ok_or_else(|| ControlPlaneError::NotFound(format!("node pool {pool_name} not found")))?;

    let prefix = server_name_prefix(&cnf.cluster.name, pool_name, node_number);
    let server_info = get_server_info(ctx, &creds, &prefix)
        .await?
        .ok_or_else(|| ControlPlaneError::NotFound("Server does not exist".to_string()))?;

    let is_server = pool.is_server(pool_name);
    let (cluster_server, cluster_token) = if is_server && pool_name == "controlplane" && node_number == 1 {
        (None, None)
    } else {
        let (server, token) = cluster::get_cluster_server_token(cnf, ctx).await?;
        (Some(server), Some(token))
    };

    let script = bootstrap::update_script(
        &server_info.name,
        is_server,
        &ctx.settings.rke2_version,
        cluster_server.as_deref(),
        cluster_token.as_deref(),
    )?;

    let (public_ip, _private_ip) = server_info.public_private_ips()?;
    ctx.ssh
        .ssh_run_script(&public_ip, &cnf.cluster.ssh_key.private, &script)
        .await?;

    Ok(NodeOpResult {
        nodepool_name: pool_name.to_string(),
        node_number,
        message: "Server Updated Successfully".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_prefix_has_no_random_suffix() {
        assert_eq!(
            server_name_prefix("mycluster", "controlplane", 1),
            "mycluster-controlplane-1"
        );
    }

    #[test]
    fn fresh_server_name_is_prefixed_and_suffixed() {
        let prefix = server_name_prefix("mycluster", "worker1", 2);
        let name = fresh_server_name(&prefix);
        assert!(name.starts_with(&format!("{prefix}-")));
        assert_eq!(name.len(), prefix.len() + 1 + 5);
    }
}
