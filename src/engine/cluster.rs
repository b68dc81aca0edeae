/// Top-level cluster orchestration: control-plane discovery, phased
/// enqueue, and the read-only status/kubeconfig operations.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cloudapi::ServerInfo;
use crate::config::Cnf;
use crate::error::{ControlPlaneError, Result};
use crate::tasks::envelope::{Envelope, ObjectName, TaskId};
use crate::tasks::registry::TaskOp;

use super::node::server_name_prefix;
use super::{nodepool, EngineContext};

const CONTROLPLANE: &str = "controlplane";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterOpResult {
    pub task_ids: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub cluster_server: String,
    pub controlplane_public_ip: String,
    pub controlplane_private_ip: String,
    pub node_pools: serde_json::Map<String, serde_json::Value>,
    pub kubectl_version: String,
    pub kubectl_top_node: String,
}

/// Fetch control-plane node 1's server info by prefix.
async fn controlplane_server_info(cnf: &Cnf, ctx: &EngineContext) -> Result<ServerInfo> {
    let creds = cnf
        .creds
        .clone()
        .ok_or_else(|| ControlPlaneError::Auth("missing credentials".into()))?;
    let prefix = server_name_prefix(&cnf.cluster.name, CONTROLPLANE, 1);
    ctx.cloud
        .get_server_info(&creds, &prefix)
        .await?
        .ok_or_else(|| ControlPlaneError::NotFound(format!("control-plane server {prefix} not found")))
}

/// Resolve `(clusterServer, clusterToken)` for any node that is not
/// control-plane node 1. Prefers an explicitly configured `cluster.server`
/// / `cluster.token`; otherwise derives them from the control-plane node.
pub async fn get_cluster_server_token(cnf: &Cnf, ctx: &EngineContext) -> Result<(String, String)> {
    if let (Some(server), Some(token)) = (&cnf.cluster.server, &cnf.cluster.token) {
        return Ok((server.clone(), token.clone()));
    }

    let info = controlplane_server_info(cnf, ctx).await?;
    let (public_ip, _private_ip) = info.public_private_ips()?;
    let server = format!("https://{public_ip}:{}", ctx.settings.rke2_server_port);

    let token = ctx
        .ssh
        .ssh(
            &public_ip,
            &cnf.cluster.ssh_key.private,
            "cat /var/lib/rancher/rke2/server/node-token",
        )
        .await?
        .trim()
        .to_string();

    Ok((server, token))
}

/// Enqueue the two-phase plan: control-plane pool runs to completion first
/// (spec.md §5: "control-plane pool ≺ all other pools" — non-control-plane
/// nodes resolve their cluster server/token from the control-plane node, so
/// its provisioning must have finished before they can even start), then
/// every other pool is enqueued in parallel. Returns the stack of task IDs
/// forming the cluster task's result.
pub async fn create_update(cnf: &Cnf, create: bool, ctx: &EngineContext) -> Result<ClusterOpResult> {
    let op_for = |pool_name: String| {
        if create {
            TaskOp::CreateNodepool { pool_name }
        } else {
            TaskOp::UpdateNodepool { pool_name }
        }
    };

    // The control-plane pool runs in-process rather than via enqueue+wait,
    // for the same reason node 1 does inside `nodepool::create_update`: a
    // worker blocked on a child task's completion pins that worker for the
    // whole wait instead of freeing it back to the pool, and this is the
    // outermost of three such nestings (cluster → nodepool → node) — enough
    // to deadlock a small pool under a handful of concurrent cluster
    // creates. `record_completed` still files a real, independently
    // queryable task id carrying the pool's own `task_ids` meta, so status
    // rollup sees the same shape it would have if this had gone through the
    // queue.
    let controlplane_op = op_for(CONTROLPLANE.to_string());
    let controlplane_result = nodepool::create_update(cnf, CONTROLPLANE, create, ctx).await;
    let controlplane_creds = cnf.creds.clone().unwrap_or_default();
    let controlplane_envelope = match &controlplane_result {
        Ok(outcome) => {
            let mut meta = serde_json::Map::new();
            meta.insert(
                "task_ids".to_string(),
                serde_json::json!(outcome
                    .all_child_task_ids()
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()),
            );
            let value = serde_json::to_value(&outcome.result).unwrap_or(serde_json::Value::Null);
            Envelope::success(ObjectName::Nodepool, controlplane_op.name(), controlplane_creds, value, meta)
        }
        Err(e) => Envelope::failure(ObjectName::Nodepool, controlplane_op.name(), controlplane_creds, e),
    };
    let controlplane_task = ctx
        .spawner
        .record_completed(controlplane_op, cnf.clone(), controlplane_envelope)
        .await?;

    let mut task_ids = vec![controlplane_task];
    for pool_name in cnf.non_controlplane_pool_names() {
        let id = ctx.spawner.enqueue(op_for(pool_name), cnf.clone()).await?;
        task_ids.push(id);
    }

    Ok(ClusterOpResult { task_ids })
}

/// `GetStatus(cluster)`: a snapshot assembled from per-pool server info plus
/// a couple of `kubectl` invocations against control-plane node 1.
pub async fn get_status(cnf: &Cnf, ctx: &EngineContext) -> Result<ClusterStatus> {
    let creds = cnf
        .creds
        .clone()
        .ok_or_else(|| ControlPlaneError::Auth("missing credentials".into()))?;

    let info = controlplane_server_info(cnf, ctx).await?;
    let (public_ip, private_ip) = info.public_private_ips()?;
    let cluster_server = format!("https://{public_ip}:{}", ctx.settings.rke2_server_port);

    let mut node_pools = serde_json::Map::new();
    for (pool_name, pool) in cnf.node_pools() {
        let mut nodes = serde_json::Map::new();
        for number in pool.node_numbers() {
            let prefix = server_name_prefix(&cnf.cluster.name, pool_name, number);
            let server = ctx.cloud.get_server_info(&creds, &prefix).await?;
            nodes.insert(
                number.to_string(),
                serde_json::to_value(server).unwrap_or(serde_json::Value::Null),
            );
        }
        node_pools.insert(pool_name.clone(), serde_json::Value::Object(nodes));
    }

    let kubectl_version = ctx
        .ssh
        .kubectl(&public_ip, &cnf.cluster.ssh_key.private, "version")
        .await?;
    let kubectl_top_node = ctx
        .ssh
        .kubectl(&public_ip, &cnf.cluster.ssh_key.private, "top node")
        .await?;

    Ok(ClusterStatus {
        cluster_server,
        controlplane_public_ip: public_ip,
        controlplane_private_ip: private_ip,
        node_pools,
        kubectl_version,
        kubectl_top_node,
    })
}

/// `GetKubeconfig(cluster)`: read the kubeconfig off control-plane node 1
/// and rewrite its server URL to the node's externally reachable address.
pub async fn get_kubeconfig(cnf: &Cnf, ctx: &EngineContext) -> Result<String> {
    let info = controlplane_server_info(cnf, ctx).await?;
    let (public_ip, _private_ip) = info.public_private_ips()?;

    let raw = ctx
        .ssh
        .ssh(
            &public_ip,
            &cnf.cluster.ssh_key.private,
            "cat /etc/rancher/rke2/rke2.yaml",
        )
        .await?;

    let mut doc: serde_yaml::Value = serde_yaml::from_str(&raw)
        .map_err(|e| ControlPlaneError::CloudApi(format!("invalid kubeconfig from node: {e}")))?;

    let server_url = format!("https://{public_ip}:{}", ctx.settings.rke2_kube_api_port);
    let clusters = doc
        .get_mut("clusters")
        .and_then(|v| v.as_sequence_mut())
        .ok_or_else(|| ControlPlaneError::CloudApi("kubeconfig missing clusters[0]".into()))?;
    let first = clusters
        .get_mut(0)
        .and_then(|v| v.get_mut("cluster"))
        .ok_or_else(|| ControlPlaneError::CloudApi("kubeconfig missing clusters[0].cluster".into()))?;
    if let serde_yaml::Value::Mapping(map) = first {
        map.insert(
            serde_yaml::Value::String("server".to_string()),
            serde_yaml::Value::String(server_url),
        );
    }

    serde_yaml::to_string(&doc).map_err(|_| ControlPlaneError::Opaque)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controlplane_prefix_uses_node_one() {
        assert_eq!(
            server_name_prefix("mycluster", CONTROLPLANE, 1),
            "mycluster-controlplane-1"
        );
    }
}
