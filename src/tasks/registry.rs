/// Task-factory registry: maps a task name to the engine operation it runs.
/// Kept as a table the scheduler consumes, not something domain objects
/// import, so the node/nodepool/cluster engines never need to know about
/// the task queue that drives them.
use serde::{Deserialize, Serialize};

use crate::config::Cnf;
use crate::engine::{cluster, node, nodepool, EngineContext};
use crate::error::ControlPlaneError;

use super::envelope::{Envelope, ObjectName};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskOp {
    CreateNode { pool_name: String, node_number: u32 },
    UpdateNode { pool_name: String, node_number: u32 },
    CreateNodepool { pool_name: String },
    UpdateNodepool { pool_name: String },
    CreateCluster,
    UpdateCluster,
    GetClusterStatus,
    GetKubeconfig,
}

impl TaskOp {
    pub fn name(&self) -> &'static str {
        match self {
            TaskOp::CreateNode { .. } => "create_node",
            TaskOp::UpdateNode { .. } => "update_node",
            TaskOp::CreateNodepool { .. } => "create_nodepool",
            TaskOp::UpdateNodepool { .. } => "update_nodepool",
            TaskOp::CreateCluster => "create_cluster",
            TaskOp::UpdateCluster => "update_cluster",
            TaskOp::GetClusterStatus => "get_cluster_status",
            TaskOp::GetKubeconfig => "get_kubeconfig",
        }
    }
}

/// Run one task to completion and wrap the outcome in a result envelope.
/// This is the only place that calls the engine and never lets a domain
/// error escape as a raw `Err` past the task boundary.
pub async fn execute(op: TaskOp, cnf: Cnf, ctx: &EngineContext) -> Envelope {
    let creds = cnf.creds.clone().unwrap_or_default();
    let task_name = op.name();

    match &op {
        TaskOp::CreateNode {
            pool_name,
            node_number,
        } => {
            let result = node::create(&cnf, pool_name, *node_number, ctx).await;
            to_envelope(ObjectName::Common, task_name, creds, result)
        }
        TaskOp::UpdateNode {
            pool_name,
            node_number,
        } => {
            let result = node::update(&cnf, pool_name, *node_number, ctx).await;
            to_envelope(ObjectName::Common, task_name, creds, result)
        }
        TaskOp::CreateNodepool { pool_name } => {
            let result = nodepool::create_update(&cnf, pool_name, true, ctx).await;
            nodepool_envelope(task_name, creds, result)
        }
        TaskOp::UpdateNodepool { pool_name } => {
            let result = nodepool::create_update(&cnf, pool_name, false, ctx).await;
            nodepool_envelope(task_name, creds, result)
        }
        TaskOp::CreateCluster => {
            let result = cluster::create_update(&cnf, true, ctx).await;
            cluster_envelope(task_name, creds, result)
        }
        TaskOp::UpdateCluster => {
            let result = cluster::create_update(&cnf, false, ctx).await;
            cluster_envelope(task_name, creds, result)
        }
        TaskOp::GetClusterStatus => {
            let result = cluster::get_status(&cnf, ctx).await;
            to_envelope(ObjectName::Common, task_name, creds, result)
        }
        TaskOp::GetKubeconfig => {
            let result = cluster::get_kubeconfig(&cnf, ctx).await;
            to_envelope(ObjectName::Common, task_name, creds, result)
        }
    }
}

fn to_envelope<T: serde::Serialize>(
    object_name: ObjectName,
    task_name: &str,
    creds: (String, String),
    result: Result<T, ControlPlaneError>,
) -> Envelope {
    match result {
        Ok(value) => {
            let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
            Envelope::success(object_name, task_name, creds, value, Default::default())
        }
        Err(e) => Envelope::failure(object_name, task_name, creds, &e),
    }
}

fn nodepool_envelope(
    task_name: &str,
    creds: (String, String),
    result: Result<nodepool::NodepoolOpResult, ControlPlaneError>,
) -> Envelope {
    match result {
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
            Envelope::success(ObjectName::Nodepool, task_name, creds, value, meta)
        }
        Err(e) => Envelope::failure(ObjectName::Nodepool, task_name, creds, &e),
    }
}

fn cluster_envelope(
    task_name: &str,
    creds: (String, String),
    result: Result<cluster::ClusterOpResult, ControlPlaneError>,
) -> Envelope {
    match result {
        Ok(outcome) => {
            let mut meta = serde_json::Map::new();
            meta.insert(
                "task_ids".to_string(),
                serde_json::json!(outcome
                    .task_ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()),
            );
            let value = serde_json::json!({ "task_ids": outcome
                .task_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>() });
            Envelope::success(ObjectName::Cluster, task_name, creds, value, meta)
        }
        Err(e) => Envelope::failure(ObjectName::Cluster, task_name, creds, &e),
    }
}
