/// Fan-out of node operations within a single pool. Does not join on its
/// children — the status protocol (`tasks::envelope`) aggregates them.
use serde::{Deserialize, Serialize};

use crate::config::Cnf;
use crate::error::{ControlPlaneError, Result};
use crate::tasks::envelope::{Envelope, ObjectName, TaskId};
use crate::tasks::registry::TaskOp;

use super::node;
use super::EngineContext;

const CONTROLPLANE: &str = "controlplane";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodepoolResult {
    Controlplane {
        nodepool_name: String,
        first_node_task_id: TaskId,
        other_nodes_task_ids: Vec<TaskId>,
    },
    Plain {
        nodepool_name: String,
        nodes_task_ids: Vec<TaskId>,
    },
}

pub struct NodepoolOpResult {
    pub result: NodepoolResult,
}

impl NodepoolOpResult {
    /// The flat list of every child task id, regardless of which shape
    /// `result` took — what the rollup actually walks.
    pub fn all_child_task_ids(&self) -> Vec<TaskId> {
        match &self.result {
            NodepoolResult::Controlplane {
                first_node_task_id,
                other_nodes_task_ids,
                ..
            } => {
                let mut ids = vec![*first_node_task_id];
                ids.extend(other_nodes_task_ids.iter().copied());
                ids
            }
            NodepoolResult::Plain { nodes_task_ids, .. } => nodes_task_ids.clone(),
        }
    }
}

/// `Create/Update(pool)`: control-plane node 1 strictly before any other
/// node in the pool; every other node (and every node in any other pool)
/// runs in parallel.
pub async fn create_update(
    cnf: &Cnf,
    pool_name: &str,
    create: bool,
    ctx: &EngineContext,
) -> Result<NodepoolOpResult> {
    let pool = cnf
        .node_pool(pool_name)
        .ok_or_else(|| ControlPlaneError::NotFound(format!("node pool {pool_name} not found")))?;
    let numbers = pool.node_numbers();

    let op_for = |node_number: u32| {
        if create {
            TaskOp::CreateNode {
                pool_name: pool_name.to_string(),
                node_number,
            }
        } else {
            TaskOp::UpdateNode {
                pool_name: pool_name.to_string(),
                node_number,
            }
        }
    };

    if pool_name == CONTROLPLANE {
        let mut iter = numbers.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| ControlPlaneError::Config("controlplane pool has no nodes".into()))?;

        // Node 1 runs in-process rather than via enqueue+wait: a worker's
        // loop iteration doesn't return to `recv()` until its `execute()`
        // future resolves, so blocking a worker on a child task's completion
        // pins that worker for the wait — nested three deep (cluster →
        // nodepool → node) that exhausts a small pool under a handful of
        // concurrent cluster creates. `record_completed` still files a real,
        // independently-queryable task id for it.
        let first_op = op_for(first);
        let first_result = if create {
            node::create(cnf, pool_name, first, ctx).await
        } else {
            node::update(cnf, pool_name, first, ctx).await
        };
        let first_creds = cnf.creds.clone().unwrap_or_default();
        let first_envelope = match first_result {
            Ok(value) => {
                let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
                Envelope::success(ObjectName::Common, first_op.name(), first_creds, value, Default::default())
            }
            Err(e) => Envelope::failure(ObjectName::Common, first_op.name(), first_creds, &e),
        };
        let first_node_task_id = ctx
            .spawner
            .record_completed(first_op, cnf.clone(), first_envelope)
            .await?;

        let mut other_nodes_task_ids = Vec::new();
        for number in iter {
            let id = ctx.spawner.enqueue(op_for(number), cnf.clone()).await?;
            other_nodes_task_ids.push(id);
        }

        Ok(NodepoolOpResult {
            result: NodepoolResult::Controlplane {
                nodepool_name: pool_name.to_string(),
                first_node_task_id,
                other_nodes_task_ids,
            },
        })
    } else {
        let mut nodes_task_ids = Vec::new();
        for number in numbers {
            let id = ctx.spawner.enqueue(op_for(number), cnf.clone()).await?;
            nodes_task_ids.push(id);
        }

        Ok(NodepoolOpResult {
            result: NodepoolResult::Plain {
                nodepool_name: pool_name.to_string(),
                nodes_task_ids,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_child_task_ids_flattens_controlplane_shape() {
        let outcome = NodepoolOpResult {
            result: NodepoolResult::Controlplane {
                nodepool_name: "controlplane".into(),
                first_node_task_id: TaskId::new(),
                other_nodes_task_ids: vec![TaskId::new(), TaskId::new()],
            },
        };
        assert_eq!(outcome.all_child_task_ids().len(), 3);
    }

    #[test]
    fn all_child_task_ids_flattens_plain_shape() {
        let outcome = NodepoolOpResult {
            result: NodepoolResult::Plain {
                nodepool_name: "worker1".into(),
                nodes_task_ids: vec![TaskId::new(), TaskId::new(), TaskId::new()],
            },
        };
        assert_eq!(outcome.all_child_task_ids().len(), 3);
    }
}
