/// Durable record-keeping for enqueued tasks. A real deployment would swap
/// `InMemoryTaskStore` for a Postgres/Redis-backed implementation; nothing
/// above this trait depends on the backing storage.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::envelope::{Envelope, TaskId};
use crate::config::Cnf;
use crate::error::Result;
use crate::tasks::registry::TaskOp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskLifecycle {
    Pending,
    Running,
    Done,
}

#[derive(Clone)]
pub struct TaskRecord {
    pub lifecycle: TaskLifecycle,
    pub op: TaskOp,
    pub cnf: Cnf,
    pub envelope: Option<Envelope>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn put_pending(&self, id: TaskId, op: TaskOp, cnf: Cnf) -> Result<()>;
    async fn mark_running(&self, id: TaskId) -> Result<()>;
    async fn complete(&self, id: TaskId, envelope: Envelope) -> Result<()>;
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>>;

    /// Tasks left `Running` past their lease (a worker panicked mid-task):
    /// requeue them, the Rust analogue of `task_acks_late` combined with
    /// `reject_on_worker_lost`.
    async fn reap_stale_running(&self, max_age: chrono::Duration) -> Result<Vec<(TaskId, TaskOp, Cnf)>>;

    /// Result retention: tasks older than `max_age` are dropped, mirroring
    /// the backend's `result_expires` setting.
    async fn sweep_expired(&self, max_age: chrono::Duration) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn put_pending(&self, id: TaskId, op: TaskOp, cnf: Cnf) -> Result<()> {
        let record = TaskRecord {
            lifecycle: TaskLifecycle::Pending,
            op,
            cnf,
            envelope: None,
            created_at: chrono::Utc::now(),
        };
        self.records.write().unwrap().insert(id, record);
        Ok(())
    }

    async fn mark_running(&self, id: TaskId) -> Result<()> {
        if let Some(record) = self.records.write().unwrap().get_mut(&id) {
            record.lifecycle = TaskLifecycle::Running;
        }
        Ok(())
    }

    async fn complete(&self, id: TaskId, envelope: Envelope) -> Result<()> {
        if let Some(record) = self.records.write().unwrap().get_mut(&id) {
            record.lifecycle = TaskLifecycle::Done;
            record.envelope = Some(envelope);
        }
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        Ok(self.records.read().unwrap().get(&id).cloned())
    }

    async fn reap_stale_running(
        &self,
        max_age: chrono::Duration,
    ) -> Result<Vec<(TaskId, TaskOp, Cnf)>> {
        let now = chrono::Utc::now();
        let mut to_requeue = Vec::new();
        let mut records = self.records.write().unwrap();
        for (id, record) in records.iter_mut() {
            if record.lifecycle == TaskLifecycle::Running && now - record.created_at > max_age {
                record.lifecycle = TaskLifecycle::Pending;
                to_requeue.push((*id, record.op.clone(), record.cnf.clone()));
            }
        }
        Ok(to_requeue)
    }

    async fn sweep_expired(&self, max_age: chrono::Duration) -> Result<usize> {
        let now = chrono::Utc::now();
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|_, record| now - record.created_at <= max_age);
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_task_has_no_envelope() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new();
        let cnf: Cnf = serde_json::from_str(
            r#"{"cluster":{"name":"c","datacenter":"d","ssh-key":{"private":"k","public":"p"},"private-network":{"name":"n"}}}"#,
        )
        .unwrap();
        store
            .put_pending(id, TaskOp::GetClusterStatus, cnf)
            .await
            .unwrap();
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.lifecycle, TaskLifecycle::Pending);
        assert!(record.envelope.is_none());
    }
}
