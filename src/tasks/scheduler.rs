/// The worker pool: the only thing that knows how to turn an enqueued
/// `TaskOp` into a completed envelope. Kept separate from `TaskHandle` so
/// `EngineContext` (which nodepool/cluster ops use to enqueue children) never
/// needs a reference back to the thing dispatching into `EngineContext` —
/// that would be a reference cycle.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::config::Cnf;
use crate::error::Result;

use super::envelope::{get_task_status, Envelope, TaskId, TaskStatus};
use super::registry::{self, TaskOp};
use super::store::TaskStore;

/// What `engine::EngineContext` holds to enqueue child tasks without
/// depending on the scheduler that drives it.
#[async_trait]
pub trait TaskSpawner: Send + Sync {
    async fn enqueue(&self, op: TaskOp, cnf: Cnf) -> Result<TaskId>;
    async fn get_status(&self, task_id: TaskId, creds: &(String, String)) -> Result<TaskStatus>;

    /// Record a result that was already computed in-process — not pulled
    /// off the queue by a worker — as a completed task, so it still gets a
    /// real, independently-queryable task id. Used by the controlplane
    /// ordering stages (`engine::nodepool`, `engine::cluster`) to run node 1
    /// / the controlplane pool directly instead of enqueuing a child task
    /// and blocking the current worker on its completion: a worker's loop
    /// iteration doesn't return to `recv()` until the task it is running
    /// finishes, so a busy-poll wait nested inside one task pins that
    /// worker until some *other* worker produces the result it's waiting
    /// on — three levels of that (cluster → nodepool → node) exhausts a
    /// small worker pool under a handful of concurrent cluster creates.
    async fn record_completed(&self, op: TaskOp, cnf: Cnf, envelope: Envelope) -> Result<TaskId>;
}

type Work = (TaskId, TaskOp, Cnf);

/// Thin handle carrying only what `EngineContext` needs: somewhere to put
/// new work, and the store to read status back out of.
#[derive(Clone)]
pub struct TaskHandle {
    store: Arc<dyn TaskStore>,
    sender: mpsc::Sender<Work>,
}

#[async_trait]
impl TaskSpawner for TaskHandle {
    async fn enqueue(&self, op: TaskOp, cnf: Cnf) -> Result<TaskId> {
        let id = TaskId::new();
        self.store.put_pending(id, op.clone(), cnf.clone()).await?;
        let _ = self.sender.send((id, op, cnf)).await;
        Ok(id)
    }

    async fn get_status(&self, task_id: TaskId, creds: &(String, String)) -> Result<TaskStatus> {
        get_task_status(self.store.as_ref(), task_id, creds).await
    }

    async fn record_completed(&self, op: TaskOp, cnf: Cnf, envelope: Envelope) -> Result<TaskId> {
        let id = TaskId::new();
        self.store.put_pending(id, op, cnf).await?;
        self.store.mark_running(id).await?;
        self.store.complete(id, envelope).await?;
        Ok(id)
    }
}

/// Owns the worker-pool loops and the periodic reaper. Built once at
/// startup from the same `EngineContext` template each worker clones for
/// its own use (cloning only swaps in this scheduler's `TaskHandle` as the
/// context's spawner).
pub struct Scheduler {
    pub handle: TaskHandle,
    receiver: Mutex<Option<mpsc::Receiver<Work>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn TaskStore>, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        Scheduler {
            handle: TaskHandle { store, sender },
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Spawn `worker_count` tasks pulling from the shared queue, plus a
    /// periodic reaper for stale `Running` tasks and expired results.
    pub fn spawn_workers(
        self: &Arc<Self>,
        worker_count: usize,
        context_factory: impl Fn() -> crate::engine::EngineContext + Send + Sync + 'static,
    ) {
        let receiver = self
            .receiver
            .try_lock()
            .expect("spawn_workers called once, before any task is enqueued")
            .take()
            .expect("workers already spawned");
        let receiver = Arc::new(Mutex::new(receiver));
        let context_factory = Arc::new(context_factory);

        for _ in 0..worker_count {
            let receiver = receiver.clone();
            let store = self.handle.store.clone();
            let context_factory = context_factory.clone();
            tokio::spawn(async move {
                loop {
                    let work = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    let Some((id, op, cnf)) = work else {
                        break;
                    };
                    let _ = store.mark_running(id).await;
                    let ctx = context_factory();
                    let envelope = registry::execute(op, cnf, &ctx).await;
                    let _ = store.complete(id, envelope).await;
                }
            });
        }

        let store = self.handle.store.clone();
        let sender = self.handle.sender.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                if let Ok(stale) = store.reap_stale_running(chrono::Duration::hours(1)).await {
                    for work in stale {
                        let _ = sender.send(work).await;
                    }
                }
                let _ = store.sweep_expired(chrono::Duration::days(14)).await;
            }
        });
    }
}
