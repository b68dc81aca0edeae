/// The reconciliation engine: per-node, per-pool, and per-cluster operations
/// that the task runner dispatches into.
pub mod cluster;
pub mod node;
pub mod nodepool;

use std::sync::Arc;

use crate::cloudapi::CloudApi;
use crate::settings::Settings;
use crate::ssh::SshExecutor;
use crate::tasks::scheduler::TaskSpawner;

/// Everything an engine operation needs to reach the outside world: the
/// cloud provider, SSH, process settings, and a way to enqueue child tasks.
/// Cheap to clone — every value is an `Arc`.
#[derive(Clone)]
pub struct EngineContext {
    pub cloud: Arc<dyn CloudApi>,
    pub ssh: Arc<dyn SshExecutor>,
    pub settings: Arc<Settings>,
    pub spawner: Arc<dyn TaskSpawner>,
}
