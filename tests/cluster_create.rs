//! Full-stack scenario tests from spec.md §8, driven against the real task
//! scheduler/engine with the cloud API and SSH behind in-memory fakes —
//! the Rust equivalent of the original test suite's `monkeypatch`-based
//! mocks. Requires the crate's `test-util` feature (exposes `cloudapi::fake`
//! and `ssh::fake`).
use std::sync::Arc;
use std::time::Duration;

use controlplane::cloudapi::fake::FakeCloudApi;
use controlplane::config::Cnf;
use controlplane::engine::EngineContext;
use controlplane::settings::Settings;
use controlplane::ssh::fake::FakeSshExecutor;
use controlplane::tasks::{InMemoryTaskStore, Scheduler, TaskOp, TaskSpawner, TaskStatus};

const CREDS: (&str, &str) = ("client-id", "client-secret");

fn creds() -> (String, String) {
    (CREDS.0.to_string(), CREDS.1.to_string())
}

fn worker1_config() -> &'static str {
    r#"
cluster:
  name: demo
  datacenter: EU
  ssh-key:
    private: fake-private-key
    public: fake-public-key
  private-network:
    name: demo-net
node-pools:
  worker1:
    nodes: 3
"#
}

struct Harness {
    scheduler: Arc<Scheduler>,
    cloud: Arc<FakeCloudApi>,
    #[allow(dead_code)]
    ssh: Arc<FakeSshExecutor>,
}

fn build_harness() -> Harness {
    let store = Arc::new(InMemoryTaskStore::new());
    let scheduler = Arc::new(Scheduler::new(store, 1024));
    let cloud = Arc::new(FakeCloudApi::default());
    let ssh = Arc::new(FakeSshExecutor::default());
    ssh.respond("node-token", "fake-join-token");

    let settings = Arc::new(Settings::default());
    let context_factory = {
        let cloud = cloud.clone();
        let ssh = ssh.clone();
        let settings = settings.clone();
        let spawner = scheduler.handle.clone();
        move || EngineContext {
            cloud: cloud.clone(),
            ssh: ssh.clone(),
            settings: settings.clone(),
            spawner: Arc::new(spawner.clone()),
        }
    };
    scheduler.spawn_workers(4, context_factory);

    Harness {
        scheduler,
        cloud,
        ssh,
    }
}

async fn await_terminal(spawner: &dyn TaskSpawner, task_id: controlplane::tasks::TaskId) -> TaskStatus {
    let creds = creds();
    for _ in 0..200 {
        let status = spawner.get_status(task_id, &creds).await.unwrap();
        if !matches!(status.state, controlplane::tasks::TaskState::Pending) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("task {task_id} did not reach a terminal state in time");
}

fn count_success_messages(value: &serde_json::Value, out: &mut usize) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                count_success_messages(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(msg)) = map.get("message") {
                if msg.contains("Successfully") {
                    *out += 1;
                }
            }
        }
        _ => {}
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn create_cluster_with_one_worker_pool_of_three() {
    let harness = build_harness();
    let cnf = Cnf::load_with_creds(worker1_config(), creds()).unwrap();

    let task_id = harness
        .scheduler
        .handle
        .enqueue(TaskOp::CreateCluster, cnf)
        .await
        .unwrap();
    let status = await_terminal(&harness.scheduler.handle, task_id).await;

    assert_eq!(status.state, controlplane::tasks::TaskState::Success);
    let result = status.result.expect("success carries a result");
    let groups = result.as_array().expect("cluster result is an array of pool results");
    assert_eq!(groups.len(), 2, "control-plane pool + worker1 pool");

    let subtasks = status
        .meta
        .get("subtasks")
        .and_then(|v| v.as_array())
        .expect("meta.subtasks is populated");
    assert_eq!(subtasks.len(), 2);

    let mut successes = 0;
    count_success_messages(&result, &mut successes);
    assert_eq!(successes, 4, "1 control-plane node + 3 worker nodes");

    assert_eq!(harness.cloud.create_server_call_count(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recreating_an_existing_cluster_issues_no_new_server_calls() {
    let harness = build_harness();
    harness.cloud.seed_server("demo-controlplane-1-ab12c", "203.0.113.1", "demo-net", "10.0.0.1");
    harness.cloud.seed_server("demo-worker1-1-ab12c", "203.0.113.2", "demo-net", "10.0.0.2");
    harness.cloud.seed_server("demo-worker1-2-ab12c", "203.0.113.3", "demo-net", "10.0.0.3");
    harness.cloud.seed_server("demo-worker1-3-ab12c", "203.0.113.4", "demo-net", "10.0.0.4");

    let cnf = Cnf::load_with_creds(worker1_config(), creds()).unwrap();
    let task_id = harness
        .scheduler
        .handle
        .enqueue(TaskOp::CreateCluster, cnf)
        .await
        .unwrap();
    let status = await_terminal(&harness.scheduler.handle, task_id).await;

    assert_eq!(status.state, controlplane::tasks::TaskState::Success);
    assert_eq!(harness.cloud.create_server_call_count(), 0);
}

#[tokio::test]
async fn a_node_task_referencing_a_missing_pool_fails_with_not_found() {
    let harness = build_harness();
    let cnf = Cnf::load_with_creds(worker1_config(), creds()).unwrap();

    let bad_task = harness
        .scheduler
        .handle
        .enqueue(
            TaskOp::CreateNode {
                pool_name: "does-not-exist".to_string(),
                node_number: 1,
            },
            cnf,
        )
        .await
        .unwrap();

    let bad_status = await_terminal(&harness.scheduler.handle, bad_task).await;
    assert_eq!(bad_status.state, controlplane::tasks::TaskState::Failure);
    assert!(bad_status.error.unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn status_rollup_fails_when_one_child_fails_and_none_are_pending() {
    // Scenario 6 of spec.md §8, exercised directly against the store/
    // envelope primitives so the two child outcomes are deterministic.
    use controlplane::tasks::{get_task_status, Envelope, ObjectName, TaskId, TaskStore};

    let store = InMemoryTaskStore::new();
    let success_id = TaskId::new();
    let failure_id = TaskId::new();
    let parent_id = TaskId::new();
    let cnf = Cnf::load_with_creds(worker1_config(), creds()).unwrap();

    store
        .put_pending(success_id, TaskOp::CreateNode { pool_name: "worker1".into(), node_number: 1 }, cnf.clone())
        .await
        .unwrap();
    store
        .complete(
            success_id,
            Envelope::success(
                ObjectName::Common,
                "create_node",
                creds(),
                serde_json::json!({"message": "Server Created Successfully"}),
                Default::default(),
            ),
        )
        .await
        .unwrap();

    store
        .put_pending(failure_id, TaskOp::CreateNode { pool_name: "worker1".into(), node_number: 2 }, cnf.clone())
        .await
        .unwrap();
    store
        .complete(
            failure_id,
            Envelope::failure(
                ObjectName::Common,
                "create_node",
                creds(),
                &controlplane::error::ControlPlaneError::NotFound("server does not exist".into()),
            ),
        )
        .await
        .unwrap();

    let mut meta = serde_json::Map::new();
    meta.insert(
        "task_ids".to_string(),
        serde_json::json!([success_id.to_string(), failure_id.to_string()]),
    );
    store
        .put_pending(parent_id, TaskOp::CreateNodepool { pool_name: "worker1".into() }, cnf)
        .await
        .unwrap();
    store
        .complete(
            parent_id,
            Envelope::success(
                ObjectName::Nodepool,
                "create_nodepool",
                creds(),
                serde_json::json!({"nodepool_name": "worker1", "nodes_task_ids": [success_id.to_string(), failure_id.to_string()]}),
                meta,
            ),
        )
        .await
        .unwrap();

    let status = get_task_status(&store, parent_id, &creds()).await.unwrap();
    assert_eq!(status.state, controlplane::tasks::TaskState::Failure);
    assert_eq!(status.error.as_deref(), Some("Some sub-tasks failed"));
    let subtasks = status.meta.get("subtasks").and_then(|v| v.as_array()).unwrap();
    assert_eq!(subtasks.len(), 2);
}

#[tokio::test]
async fn ambiguous_server_discovery_fails_with_both_names_listed() {
    use controlplane::cloudapi::CloudApi;

    let cloud = FakeCloudApi::default();
    cloud.seed_server("demo-controlplane-1-aaaaa", "203.0.113.1", "demo-net", "10.0.0.1");
    cloud.seed_server("demo-controlplane-1-bbbbb", "203.0.113.2", "demo-net", "10.0.0.2");

    let err = cloud
        .get_server_info(&creds(), "demo-controlplane-1")
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("demo-controlplane-1-aaaaa"));
    assert!(message.contains("demo-controlplane-1-bbbbb"));
}
