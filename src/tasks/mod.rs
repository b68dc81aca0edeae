/// Durable task enqueue, hierarchical result envelope, and status
/// aggregation — the asynchronous reconciliation engine's backbone.
pub mod envelope;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use envelope::{get_task_status, Envelope, ObjectName, TaskId, TaskState, TaskStatus};
pub use registry::TaskOp;
pub use scheduler::{Scheduler, TaskHandle, TaskSpawner};
pub use store::{InMemoryTaskStore, TaskStore};
