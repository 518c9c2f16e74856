//! Wire types shared between the coordinator and worker sides of the RPC
//! boundary. These are what the spec calls out as contractual: the field
//! names below are load-bearing even though `tarpc` generates the actual
//! envelope from the service trait in `coordinator.rs`.

use serde::{Deserialize, Serialize};

/// What kind of work (if any) `GetTask` handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Map,
    Reduce,
    /// No task is available right now, but the phase hasn't ended.
    NoTask,
    /// The job is done; the worker should exit.
    Shutdown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegisterWorkerRes {
    pub worker_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskRes {
    pub kind: TaskKind,
    pub task_id: u32,
    pub files: Vec<String>,
    pub n_reduce: u32,
    /// For a `Reduce` task, the output bucket (0..n_reduce) this task
    /// commits to as `mr-out-<reduce_id>`. Fixed at the reduce task's
    /// creation and carried across timeout reissues, unlike `task_id`
    /// (which is the task table identity and keeps climbing on reissue).
    /// Unused (0) for `Map`/`NoTask`/`Shutdown`.
    pub reduce_id: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskDoneRes;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartbeatRes {
    pub should_shut_down: bool,
}

/// Returned by `TaskDone` when the coordinator fails to commit the
/// worker's temp outputs. The worker must treat this as an unacknowledged
/// completion: it does not retry the rename itself, it just moves on and
/// lets the coordinator's timeout-and-reissue machinery pick the task back
/// up.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum CoordinatorRpcError {
    #[error("failed to commit outputs for task: {0}")]
    CommitFailed(String),
}
