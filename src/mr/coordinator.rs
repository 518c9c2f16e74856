use std::{
    fs,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use regex::Regex;
use tarpc::context::Context;
use tracing::{info, warn};

use crate::mr::rpc::{
    CoordinatorRpcError, GetTaskRes, HeartbeatRes, RegisterWorkerRes, TaskDoneRes, TaskKind,
};

/// A timed-out task is reissued rather than retried in place: once a task
/// has been idle for this long while `InProgress`, the coordinator assumes
/// the worker that took it is gone.
const TASK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Idle,
    InProgress,
    Completed,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskSpecKind {
    Map,
    Reduce,
}

#[derive(Debug, Clone)]
struct Task {
    kind: TaskSpecKind,
    files: Vec<String>,
    status: TaskStatus,
    assigned_at: Option<Instant>,
    /// For `Reduce` tasks, the output bucket (0..n_reduce) this task
    /// commits to. Fixed at creation and carried across reissues, unlike
    /// the task's table identity which keeps climbing. Unused for `Map`.
    reduce_id: u32,
}

impl Task {
    fn new_idle(kind: TaskSpecKind, files: Vec<String>, reduce_id: u32) -> Self {
        Self {
            kind,
            files,
            status: TaskStatus::Idle,
            assigned_at: None,
            reduce_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Map,
    Reduce,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct WorkerRecord {
    running: bool,
}

struct CoordinatorState {
    tasks: Vec<Task>,
    phase: Phase,
    n_reduce: u32,
    outstanding_map: u32,
    outstanding_reduce: u32,
    workers: Vec<WorkerRecord>,
    cleaned_up: bool,
}

impl CoordinatorState {
    /// Scan the task table for anything `InProgress` past the timeout and
    /// reissue it: mark the stale entry `TimedOut` and append a fresh
    /// `Idle` copy with the same files and kind. Task identities are
    /// never reused, only appended.
    fn reissue_timed_out(&mut self) {
        let now = Instant::now();
        let mut reissues = Vec::new();
        for (id, task) in self.tasks.iter_mut().enumerate() {
            if task.status == TaskStatus::InProgress {
                if let Some(assigned_at) = task.assigned_at {
                    if now.duration_since(assigned_at) > TASK_TIMEOUT {
                        task.status = TaskStatus::TimedOut;
                        reissues.push((id, task.kind, task.files.clone(), task.reduce_id));
                    }
                }
            }
        }
        for (id, kind, files, reduce_id) in reissues {
            warn!(task_id = id, "task timed out, reissuing a fresh copy");
            self.tasks.push(Task::new_idle(kind, files, reduce_id));
        }
    }

    /// First-fit scan for an `Idle` task of the given kind, ties broken by
    /// ascending identity.
    fn pick_idle(&mut self, kind: TaskSpecKind) -> Option<usize> {
        let id = self
            .tasks
            .iter()
            .position(|t| t.kind == kind && t.status == TaskStatus::Idle)?;
        self.tasks[id].status = TaskStatus::InProgress;
        self.tasks[id].assigned_at = Some(Instant::now());
        Some(id)
    }

    fn advance_to_reduce(&mut self) {
        info!("map phase complete, scanning intermediates and building reduce tasks");
        let pattern = Regex::new(r"^m-out-\d+-(\d+)$").expect("static regex is valid");
        let mut groups: Vec<Vec<String>> = vec![Vec::new(); self.n_reduce as usize];
        if let Ok(entries) = fs::read_dir(".") {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(caps) = pattern.captures(&name) {
                    if let Ok(reduce_id) = caps[1].parse::<usize>() {
                        if reduce_id < groups.len() {
                            groups[reduce_id].push(name);
                        }
                    }
                }
            }
        }
        for (reduce_id, files) in groups.into_iter().enumerate() {
            self.tasks
                .push(Task::new_idle(TaskSpecKind::Reduce, files, reduce_id as u32));
        }
        self.outstanding_reduce = self.n_reduce;
        self.phase = Phase::Reduce;
    }

    fn advance_to_shutdown(&mut self) {
        info!("reduce phase complete, entering shutdown");
        self.phase = Phase::Shutdown;
    }
}

/// Central scheduler for a MapReduce job. Holds the task table, phase, and
/// worker registry behind a single mutex so that task-state transitions,
/// the phase counters, and the phase variable are never observed or
/// mutated independently of one another.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<Mutex<CoordinatorState>>,
}

impl Coordinator {
    /// `files` becomes one map task per entry; `n_reduce` is the fixed
    /// reduce fanout for the whole job.
    pub fn new(files: Vec<String>, n_reduce: u32) -> Self {
        let outstanding_map = files.len() as u32;
        let tasks = files
            .into_iter()
            .map(|f| Task::new_idle(TaskSpecKind::Map, vec![f], 0))
            .collect();
        Self {
            state: Arc::new(Mutex::new(CoordinatorState {
                tasks,
                phase: Phase::Map,
                n_reduce,
                outstanding_map,
                outstanding_reduce: 0,
                workers: Vec::new(),
                cleaned_up: false,
            })),
        }
    }

    /// True once the job has entered shutdown and every registered worker
    /// has had its running flag cleared by a `Heartbeat` reply. Cleans up
    /// the `m-out-*` intermediates exactly once, the first time it
    /// observes full completion.
    pub fn done(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.reissue_timed_out();
        let finished =
            state.phase == Phase::Shutdown && state.workers.iter().all(|w| !w.running);
        if finished && !state.cleaned_up {
            Self::remove_intermediates();
            state.cleaned_up = true;
        }
        finished
    }

    fn remove_intermediates() {
        let pattern = Regex::new(r"^m-out-\d+-\d+$").expect("static regex is valid");
        if let Ok(entries) = fs::read_dir(".") {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if pattern.is_match(&name) {
                    let _ = fs::remove_file(&name);
                }
            }
        }
        info!("removed m-out-* intermediates");
    }
}

/// The RPC surface the worker drives. Field names on the request/response
/// types in `rpc.rs` are contractual; the method names here are the
/// "RPC name" callers see.
#[tarpc::service]
pub trait Server {
    async fn register_worker() -> RegisterWorkerRes;
    async fn get_task(worker_id: u32) -> GetTaskRes;
    async fn task_done(
        worker_id: u32,
        task_id: u32,
        files_created: Vec<String>,
    ) -> Result<TaskDoneRes, CoordinatorRpcError>;
    async fn heartbeat(worker_id: u32) -> HeartbeatRes;
}

#[tarpc::server]
impl Server for Coordinator {
    async fn register_worker(self, _: Context) -> RegisterWorkerRes {
        let mut state = self.state.lock().unwrap();
        let worker_id = state.workers.len() as u32;
        state.workers.push(WorkerRecord { running: true });
        info!(worker_id, "worker registered");
        RegisterWorkerRes { worker_id }
    }

    async fn get_task(self, _: Context, worker_id: u32) -> GetTaskRes {
        let mut state = self.state.lock().unwrap();
        state.reissue_timed_out();
        let no_task = |state: &CoordinatorState| GetTaskRes {
            kind: TaskKind::NoTask,
            task_id: 0,
            files: Vec::new(),
            n_reduce: state.n_reduce,
            reduce_id: 0,
        };
        match state.phase {
            Phase::Shutdown => GetTaskRes {
                kind: TaskKind::Shutdown,
                task_id: 0,
                files: Vec::new(),
                n_reduce: state.n_reduce,
                reduce_id: 0,
            },
            Phase::Map => match state.pick_idle(TaskSpecKind::Map) {
                Some(id) => {
                    info!(worker_id, task_id = id, "assigned map task");
                    GetTaskRes {
                        kind: TaskKind::Map,
                        task_id: id as u32,
                        files: state.tasks[id].files.clone(),
                        n_reduce: state.n_reduce,
                        reduce_id: 0,
                    }
                }
                None => no_task(&state),
            },
            Phase::Reduce => match state.pick_idle(TaskSpecKind::Reduce) {
                Some(id) => {
                    info!(worker_id, task_id = id, "assigned reduce task");
                    GetTaskRes {
                        kind: TaskKind::Reduce,
                        task_id: id as u32,
                        files: state.tasks[id].files.clone(),
                        n_reduce: state.n_reduce,
                        reduce_id: state.tasks[id].reduce_id,
                    }
                }
                None => no_task(&state),
            },
        }
    }

    async fn task_done(
        self,
        _: Context,
        worker_id: u32,
        task_id: u32,
        files_created: Vec<String>,
    ) -> Result<TaskDoneRes, CoordinatorRpcError> {
        let mut state = self.state.lock().unwrap();
        let Some(task) = state.tasks.get(task_id as usize) else {
            return Ok(TaskDoneRes);
        };
        if task.status != TaskStatus::InProgress {
            // Either a duplicate completion for an already-reissued task,
            // or a straggler from a task that already finished through
            // another replica. Drop it silently.
            return Ok(TaskDoneRes);
        }
        let kind = task.kind;

        // The rename is deliberately performed while still holding the
        // lock: it must be atomic with the counter decrement below, or a
        // concurrent GetTask could observe a phase transition before the
        // files it names actually exist under their final names.
        //
        // Names are validated up front, before any renames happen, so a
        // naming violation never leaves a partial commit on disk. The
        // renames themselves are staged: if one fails partway through the
        // batch, every rename already applied is rolled back rather than
        // left in place. Without this, a task that fails to fully commit
        // would stay `InProgress` and get reissued under a new task id,
        // while its partially-renamed outputs would still sit under the
        // original task id's final names — both copies would then be
        // picked up by the same reduce bucket and double-count the
        // task's key/value pairs.
        let mut renames: Vec<(String, String)> = Vec::with_capacity(files_created.len());
        for temp_name in &files_created {
            let Some(final_name) = temp_name.strip_prefix("temp") else {
                return Err(CoordinatorRpcError::CommitFailed(format!(
                    "output {temp_name} is missing the temp prefix"
                )));
            };
            renames.push((temp_name.clone(), final_name.to_string()));
        }

        let mut committed: Vec<(&String, &String)> = Vec::with_capacity(renames.len());
        for (temp_name, final_name) in &renames {
            if let Err(e) = fs::rename(temp_name, final_name) {
                for (temp_name, final_name) in committed.iter().rev() {
                    if let Err(rollback_err) = fs::rename(final_name, temp_name) {
                        warn!(
                            worker_id,
                            task_id,
                            temp_name = temp_name.as_str(),
                            final_name = final_name.as_str(),
                            error = %rollback_err,
                            "failed to roll back a partially committed rename"
                        );
                    }
                }
                return Err(CoordinatorRpcError::CommitFailed(format!(
                    "rename {temp_name} -> {final_name}: {e}"
                )));
            }
            committed.push((temp_name, final_name));
        }

        state.tasks[task_id as usize].status = TaskStatus::Completed;
        info!(worker_id, task_id, "task completed and committed");

        match kind {
            TaskSpecKind::Map => {
                state.outstanding_map -= 1;
                if state.outstanding_map == 0 {
                    state.advance_to_reduce();
                }
            }
            TaskSpecKind::Reduce => {
                state.outstanding_reduce -= 1;
                if state.outstanding_reduce == 0 {
                    state.advance_to_shutdown();
                }
            }
        }

        Ok(TaskDoneRes)
    }

    async fn heartbeat(self, _: Context, worker_id: u32) -> HeartbeatRes {
        let mut state = self.state.lock().unwrap();
        let should_shut_down = state.phase == Phase::Shutdown;
        if should_shut_down {
            if let Some(worker) = state.workers.get_mut(worker_id as usize) {
                worker.running = false;
            }
        }
        HeartbeatRes { should_shut_down }
    }
}
