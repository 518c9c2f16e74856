//! Drives a full word-count job directly against the library API (no
//! network transport involved) to check the end-to-end shape described in
//! the job lifecycle: map phase, the rename-to-final commit, the phase
//! transition to reduce, and the shutdown gate on every worker's
//! heartbeat.

use mr_kv_rs::mr::{
    coordinator::{Coordinator, Server},
    rpc::TaskKind,
    worker::{run_map_task, run_reduce_task},
};
use tarpc::context::Context;

async fn drive_one_task(coordinator: &Coordinator, worker_id: u32) -> TaskKind {
    let task = Server::get_task(coordinator.clone(), Context::current(), worker_id).await;
    match task.kind {
        TaskKind::Map => {
            let files_created = run_map_task(task.task_id, task.files, task.n_reduce)
                .await
                .unwrap();
            Server::task_done(
                coordinator.clone(),
                Context::current(),
                worker_id,
                task.task_id,
                files_created,
            )
            .await
            .unwrap();
        }
        TaskKind::Reduce => {
            let file_created = run_reduce_task(task.reduce_id, task.files).await.unwrap();
            Server::task_done(
                coordinator.clone(),
                Context::current(),
                worker_id,
                task.task_id,
                vec![file_created],
            )
            .await
            .unwrap();
        }
        TaskKind::NoTask | TaskKind::Shutdown => {}
    }
    task.kind
}

#[tokio::test]
async fn word_count_job_produces_expected_output() {
    let dir = tempfile::tempdir().unwrap();
    let cwd = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    tokio::fs::write("a.txt", "cat dog").await.unwrap();
    tokio::fs::write("b.txt", "cat cat").await.unwrap();

    let coordinator = Coordinator::new(vec!["a.txt".to_string(), "b.txt".to_string()], 1);
    let worker_id = Server::register_worker(coordinator.clone(), Context::current())
        .await
        .worker_id;

    // Drive tasks until shutdown is observed; a single worker sees every
    // task in order since there's no contention.
    loop {
        if drive_one_task(&coordinator, worker_id).await == TaskKind::Shutdown {
            break;
        }
    }

    // The coordinator is not done until the worker's heartbeat
    // acknowledges shutdown.
    assert!(!coordinator.done());
    let hb = Server::heartbeat(coordinator.clone(), Context::current(), worker_id).await;
    assert!(hb.should_shut_down);
    assert!(coordinator.done());

    let output = tokio::fs::read_to_string("mr-out-0").await.unwrap();
    let mut lines: Vec<&str> = output.lines().collect();
    lines.sort();
    assert_eq!(lines, vec!["cat 3", "dog 1"]);

    // Intermediates are swept once the job is fully done.
    assert!(!std::path::Path::new("m-out-0-0").exists());
    assert!(!std::path::Path::new("m-out-1-0").exists());

    std::env::set_current_dir(cwd).unwrap();
}
