use std::{collections::HashMap, time::Duration};

use tarpc::context;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::mr::{
    coordinator::ServerClient,
    function::wc,
    rpc::TaskKind,
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct KeyValue {
    key: String,
    value: String,
}

impl KeyValue {
    pub fn new(key: String, value: String) -> Self {
        Self { key, value }
    }
}

/// Calls the user-defined map function
pub fn call_map_func(
    map_func: &(dyn Fn(&str, &str) -> Vec<(String, String)> + Send + Sync),
    filename: &str,
    contents: &str,
) -> Vec<KeyValue> {
    map_func(filename, contents)
        .into_iter()
        .map(|(k, v)| KeyValue::new(k, v))
        .collect()
}

/// Calls the user-defined reduce function
pub fn call_reduce_func(
    reduce_func: &(dyn Fn(&str, Vec<String>) -> String + Send + Sync),
    key: &str,
    values: Vec<String>,
) -> String {
    reduce_func(key, values)
}

/// FNV-1a, 32-bit. Spec pins this exact hash for bucketing map output by
/// key, so it's spelled out here rather than reached for from a crate.
fn fnv32a(key: &str) -> u32 {
    const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
    const FNV_PRIME: u32 = 0x01000193;
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

async fn read_files(files: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    let mut contents = Vec::with_capacity(files.len());
    for file in files {
        let text = tokio::fs::read_to_string(file).await?;
        contents.push((file.clone(), text));
    }
    Ok(contents)
}

/// Read an input file and invoke the user map function over it, bucketing
/// the emitted pairs by `fnv32a(key) mod n_reduce` and writing each
/// non-empty bucket to a `tempm-out-<task_id>-<reduce_id>` file. Returns
/// the set of temp filenames actually created.
pub async fn run_map_task(task_id: u32, files: Vec<String>, n_reduce: u32) -> anyhow::Result<Vec<String>> {
    let mut buckets: Vec<Vec<KeyValue>> = vec![Vec::new(); n_reduce as usize];
    for (filename, contents) in read_files(&files).await? {
        info!(task_id, filename, "mapping input file");
        let pairs = call_map_func(&wc::map, &filename, &contents);
        for kv in pairs {
            let bucket = (fnv32a(&kv.key) % n_reduce) as usize;
            buckets[bucket].push(kv);
        }
    }

    let mut files_created = Vec::new();
    for (reduce_id, bucket) in buckets.into_iter().enumerate() {
        if bucket.is_empty() {
            continue;
        }
        let temp_name = format!("tempm-out-{task_id}-{reduce_id}");
        let mut file = tokio::fs::File::create(&temp_name).await?;
        for kv in &bucket {
            file.write_all(format!("{}:::{}\n", kv.key, kv.value).as_bytes())
                .await?;
        }
        files_created.push(temp_name);
    }
    info!(task_id, ?files_created, "map task finished");
    Ok(files_created)
}

/// Read every assigned intermediate file, group by key, and invoke the
/// user reduce function once per key, writing the single
/// `tempmr-out-<reduce_id>` output file.
pub async fn run_reduce_task(reduce_id: u32, files: Vec<String>) -> anyhow::Result<String> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (filename, contents) in read_files(&files).await? {
        info!(reduce_id, filename, "reducing intermediate file");
        for line in contents.lines() {
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(":::") else {
                anyhow::bail!("malformed intermediate record in {filename}: {line}");
            };
            grouped.entry(key.to_string()).or_default().push(value.to_string());
        }
    }

    let mut keys: Vec<String> = grouped.keys().cloned().collect();
    keys.sort();

    let temp_name = format!("tempmr-out-{reduce_id}");
    let mut file = tokio::fs::File::create(&temp_name).await?;
    for key in keys {
        let values = grouped.remove(&key).unwrap_or_default();
        let result = call_reduce_func(&wc::reduce, &key, values);
        file.write_all(format!("{key} {result}\n").as_bytes()).await?;
    }
    info!(reduce_id, %temp_name, "reduce task finished");
    Ok(temp_name)
}

/// Spawns the 1s-cadence heartbeat. Per the spec, a shutdown reply must
/// terminate the process even if the main loop is stuck in user code, so
/// this reaches for `std::process::exit` rather than a cooperative
/// notify that only the next `.await` point would observe.
fn spawn_heartbeat(client: ServerClient, worker_id: u32) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            match client.heartbeat(context::current(), worker_id).await {
                Ok(res) if res.should_shut_down => {
                    info!(worker_id, "heartbeat observed shutdown, terminating process");
                    std::process::exit(0);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(worker_id, error = %e, "heartbeat RPC failed, will retry");
                }
            }
        }
    });
}

/// Drives the full register -> loop(GetTask, dispatch, TaskDone) -> exit
/// lifecycle for one worker process.
pub async fn run(client: ServerClient) -> anyhow::Result<()> {
    let worker_id = client.register_worker(context::current()).await?.worker_id;
    info!(worker_id, "registered with coordinator");

    spawn_heartbeat(client.clone(), worker_id);

    loop {
        let task = client.get_task(context::current(), worker_id).await?;
        match task.kind {
            TaskKind::Map => {
                let files_created = run_map_task(task.task_id, task.files, task.n_reduce).await?;
                report_done(&client, worker_id, task.task_id, files_created).await?;
            }
            TaskKind::Reduce => {
                let file_created = run_reduce_task(task.reduce_id, task.files).await?;
                report_done(&client, worker_id, task.task_id, vec![file_created]).await?;
            }
            TaskKind::NoTask => {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            TaskKind::Shutdown => {
                info!(worker_id, "coordinator signaled shutdown, exiting worker loop");
                return Ok(());
            }
        }
    }
}

async fn report_done(
    client: &ServerClient,
    worker_id: u32,
    task_id: u32,
    files_created: Vec<String>,
) -> anyhow::Result<()> {
    match client
        .task_done(context::current(), worker_id, task_id, files_created)
        .await?
    {
        Ok(_) => Ok(()),
        Err(e) => {
            // The coordinator failed to commit our outputs. We don't
            // retry the rename ourselves; the task stays InProgress at
            // the coordinator and will eventually be reissued by the
            // timeout machinery.
            warn!(worker_id, task_id, error = %e, "task completion was not acknowledged");
            Ok(())
        }
    }
}
