use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use futures::StreamExt;
use mr_kv_rs::mr::coordinator::{Coordinator, Server};
use tarpc::{server::incoming::Incoming, tokio_serde::formats::Json};
use tokio::time::sleep;
use tracing::info;

/// Hands out map and reduce tasks to a dynamic pool of workers.
#[derive(Parser)]
struct Args {
    /// Input files; each becomes one map task.
    #[arg(required = true)]
    files: Vec<String>,

    /// Reduce fanout for this job.
    #[arg(short = 'r', long, default_value_t = 2)]
    n_reduce: u32,

    /// Address to bind the RPC listener on.
    #[arg(short, long, default_value = "127.0.0.1:1030")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    info!(
        files = args.files.len(),
        n_reduce = args.n_reduce,
        "starting coordinator"
    );

    let coordinator = Coordinator::new(args.files, args.n_reduce);

    let server_transport = tarpc::serde_transport::tcp::listen(args.addr, Json::default).await?;
    info!(addr = %args.addr, "RPC listener bound, waiting for workers");

    let serving = coordinator.clone();
    tokio::spawn(
        server_transport
            .filter_map(|r| async { r.ok() })
            .map(tarpc::server::BaseChannel::with_defaults)
            .execute(serving.serve()),
    );

    while !coordinator.done() {
        sleep(Duration::from_secs(1)).await;
    }

    info!("job finished, committed outputs are at mr-out-*");
    Ok(())
}
