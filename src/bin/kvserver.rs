use std::net::SocketAddr;

use clap::Parser;
use futures::StreamExt;
use mr_kv_rs::kv::server::{Kv, KvServer};
use tarpc::{server::incoming::Incoming, tokio_serde::formats::Json};
use tracing::info;

/// Serves the in-memory versioned key-value store.
#[derive(Parser)]
struct Args {
    /// Address to bind the RPC listener on.
    #[arg(short, long, default_value = "127.0.0.1:1031")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let kv = KvServer::new();

    let server_transport = tarpc::serde_transport::tcp::listen(args.addr, Json::default).await?;
    info!(addr = %args.addr, "KV server listening");

    server_transport
        .filter_map(|r| async { r.ok() })
        .map(tarpc::server::BaseChannel::with_defaults)
        .execute(kv.serve())
        .await;

    Ok(())
}
