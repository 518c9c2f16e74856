use std::net::SocketAddr;

use clap::Parser;
use mr_kv_rs::mr::{coordinator::ServerClient, worker};
use tarpc::{client, tokio_serde::formats::Json};
use tracing::{error, info};

/// Registers with a coordinator, then loops pulling and executing map or
/// reduce tasks until told to shut down.
#[derive(Parser)]
struct Args {
    /// Coordinator address to connect to.
    #[arg(short, long, default_value = "127.0.0.1:1030")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let client_transport = match tarpc::serde_transport::tcp::connect(args.addr, Json::default).await {
        Ok(t) => t,
        Err(e) => {
            error!(addr = %args.addr, error = %e, "failed to connect to coordinator");
            return Ok(());
        }
    };

    let client = ServerClient::new(client::Config::default(), client_transport).spawn();
    info!(addr = %args.addr, "connected to coordinator");

    worker::run(client).await
}
