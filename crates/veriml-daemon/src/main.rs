// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use veriml_daemon::config::DaemonConfig;
use veriml_daemon::server::PredictionService;
use veriml_protocol::pb::veriml_server::VerimlServer;

#[derive(Debug, Parser)]
#[command(name = "veriml-daemon")]
#[command(about = "veriml attested-prediction gRPC daemon")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:50061")]
    listen: String,

    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Worker command line; the model and input paths are appended.
    #[arg(long)]
    worker_cmd: Option<String>,

    #[arg(long)]
    worker_timeout_secs: Option<u64>,

    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log))
        .init();

    let mut config = DaemonConfig::from_env();
    if let Some(raw) = args.worker_cmd {
        let cmd: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
        if !cmd.is_empty() {
            config.worker_cmd = cmd;
        }
    }
    if let Some(secs) = args.worker_timeout_secs {
        config.worker_timeout = std::time::Duration::from_secs(secs);
    }

    std::fs::create_dir_all(&args.data_dir)?;

    let addr: SocketAddr = args.listen.parse()?;
    let svc = PredictionService::build(&args.data_dir, config)
        .map_err(|err| format!("service init failed: {err}"))?;

    tracing::info!(%addr, data_dir = %args.data_dir, "starting veriml gRPC server");

    tonic::transport::Server::builder()
        .add_service(VerimlServer::new(svc))
        .serve(addr)
        .await?;

    Ok(())
}
