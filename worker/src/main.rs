mod cli;
mod engine;
mod http;
mod registry;
mod stdio;

use clap::Parser;

use crate::http::WorkerState;
use crate::registry::TaskRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = cli::Args::parse();

    let registry = TaskRegistry::new(std::time::Duration::from_secs(args.task_ttl_secs));
    let state = WorkerState { device: args.device, output_dir: args.output_dir.clone(), registry: registry.clone() };

    let reap_registry = registry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            interval.tick().await;
            reap_registry.reap_expired().await;
        }
    });

    match (args.rpc_mode.as_str(), args.port) {
        ("stdio", _) => {
            log::info!("worker for device {} serving stdio JSON-RPC", args.device);
            stdio::run(state).await
        }
        ("http", Some(port)) => {
            log::info!("worker for device {} serving HTTP on port {}", args.device, port);
            warp::serve(http::routes(state)).run(([127, 0, 0, 1], port)).await;
            Ok(())
        }
        ("http", None) => anyhow::bail!("--port (or WORKER_PORT) is required for http transport"),
        (other, _) => anyhow::bail!("unknown rpc mode: {other}"),
    }
}
