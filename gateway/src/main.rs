mod cli;
mod history;
mod image_metadata;
mod monitor;
mod routes;
mod state;
mod supervisor;
mod worker_client;
mod ws;

use clap::Parser;
use dispatch_core::config::WorkerPoolConfig;
use dispatch_core::metadata_store::MetadataStore;
use dispatch_core::scheduler::Scheduler;

use crate::state::GatewayState;
use crate::supervisor::WorkerSupervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = cli::Args::parse();

    let config = match WorkerPoolConfig::load(&args.worker_config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("failed to load worker pool config: {e}");
            std::process::exit(1);
        }
    };

    if !config.enabled || config.gpus.is_empty() {
        log::error!("worker pool config has no enabled GPUs");
        std::process::exit(1);
    }

    let metadata = match MetadataStore::open(&args.db_path) {
        Ok(store) => store,
        Err(e) => {
            log::error!("failed to open metadata store: {e}");
            std::process::exit(1);
        }
    };

    let supervisor = match WorkerSupervisor::spawn_all(&config, &args.worker_binary, &args.output_dir).await {
        Ok(s) => s,
        Err(e) => {
            log::error!("failed to start worker pool: {e}");
            std::process::exit(1);
        }
    };

    let scheduler = Scheduler::new(config.gpus.clone());
    let gateway_state = GatewayState::new(scheduler, metadata, supervisor, args.output_dir.clone(), args.task_ttl_secs);

    let reap_state = gateway_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            reap_state.reap_expired_tasks().await;
        }
    });

    let serve_state = gateway_state.clone();
    let addr = ([0, 0, 0, 0], args.port);
    let server = tokio::spawn(async move {
        warp::serve(routes::routes(serve_state)).run(addr).await;
    });

    log::info!("dispatch gateway listening on port {}", args.port);
    tokio::signal::ctrl_c().await.ok();
    log::info!("shutting down");
    server.abort();
    gateway_state.supervisor.write().await.shutdown().await;

    Ok(())
}
