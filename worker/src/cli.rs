use clap::Parser;

/// Dispatch worker CLI. One process per GPU device.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Logical device id this worker owns (the supervisor also restricts
    /// device visibility itself via CUDA_VISIBLE_DEVICES before spawn).
    #[arg(long, env = "WORKER_GPU_ID", default_value = "0")]
    pub device: u32,

    /// Serve the HTTP transport variant on this port instead of stdio JSON-RPC
    #[arg(long, env = "WORKER_PORT")]
    pub port: Option<u16>,

    /// Transport to serve; `http` requires --port, `stdio` ignores it
    #[arg(long, env = "WORKER_RPC_MODE", default_value = "http")]
    pub rpc_mode: String,

    /// Directory to write generated artifacts under
    #[arg(long, default_value = "outputs")]
    pub output_dir: std::path::PathBuf,

    /// Seconds a finished task's progress entry remains queryable
    #[arg(long, default_value = "60")]
    pub task_ttl_secs: u64,
}
