use std::path::PathBuf;

use clap::Parser;

/// Dispatch gateway CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Port to bind the HTTP/WebSocket server to
    #[arg(long, default_value = "8188")]
    pub port: u16,

    /// Path to the worker pool configuration JSON
    #[arg(long, default_value = "worker_pool.json")]
    pub worker_config: PathBuf,

    /// Directory under which generated artifacts are written, scanned for history
    #[arg(long, default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Path to the metadata store's SQLite database file
    #[arg(long, default_value = "metadata.sqlite3")]
    pub db_path: PathBuf,

    /// Seconds a finished TaskRecord remains queryable before being reaped
    #[arg(long, default_value = "60")]
    pub task_ttl_secs: i64,

    /// Worker binary to spawn, one subprocess per configured GPU
    #[arg(long, default_value = "dispatch-worker")]
    pub worker_binary: String,
}
