//! Worker Supervisor: spawns one worker subprocess per configured GPU,
//! restricting device visibility before the child's process image loads,
//! probes health until ready, and owns cooperative/forced shutdown. The
//! transport (HTTP loopback or stdio JSON-RPC) is selected here, at spawn
//! time, from `WorkerPoolConfig::transport` — the worker binary itself
//! only obeys whatever `WORKER_RPC_MODE` it's launched with.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use dispatch_core::config::{WorkerPoolConfig, WorkerTransportKind};
use dispatch_core::scheduler::GpuConfig;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

use crate::worker_client::WorkerClient;

const HEALTH_PROBE_INTERVAL: Duration = Duration::from_millis(200);
const STARTUP_DEADLINE: Duration = Duration::from_secs(15);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct ManagedWorker {
    child: Child,
    client: WorkerClient,
}

pub struct WorkerSupervisor {
    workers: HashMap<u32, ManagedWorker>,
}

fn transport_env(transport: WorkerTransportKind) -> &'static str {
    match transport {
        WorkerTransportKind::Http => "http",
        WorkerTransportKind::Stdio => "stdio",
    }
}

// Device visibility must be set before the child's process image loads,
// not after spawn returns, so this is built directly onto the Command
// rather than applied via a post-spawn IPC call.
fn build_command(worker_binary: &str, device: u32, transport: WorkerTransportKind, port: Option<u16>, output_dir: &Path) -> Command {
    let mut cmd = Command::new(worker_binary);
    cmd.arg("--output-dir")
        .arg(output_dir)
        .env("CUDA_VISIBLE_DEVICES", device.to_string())
        .env("WORKER_GPU_ID", device.to_string())
        .env("WORKER_RPC_MODE", transport_env(transport))
        .kill_on_drop(true);
    if let Some(port) = port {
        cmd.env("WORKER_PORT", port.to_string());
    }
    cmd
}

impl WorkerSupervisor {
    /// Spawns a worker binary per configured GPU and waits for each to
    /// report healthy. Returns an error if any worker misses the deadline.
    pub async fn spawn_all(config: &WorkerPoolConfig, worker_binary: &str, output_dir: &Path) -> anyhow::Result<Self> {
        let mut workers = HashMap::new();
        for gpu in &config.gpus {
            let managed = Self::spawn_one(worker_binary, gpu, config, output_dir).await?;
            workers.insert(gpu.device, managed);
        }
        Ok(Self { workers })
    }

    async fn spawn_one(worker_binary: &str, gpu: &GpuConfig, config: &WorkerPoolConfig, output_dir: &Path) -> anyhow::Result<ManagedWorker> {
        match config.transport {
            WorkerTransportKind::Http => Self::spawn_http(worker_binary, gpu, config, output_dir).await,
            WorkerTransportKind::Stdio => Self::spawn_stdio(worker_binary, gpu, output_dir).await,
        }
    }

    async fn spawn_http(worker_binary: &str, gpu: &GpuConfig, config: &WorkerPoolConfig, output_dir: &Path) -> anyhow::Result<ManagedWorker> {
        let port = config.base_port + gpu.device as u16;
        let child = build_command(worker_binary, gpu.device, WorkerTransportKind::Http, Some(port), output_dir)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn worker for device {}: {e}", gpu.device))?;

        let client = WorkerClient::http(config.worker_url(gpu.device));
        Self::wait_until_healthy(&client, gpu).await?;
        log::info!("worker for device {} ({}) ready (http)", gpu.device, gpu.name);
        Ok(ManagedWorker { child, client })
    }

    async fn spawn_stdio(worker_binary: &str, gpu: &GpuConfig, output_dir: &Path) -> anyhow::Result<ManagedWorker> {
        let mut command = build_command(worker_binary, gpu.device, WorkerTransportKind::Stdio, None, output_dir);
        command.stdin(Stdio::piped()).stdout(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn worker for device {}: {e}", gpu.device))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow::anyhow!("worker for device {} has no stdin pipe", gpu.device))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("worker for device {} has no stdout pipe", gpu.device))?;

        let client = WorkerClient::stdio(stdin, stdout);
        Self::wait_until_healthy(&client, gpu).await?;
        log::info!("worker for device {} ({}) ready (stdio)", gpu.device, gpu.name);
        Ok(ManagedWorker { child, client })
    }

    async fn wait_until_healthy(client: &WorkerClient, gpu: &GpuConfig) -> anyhow::Result<()> {
        timeout(STARTUP_DEADLINE, async {
            loop {
                if client.health().await.is_ok() {
                    return;
                }
                sleep(HEALTH_PROBE_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| anyhow::anyhow!("worker for device {} did not become healthy in time", gpu.device))
    }

    pub fn client(&self, device: u32) -> Option<WorkerClient> {
        self.workers.get(&device).map(|w| w.client.clone())
    }

    /// Cooperative stop on every worker, then force-terminate stragglers
    /// after the grace period.
    pub async fn shutdown(&mut self) {
        for (device, worker) in self.workers.iter() {
            if let Err(e) = worker.client.stop().await {
                log::warn!("worker {device} did not acknowledge stop: {e}");
            }
        }
        sleep(SHUTDOWN_GRACE).await;
        for (device, worker) in self.workers.iter_mut() {
            match worker.child.try_wait() {
                Ok(Some(status)) => log::info!("worker {device} exited: {status}"),
                _ => {
                    log::warn!("worker {device} still running after grace period, killing");
                    let _ = worker.child.start_kill();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envs_of(cmd: &Command) -> HashMap<String, String> {
        cmd.as_std()
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_string_lossy().to_string(), v?.to_string_lossy().to_string())))
            .collect()
    }

    #[test]
    fn http_command_passes_output_dir_port_and_mode() {
        let cmd = build_command("dispatch-worker", 1, WorkerTransportKind::Http, Some(7861), Path::new("/tmp/my-outputs"));
        let std_cmd = cmd.as_std();

        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(args, vec!["--output-dir", "/tmp/my-outputs"]);

        let envs = envs_of(&cmd);
        assert_eq!(envs.get("CUDA_VISIBLE_DEVICES").map(String::as_str), Some("1"));
        assert_eq!(envs.get("WORKER_GPU_ID").map(String::as_str), Some("1"));
        assert_eq!(envs.get("WORKER_PORT").map(String::as_str), Some("7861"));
        assert_eq!(envs.get("WORKER_RPC_MODE").map(String::as_str), Some("http"));
    }

    #[test]
    fn stdio_command_omits_port_and_sets_mode() {
        let cmd = build_command("dispatch-worker", 2, WorkerTransportKind::Stdio, None, Path::new("/tmp/my-outputs"));
        let envs = envs_of(&cmd);
        assert_eq!(envs.get("WORKER_RPC_MODE").map(String::as_str), Some("stdio"));
        assert!(!envs.contains_key("WORKER_PORT"));
    }
}
