//! Worker pool configuration: the JSON document describing which GPUs exist
//! and how they should be weighted, loaded once at gateway startup.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::scheduler::GpuConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub gpus: Vec<GpuConfig>,
    /// Base URL template for HTTP-mode workers, e.g. `http://127.0.0.1:{port}`.
    /// `{port}` is substituted with `base_port + device`.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_transport")]
    pub transport: WorkerTransportKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerTransportKind {
    Http,
    Stdio,
}

fn default_base_port() -> u16 {
    7860
}

fn default_transport() -> WorkerTransportKind {
    WorkerTransportKind::Http
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { enabled: false, gpus: Vec::new(), base_port: default_base_port(), transport: default_transport() }
    }
}

impl WorkerPoolConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| DispatchError::Startup(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| DispatchError::Startup(e.to_string()))
    }

    pub fn worker_url(&self, device: u32) -> String {
        format!("http://127.0.0.1:{}", self.base_port + device as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_document() {
        let cfg: WorkerPoolConfig = serde_json::from_str(
            r#"{"enabled": true, "gpus": [{"device": 0, "name": "A", "weight": 1}]}"#,
        )
        .unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.gpus.len(), 1);
        assert_eq!(cfg.transport, WorkerTransportKind::Http);
    }

    #[test]
    fn worker_url_offsets_by_device() {
        let cfg = WorkerPoolConfig { base_port: 8000, ..Default::default() };
        assert_eq!(cfg.worker_url(2), "http://127.0.0.1:8002");
    }
}
