//! Client side of the worker protocol: HTTP loopback for
//! `WorkerTransportKind::Http` workers, newline-delimited JSON-RPC over a
//! piped stdin/stdout for `WorkerTransportKind::Stdio` workers. The
//! supervisor picks the variant at spawn time; callers only see `WorkerClient`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use dispatch_core::protocol::{
    GenerateParams, GenerateResult, HealthResponse, ProgressResponse, RpcError, RpcRequest, RpcResponse, StopResult,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

#[derive(Clone)]
pub enum WorkerClient {
    Http(HttpWorkerClient),
    Stdio(StdioWorkerClient),
}

impl WorkerClient {
    pub fn http(base_url: String) -> Self {
        WorkerClient::Http(HttpWorkerClient { http: reqwest::Client::new(), base_url })
    }

    pub fn stdio(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        WorkerClient::Stdio(StdioWorkerClient::spawn(stdin, stdout))
    }

    pub async fn health(&self) -> anyhow::Result<HealthResponse> {
        match self {
            WorkerClient::Http(c) => c.health().await,
            WorkerClient::Stdio(c) => c.health().await,
        }
    }

    pub async fn generate(&self, params: &GenerateParams) -> anyhow::Result<GenerateResult> {
        match self {
            WorkerClient::Http(c) => c.generate(params).await,
            WorkerClient::Stdio(c) => c.generate(params).await,
        }
    }

    pub async fn progress(&self, task_id: &str) -> anyhow::Result<ProgressResponse> {
        match self {
            WorkerClient::Http(c) => c.progress(task_id).await,
            WorkerClient::Stdio(c) => c.progress(task_id).await,
        }
    }

    pub async fn stop(&self) -> anyhow::Result<StopResult> {
        match self {
            WorkerClient::Http(c) => c.stop().await,
            WorkerClient::Stdio(c) => c.stop().await,
        }
    }
}

#[derive(Clone)]
pub struct HttpWorkerClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpWorkerClient {
    pub async fn health(&self) -> anyhow::Result<HealthResponse> {
        let resp = self.http.get(format!("{}/health", self.base_url)).send().await?;
        Self::into_json(resp).await
    }

    pub async fn generate(&self, params: &GenerateParams) -> anyhow::Result<GenerateResult> {
        let resp = self.http.post(format!("{}/generate", self.base_url)).json(params).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if let Ok(result) = serde_json::from_str::<GenerateResult>(&body) {
            return Ok(result);
        }
        if !status.is_success() {
            anyhow::bail!("worker responded with {status}: {body}");
        }
        anyhow::bail!("worker sent an unrecognized generate response: {body}");
    }

    pub async fn progress(&self, task_id: &str) -> anyhow::Result<ProgressResponse> {
        let resp = self.http.get(format!("{}/progress/{}", self.base_url, task_id)).send().await?;
        Self::into_json(resp).await
    }

    pub async fn stop(&self) -> anyhow::Result<StopResult> {
        let resp = self.http.post(format!("{}/stop", self.base_url)).send().await?;
        Self::into_json(resp).await
    }

    async fn into_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("worker responded with {status}: {body}");
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Talks JSON-RPC to a worker over its stdin/stdout pipes. One background
/// task reads response lines and routes them to the matching in-flight
/// request by numeric id; writes are serialized behind `stdin`.
#[derive(Clone)]
pub struct StdioWorkerClient {
    inner: Arc<StdioInner>,
}

struct StdioInner {
    stdin: AsyncMutex<ChildStdin>,
    pending: SyncMutex<HashMap<u64, oneshot::Sender<RpcResponse>>>,
    next_id: AtomicU64,
}

impl StdioWorkerClient {
    fn spawn(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        let inner = Arc::new(StdioInner {
            stdin: AsyncMutex::new(stdin),
            pending: SyncMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });

        let reader_inner = inner.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Ok(resp) = serde_json::from_str::<RpcResponse>(&line) {
                    if let Some(id) = resp.id.as_u64() {
                        if let Some(tx) = reader_inner.pending.lock().unwrap().remove(&id) {
                            let _ = tx.send(resp);
                        }
                    }
                }
            }
        });

        Self { inner }
    }

    async fn request(&self, method: &str, params: serde_json::Value) -> anyhow::Result<RpcResponse> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id, tx);

        let req = RpcRequest { jsonrpc: "2.0".to_string(), id: serde_json::Value::from(id), method: method.to_string(), params };
        let mut line = serde_json::to_vec(&req)?;
        line.push(b'\n');
        {
            let mut stdin = self.inner.stdin.lock().await;
            stdin.write_all(&line).await?;
            stdin.flush().await?;
        }

        rx.await.map_err(|_| anyhow::anyhow!("worker stdio connection closed before responding to {method}"))
    }

    fn result_or_bail<T: serde::de::DeserializeOwned>(resp: RpcResponse) -> anyhow::Result<T> {
        match (resp.result, resp.error) {
            (Some(v), _) => Ok(serde_json::from_value(v)?),
            (None, Some(RpcError { message })) => anyhow::bail!(message),
            (None, None) => anyhow::bail!("empty worker response"),
        }
    }

    pub async fn health(&self) -> anyhow::Result<HealthResponse> {
        let resp = self.request("health", serde_json::Value::Null).await?;
        Self::result_or_bail(resp)
    }

    pub async fn generate(&self, params: &GenerateParams) -> anyhow::Result<GenerateResult> {
        let resp = self.request("generate", serde_json::to_value(params)?).await?;
        match (resp.result, resp.error) {
            (Some(v), _) => Ok(serde_json::from_value(v)?),
            (None, Some(RpcError { message })) => Ok(GenerateResult::Err { success: false, error: message }),
            (None, None) => anyhow::bail!("empty worker response"),
        }
    }

    pub async fn progress(&self, task_id: &str) -> anyhow::Result<ProgressResponse> {
        let resp = self.request("progress", serde_json::json!({ "task_id": task_id })).await?;
        Self::result_or_bail(resp)
    }

    pub async fn stop(&self) -> anyhow::Result<StopResult> {
        let resp = self.request("stop", serde_json::Value::Null).await?;
        Self::result_or_bail(resp)
    }
}
