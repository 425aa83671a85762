//! Stdio JSON-RPC transport variant: newline-delimited
//! `{jsonrpc, id, method, params}` requests on stdin, matching responses on
//! stdout. `generate` returns `{accepted:true, task_id}` immediately;
//! progress is polled separately via the `progress` method.

use dispatch_core::argument_contract::{self, ArgumentVector};
use dispatch_core::protocol::{GenerateParams, HealthResponse, ProgressParams, ProgressResponse, RpcError, RpcRequest, RpcResponse, StopResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::engine::{self, EngineJob};
use crate::http::WorkerState;

pub async fn run(state: WorkerState) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(req) => handle_request(req, state.clone()).await,
            Err(e) => RpcResponse {
                jsonrpc: "2.0".to_string(),
                id: serde_json::Value::Null,
                result: None,
                error: Some(RpcError { message: format!("parse error: {e}") }),
            },
        };
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn handle_request(req: RpcRequest, state: WorkerState) -> RpcResponse {
    let result = match req.method.as_str() {
        "health" => Ok(serde_json::to_value(HealthResponse { status: "ok".to_string(), gpu: state.device as i64 }).unwrap()),
        "generate" => handle_generate(req.params, state).await,
        "progress" => handle_progress(req.params, state).await,
        "stop" => {
            let stopped = state.registry.stop_all().await;
            Ok(serde_json::to_value(StopResult { success: true, stopped_tasks: stopped }).unwrap())
        }
        other => Err(format!("unknown method: {other}")),
    };

    match result {
        Ok(value) => RpcResponse { jsonrpc: "2.0".to_string(), id: req.id, result: Some(value), error: None },
        Err(message) => RpcResponse { jsonrpc: "2.0".to_string(), id: req.id, result: None, error: Some(RpcError { message }) },
    }
}

async fn handle_generate(params: serde_json::Value, state: WorkerState) -> Result<serde_json::Value, String> {
    let params: GenerateParams = serde_json::from_value(params).map_err(|e| e.to_string())?;
    argument_contract::validate(&ArgumentVector(params.args.clone()), params.contract_version)?;

    let stop_flag = state.registry.register(&params.task_id).await;
    let task_id = params.task_id.clone();
    let registry = state.registry.clone();
    let job = EngineJob { task_id: task_id.clone(), args: params.args, output_dir: state.output_dir.clone(), stop_flag };

    tokio::spawn(async move {
        let (tx, mut rx) = mpsc::channel::<ProgressResponse>(64);
        let registry_updates = registry.clone();
        let task_id_updates = task_id.clone();
        let updater = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                registry_updates.update(&task_id_updates, progress).await;
            }
        });

        match engine::run(job, tx).await {
            Ok(results) => {
                registry
                    .update(&task_id, ProgressResponse { percentage: 100, status_text: "Finished".to_string(), finished: true, preview: None, results, error: None })
                    .await;
            }
            Err(e) => {
                registry
                    .update(&task_id, ProgressResponse { percentage: 100, status_text: format!("Error: {e}"), finished: true, preview: None, results: vec![], error: Some(e) })
                    .await;
            }
        }
        updater.abort();
    });

    Ok(serde_json::json!({ "accepted": true, "task_id": params.task_id }))
}

async fn handle_progress(params: serde_json::Value, state: WorkerState) -> Result<serde_json::Value, String> {
    let params: ProgressParams = serde_json::from_value(params).map_err(|e| e.to_string())?;
    state
        .registry
        .get(&params.task_id)
        .await
        .map(|p| serde_json::to_value(p).unwrap())
        .ok_or_else(|| "unknown task".to_string())
}
