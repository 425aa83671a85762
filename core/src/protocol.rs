//! Worker protocol: request/response and progress-polling wire types
//! shared between the gateway (client) and the worker (server). Both the
//! HTTP and stdio JSON-RPC variants carry the same params and result shapes.

use serde::{Deserialize, Serialize};

use crate::argument_contract::ArgValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateParams {
    pub task_id: String,
    pub args: Vec<ArgValue>,
    pub contract_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerateResult {
    Accepted { accepted: bool, task_id: String },
    Ok { success: bool, task_id: String, results: Vec<String> },
    Err { success: bool, error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressParams {
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub percentage: u8,
    #[serde(rename = "statusText")]
    pub status_text: String,
    pub finished: bool,
    pub preview: Option<String>,
    pub results: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressResponse {
    pub fn starting() -> Self {
        Self {
            percentage: 0,
            status_text: "Starting...".to_string(),
            finished: false,
            preview: None,
            results: vec![],
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub gpu: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResult {
    pub success: bool,
    pub stopped_tasks: u32,
}

/// Stdio JSON-RPC envelope (request direction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub message: String,
}

/// Stdio JSON-RPC envelope (response direction). `result` and `error` are
/// mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}
