//! HTTP transport variant of the worker protocol: `POST /generate`,
//! `GET /progress/<task_id>`, `POST /stop`, `GET /health`.

use std::convert::Infallible;

use dispatch_core::argument_contract::{self, ArgumentVector};
use dispatch_core::protocol::{GenerateParams, GenerateResult, HealthResponse, ProgressResponse, StopResult};
use tokio::sync::mpsc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::engine::{self, EngineJob};
use crate::registry::TaskRegistry;

#[derive(Clone)]
pub struct WorkerState {
    pub device: u32,
    pub output_dir: std::path::PathBuf,
    pub registry: TaskRegistry,
}

#[derive(Debug)]
struct ServiceError {
    message: String,
    status: StatusCode,
}

impl warp::reject::Reject for ServiceError {}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if let Some(e) = err.find::<ServiceError>() {
        (e.status, e.message.clone())
    } else {
        log::error!("unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "success": false, "error": message })),
        status,
    ))
}

fn with_state(state: WorkerState) -> impl Filter<Extract = (WorkerState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn handle_health(state: WorkerState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&HealthResponse { status: "ok".to_string(), gpu: state.device as i64 }))
}

async fn handle_generate(params: GenerateParams, state: WorkerState) -> Result<impl Reply, Rejection> {
    if let Err(msg) = argument_contract::validate(&ArgumentVector(params.args.clone()), params.contract_version) {
        return Err(warp::reject::custom(ServiceError { message: msg, status: StatusCode::BAD_REQUEST }));
    }

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
                    .update(
                        &task_id,
                        ProgressResponse { percentage: 100, status_text: "Finished".to_string(), finished: true, preview: None, results, error: None },
                    )
                    .await;
            }
            Err(e) => {
                registry
                    .update(
                        &task_id,
                        ProgressResponse { percentage: 100, status_text: format!("Error: {e}"), finished: true, preview: None, results: vec![], error: Some(e) },
                    )
                    .await;
            }
        }
        updater.abort();
    });

    Ok(warp::reply::json(&GenerateResult::Accepted { accepted: true, task_id: params.task_id }))
}

async fn handle_progress(task_id: String, state: WorkerState) -> Result<impl Reply, Rejection> {
    match state.registry.get(&task_id).await {
        Some(progress) => Ok(warp::reply::json(&progress)),
        None => Err(warp::reject::custom(ServiceError { message: "unknown task".to_string(), status: StatusCode::NOT_FOUND })),
    }
}

async fn handle_stop(state: WorkerState) -> Result<impl Reply, Rejection> {
    let stopped = state.registry.stop_all().await;
    Ok(warp::reply::json(&StopResult { success: true, stopped_tasks: stopped }))
}

pub fn routes(state: WorkerState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path("health").and(warp::get()).and(with_state(state.clone())).and_then(handle_health);

    let generate = warp::path("generate")
        .and(warp::post())
        .and(warp::body::content_length_limit(1024 * 1024))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(handle_generate);

    let progress = warp::path!("progress" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_progress);

    let stop = warp::path("stop").and(warp::post()).and(with_state(state.clone())).and_then(handle_stop);

    health.or(generate).or(progress).or(stop).recover(handle_rejection).with(warp::log("dispatch_worker"))
}
