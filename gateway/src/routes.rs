use std::convert::Infallible;

use dispatch_core::argument_contract::{self, TaskRequest};
use dispatch_core::protocol::{GenerateParams, GenerateResult};
use dispatch_core::settings::CapabilitySnapshot;
use dispatch_core::task::TaskRecord;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::history;
use crate::monitor;
use crate::state::GatewayState;
use crate::ws;

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
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed".to_string())
    } else {
        log::error!("unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "success": false, "error": message })),
        status,
    ))
}

fn with_state(state: GatewayState) -> impl Filter<Extract = (GatewayState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn with_cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["Accept", "Content-Type"])
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .max_age(3600)
}

async fn handle_settings() -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&CapabilitySnapshot::default()))
}

async fn handle_presets() -> Result<impl Reply, Rejection> {
    let snapshot = CapabilitySnapshot::default();
    Ok(warp::reply::json(&snapshot.presets))
}

async fn handle_preset_detail(name: String) -> Result<impl Reply, Rejection> {
    let snapshot = CapabilitySnapshot::default();
    if !snapshot.presets.contains(&name) {
        return Err(warp::reject::custom(ServiceError { message: format!("unknown preset: {name}"), status: StatusCode::NOT_FOUND }));
    }
    Ok(warp::reply::json(&serde_json::json!({ "name": name, "base_model_name": snapshot.base_models.first() })))
}

async fn handle_generate(request: TaskRequest, state: GatewayState) -> Result<impl Reply, Rejection> {
    let capability = CapabilitySnapshot::default();
    if let Err(e) = request.validate(capability.clip_skip_max) {
        return Err(warp::reject::custom(ServiceError { message: e.to_string(), status: StatusCode::BAD_REQUEST }));
    }

    let device = state.scheduler.select().ok_or_else(|| {
        warp::reject::custom(ServiceError { message: "no GPUs configured".to_string(), status: StatusCode::SERVICE_UNAVAILABLE })
    })?;
    state.scheduler.mark_busy(device, true);

    let client = {
        let supervisor = state.supervisor.read().await;
        supervisor.client(device)
    };
    let Some(client) = client else {
        state.scheduler.mark_busy(device, false);
        return Err(warp::reject::custom(ServiceError { message: format!("no worker bound to device {device}"), status: StatusCode::INTERNAL_SERVER_ERROR }));
    };

    let task_id = state.next_task_id().await;
    {
        let mut tasks = state.tasks.write().await;
        tasks.insert(task_id.clone(), TaskRecord::new(task_id.clone(), device));
    }

    let vector = argument_contract::build(&request);
    let params = GenerateParams { task_id: task_id.clone(), args: vector.0, contract_version: argument_contract::CONTRACT_VERSION };
    let result = match client.generate(&params).await {
        Ok(result) => result,
        Err(e) => {
            state.scheduler.mark_busy(device, false);
            let mut tasks = state.tasks.write().await;
            if let Some(rec) = tasks.get_mut(&task_id) {
                rec.finish_error(format!("worker transport error: {e}"));
            }
            return Err(warp::reject::custom(ServiceError { message: e.to_string(), status: StatusCode::INTERNAL_SERVER_ERROR }));
        }
    };

    if let GenerateResult::Err { error, .. } = result {
        state.scheduler.mark_busy(device, false);
        let mut tasks = state.tasks.write().await;
        if let Some(rec) = tasks.get_mut(&task_id) {
            rec.finish_error(error.clone());
        }
        return Err(warp::reject::custom(ServiceError { message: error, status: StatusCode::INTERNAL_SERVER_ERROR }));
    }

    let request_snapshot = serde_json::to_value(&request).unwrap_or(serde_json::Value::Null);
    monitor::spawn(state.clone(), client, task_id.clone(), device, request_snapshot);

    Ok(warp::reply::json(&serde_json::json!({ "task_id": task_id, "status": "Started" })))
}

async fn handle_stop(state: GatewayState) -> Result<impl Reply, Rejection> {
    let supervisor = state.supervisor.read().await;
    let mut stopped = 0u32;
    for (_, rec) in state.tasks.write().await.iter() {
        if !rec.finished {
            stopped += 1;
        }
    }
    // best-effort global signal; the gateway does not wait for worker acknowledgement
    for device in state.scheduler.devices() {
        if let Some(client) = supervisor.client(device.device) {
            let _ = client.stop().await;
        }
    }
    Ok(warp::reply::json(&serde_json::json!({ "success": true, "stopped_tasks": stopped })))
}

async fn handle_history(state: GatewayState) -> Result<impl Reply, Rejection> {
    match history::list(&state.output_dir).await {
        Ok(entries) => Ok(warp::reply::json(&entries)),
        Err(e) => Err(warp::reject::custom(ServiceError { message: e.to_string(), status: StatusCode::INTERNAL_SERVER_ERROR })),
    }
}

async fn handle_history_metadata(date: String, filename: String, state: GatewayState) -> Result<impl Reply, Rejection> {
    match history::metadata(&state.output_dir, &state.metadata, &date, &filename) {
        Ok(Some(meta)) => Ok(warp::reply::json(&meta)),
        Ok(None) => Err(warp::reject::custom(ServiceError { message: "not found".to_string(), status: StatusCode::NOT_FOUND })),
        Err(e) => Err(warp::reject::custom(ServiceError { message: e.to_string(), status: StatusCode::INTERNAL_SERVER_ERROR })),
    }
}

pub fn routes(state: GatewayState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let settings = warp::path("settings").and(warp::get()).and_then(handle_settings);

    let presets = warp::path("presets").and(warp::get()).and_then(handle_presets);
    let preset_detail = warp::path!("presets" / String).and(warp::get()).and_then(handle_preset_detail);

    let generate = warp::path("generate")
        .and(warp::post())
        .and(warp::body::content_length_limit(1024 * 1024))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(handle_generate);

    let stop = warp::path("stop").and(warp::post()).and(with_state(state.clone())).and_then(handle_stop);

    let history_list = warp::path("history")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_history);

    let history_metadata = warp::path!("history" / "metadata" / String / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_history_metadata);

    let images = warp::path("images").and(warp::fs::dir(state.output_dir.clone()));

    let websocket = warp::path("ws").and(warp::ws()).and(with_state(state.clone())).map(|ws: warp::ws::Ws, state: GatewayState| {
        ws.on_upgrade(move |socket| ws::handle(socket, state))
    });

    settings
        .or(presets)
        .or(preset_detail)
        .or(generate)
        .or(stop)
        .or(history_list)
        .or(history_metadata)
        .or(images)
        .or(websocket)
        .with(with_cors())
        .recover(handle_rejection)
        .with(warp::log("dispatch_gateway"))
}
