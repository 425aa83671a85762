//! Per-task monitor: polls a worker's `progress/<task_id>` at ~100ms
//! intervals and mutates the owning TaskRecord until the task finishes.

use std::time::Duration;

use serde_json::json;

use crate::image_metadata;
use crate::state::GatewayState;
use crate::worker_client::WorkerClient;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn spawn(state: GatewayState, client: WorkerClient, task_id: String, device: u32, request_snapshot: serde_json::Value) {
    tokio::spawn(async move {
        loop {
            match client.progress(&task_id).await {
                Ok(progress) => {
                    let finished = progress.finished;
                    {
                        let mut tasks = state.tasks.write().await;
                        if let Some(rec) = tasks.get_mut(&task_id) {
                            if let Some(err) = progress.error.clone() {
                                rec.finish_error(err);
                            } else if finished {
                                rec.finish_ok(progress.results.clone());
                            } else {
                                rec.apply_progress(progress.percentage, progress.status_text.clone(), progress.preview.clone());
                            }
                        }
                    }

                    if finished {
                        state.scheduler.mark_busy(device, false);
                        if progress.error.is_none() {
                            persist_results(&state, &progress.results, &request_snapshot).await;
                        }
                        return;
                    }
                }
                Err(e) => {
                    log::error!("progress poll failed for task {task_id}: {e}");
                    let mut tasks = state.tasks.write().await;
                    if let Some(rec) = tasks.get_mut(&task_id) {
                        rec.finish_error(format!("worker transport error: {e}"));
                    }
                    state.scheduler.mark_busy(device, false);
                    return;
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    });
}

async fn persist_results(state: &GatewayState, results: &[String], request_snapshot: &serde_json::Value) {
    for rel_path in results {
        let metadata = json!({
            "prompt": request_snapshot.get("prompt").cloned().unwrap_or(serde_json::Value::Null),
            "negative_prompt": request_snapshot.get("negative_prompt").cloned().unwrap_or(serde_json::Value::Null),
            "seed": request_snapshot.get("image_seed").cloned().unwrap_or(serde_json::Value::Null),
        });

        if let Err(e) = state.metadata.save(rel_path, &metadata) {
            log::warn!("metadata persistence failed for {rel_path}: {e}");
        }

        let full_path = state.output_dir.join(rel_path);
        if full_path.extension().and_then(|e| e.to_str()) == Some("png") {
            if let Err(e) = image_metadata::embed_png_metadata(&full_path, &metadata) {
                log::warn!("embedding PNG metadata failed for {rel_path}: {e}");
            }
        }
    }
}
