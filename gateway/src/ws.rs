//! WebSocket broadcast (`/ws`): every ~500ms, snapshots the TaskRecord map
//! and sends it as one JSON object keyed by task id.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use warp::ws::{Message, WebSocket};

use crate::state::GatewayState;

const BROADCAST_INTERVAL: Duration = Duration::from_millis(500);

pub async fn handle(ws: WebSocket, state: GatewayState) {
    let (mut sender, mut receiver) = ws.split();

    let send_snapshot = |tasks: &HashMap<String, dispatch_core::task::TaskRecord>| -> Message {
        let snapshot: HashMap<String, serde_json::Value> = tasks
            .iter()
            .map(|(id, rec)| {
                (
                    id.clone(),
                    json!({
                        "progress": rec.percentage,
                        "status": rec.status_text,
                        "finished": rec.finished,
                        "results": rec.results,
                        "preview": rec.preview,
                    }),
                )
            })
            .collect();
        Message::text(serde_json::to_string(&snapshot).unwrap_or_default())
    };

    {
        let tasks = state.tasks.read().await;
        if sender.send(send_snapshot(&tasks)).await.is_err() {
            return;
        }
    }

    let mut ticker = tokio::time::interval(BROADCAST_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tasks = state.tasks.read().await;
                if sender.send(send_snapshot(&tasks)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(msg)) if msg.is_close() => break,
                    Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
}
