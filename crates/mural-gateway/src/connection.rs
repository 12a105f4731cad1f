use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use mural_engine::{Delivery, Engine, EngineError, Ingested, Placement, RecordStore};
use mural_types::events::GatewayReply;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Serve one socket watching `room` until either side goes away.
///
/// Events published for the room (and room-less user updates) are relayed as
/// text frames tagged with their topic. Every frame the client sends is fed
/// to the engine and answered with a [`GatewayReply`] on the same socket.
pub async fn handle_connection<S: RecordStore + 'static>(
    socket: WebSocket,
    engine: Arc<Engine<S, Dispatcher>>,
    room: String,
) {
    let (mut sender, mut receiver) = socket.split();
    let dispatcher = engine.publisher().clone();

    let conn_id = dispatcher.register(&room).await;
    info!("Gateway connection {} opened for room '{}'", conn_id, room);

    let mut broadcast_rx = dispatcher.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayReply>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let send_room = room.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let delivery = match result {
                        Ok(delivery) => delivery,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if !relevant(&delivery, &send_room) {
                        continue;
                    }
                    if sender.send(frame_for(delivery)).await.is_err() {
                        break;
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(reply) = reply else { break };
                    let text = match serde_json::to_string(&reply) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode gateway reply: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_room = room.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let raw = match msg {
                Message::Text(text) => text.as_str().as_bytes().to_vec(),
                Message::Binary(data) => data.to_vec(),
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                    continue;
                }
                Message::Close(_) => break,
                _ => continue,
            };

            let engine = engine.clone();
            let room = recv_room.clone();
            let outcome = tokio::task::spawn_blocking(move || engine.ingest(&room, &raw)).await;
            let reply = match outcome {
                Ok(result) => reply_for(result),
                Err(e) => {
                    warn!("Frame handler panicked: {}", e);
                    GatewayReply::Rejected {
                        reason: "internal error".into(),
                    }
                }
            };
            if reply_tx.send(reply).is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(conn_id).await;
    info!("Gateway connection {} closed", conn_id);
}

/// Room-scoped deliveries go to sockets of that room; the rest go everywhere.
fn relevant(delivery: &Delivery, room: &str) -> bool {
    delivery.room.as_deref().is_none_or(|r| r == room)
}

/// Wrap a JSON payload as `{"topic": .., "payload": ..}`. Anything that is not
/// UTF-8 is passed through untouched as a binary frame.
fn frame_for(delivery: Delivery) -> Message {
    match std::str::from_utf8(&delivery.payload) {
        Ok(json) => Message::Text(
            format!("{{\"topic\":\"{}\",\"payload\":{}}}", delivery.topic, json).into(),
        ),
        Err(_) => Message::Binary(delivery.payload),
    }
}

fn reply_for(result: mural_engine::Result<Ingested>) -> GatewayReply {
    match result {
        Ok(Ingested::Pixels(Placement::Duplicate)) => GatewayReply::Duplicate,
        Ok(_) => GatewayReply::Accepted,
        Err(EngineError::Validation(reason)) | Err(EngineError::NotFound(reason)) => {
            debug!("Rejected gateway frame: {}", reason);
            GatewayReply::Rejected { reason }
        }
        Err(e) => {
            warn!("Gateway frame failed: {}", e);
            GatewayReply::Rejected {
                reason: "internal error".into(),
            }
        }
    }
}
