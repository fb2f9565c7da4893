use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use kh_agent::heartbeat::apply_heartbeat;
use kh_agent::progress::{apply_task_progress, apply_task_status, TaskProgressFrame};
use kh_agent::crack::{apply_crack_reports, CrackReport};

use crate::auth::{authenticate_agent, HandshakeError};
use crate::protocol::AgentFrame;
use crate::state::BridgeState;

/// Normal closure.
const CLOSE_NORMAL: u16 = 1000;
/// Server-side error.
const CLOSE_SERVER_ERROR: u16 = 1011;
/// A newer session for the same agent has taken over.
const CLOSE_DUPLICATE_SESSION: u16 = 4000;

pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BridgeState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let agent = match authenticate_agent(&state.store, &headers).await {
        Ok(agent) => agent,
        Err(HandshakeError::InvalidApiKey) | Err(HandshakeError::MissingHeaders) | Err(HandshakeError::InvalidAgentId) => {
            return (axum::http::StatusCode::UNAUTHORIZED, "Invalid API Key").into_response();
        }
        Err(HandshakeError::Store(e)) => {
            tracing::error!(error = %e, "store error during agent handshake");
            return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
        }
    };

    let read_limit = state.config.bridge.read_limit_bytes;
    ws.max_message_size(read_limit)
        .on_upgrade(move |socket| handle_agent_socket(socket, state, agent.id))
}

async fn handle_agent_socket(socket: WebSocket, state: Arc<BridgeState>, agent_id: i64) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (session_tx, mut outbound) = state.sessions.register(agent_id);

    tracing::info!(agent_id, "agent control channel connected");

    let pong_wait = Duration::from_secs(state.config.bridge.pong_wait_secs);
    let ping_period = Duration::from_secs(state.config.bridge.ping_period_secs);

    let mut close_code = CLOSE_NORMAL;
    // `crack_report` frames (spec.md §4.5) don't carry a task_id of their own;
    // they are attributed to whichever task this session most recently
    // reported progress or status for.
    let mut current_task_id: Option<uuid::Uuid> = None;

    loop {
        tokio::select! {
            biased;

            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        let text = match serde_json::to_string(&frame) {
                            Ok(t) => t,
                            Err(e) => {
                                tracing::error!(agent_id, error = %e, "failed to serialize server frame");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Registry entry was replaced by a newer session.
                        close_code = CLOSE_DUPLICATE_SESSION;
                        break;
                    }
                }
            }

            _ = tokio::time::sleep(ping_period) => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }

            incoming = tokio::time::timeout(pong_wait, ws_rx.next()) => {
                match incoming {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        if let Err(e) = handle_agent_frame(&state, agent_id, &text, &mut current_task_id).await {
                            tracing::warn!(agent_id, error = %e, "dropping malformed/invalid agent frame");
                        }
                    }
                    Ok(Some(Ok(Message::Pong(_)))) => {}
                    Ok(Some(Ok(Message::Close(_)))) => break,
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(_))) | Ok(None) => break,
                    Err(_) => {
                        tracing::info!(agent_id, "pong_wait exceeded, closing agent session");
                        close_code = CLOSE_SERVER_ERROR;
                        break;
                    }
                }
            }
        }
    }

    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: close_code,
            reason: "".into(),
        })))
        .await;

    // Only clear the registry entry if we still own it — a newer session may
    // already have replaced us between our last `outbound.recv()` and here,
    // and unregistering unconditionally would rip out its live sender.
    if state.sessions.is_current(agent_id, &session_tx) {
        state.sessions.unregister(agent_id);
    }

    tracing::info!(agent_id, "agent control channel disconnected");
}

async fn handle_agent_frame(
    state: &BridgeState,
    agent_id: i64,
    text: &str,
    current_task_id: &mut Option<uuid::Uuid>,
) -> Result<(), Box<dyn std::error::Error>> {
    let frame: AgentFrame = serde_json::from_str(text)?;
    let now = state.clock.now();

    match frame {
        AgentFrame::Heartbeat { device_metrics, .. } => {
            // Per-device telemetry (temperature, utilization, fan speed,
            // current hashrate) is logged for operators but not persisted —
            // it is not a calibration sample, so it never feeds BenchmarkCache.
            tracing::debug!(agent_id, devices = device_metrics.len(), "heartbeat received");
            apply_heartbeat(&state.store, agent_id, now).await?;
        }
        AgentFrame::BenchmarkResult { hash_mode, speed_hps, .. } => {
            state.benchmarks.record(agent_id, hash_mode, speed_hps);
        }
        AgentFrame::TaskProgress { task_id, keyspace_processed, speed_hps, .. } => {
            *current_task_id = Some(task_id);
            apply_task_progress(
                &state.store,
                task_id,
                TaskProgressFrame { keyspace_processed, speed_hps },
                now,
            )
            .await?;
        }
        AgentFrame::CrackReport { hashlist_id, hash_value, password } => {
            match *current_task_id {
                Some(task_id) => {
                    apply_crack_reports(
                        &state.store,
                        task_id,
                        hashlist_id,
                        &[CrackReport { hash_value, password }],
                        now,
                    )
                    .await?;
                }
                None => {
                    tracing::warn!(agent_id, hashlist_id, "crack_report with no task context yet, dropping");
                }
            }
        }
        AgentFrame::TaskStatus { task_id, status, error_message, final_keyspace_processed } => {
            *current_task_id = Some(task_id);
            apply_task_status(&state.store, task_id, status.into(), Some(final_keyspace_processed), error_message, now).await?;
        }
        AgentFrame::DeviceInventory { devices } => {
            for d in devices {
                let device = kh_core::types::AgentDevice {
                    agent_id,
                    device_id: d.device_id,
                    device_type: d.device_type,
                    device_name: d.device_name,
                    enabled: true,
                };
                state.store.upsert_device(&device).await?;
            }
        }
    }
    Ok(())
}
