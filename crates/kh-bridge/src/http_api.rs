use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use kh_agent::registry::redeem_claim_voucher;
use serde::{Deserialize, Serialize};

use crate::state::BridgeState;

pub fn router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws/agent/updates", get(crate::ws::agent_ws_handler))
        .route("/api/agent/register", post(register_agent))
        .route("/api/agent/config", get(agent_config))
        .route("/api/binary/latest", get(binary_latest))
        .route("/api/binary/download/{id}", get(binary_download))
        .with_state(state)
}

fn error_envelope(code: &str, message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": message.into(), "code": code })
}

async fn healthz() -> impl IntoResponse {
    (axum::http::StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

// ---------------------------------------------------------------------------
// POST /api/agent/register
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    claim_code: String,
    hostname: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    agent_id: i64,
    api_key: String,
    endpoints: RegisterEndpoints,
}

#[derive(Debug, Serialize)]
struct RegisterEndpoints {
    control_channel: String,
    config: String,
}

async fn register_agent(
    State(state): State<Arc<BridgeState>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    match redeem_claim_voucher(&state.store, state.random.as_ref(), &req.claim_code, &req.hostname).await {
        Ok(registered) => (
            axum::http::StatusCode::CREATED,
            Json(serde_json::json!(RegisterResponse {
                agent_id: registered.agent.id,
                api_key: registered.api_key,
                endpoints: RegisterEndpoints {
                    control_channel: "/ws/agent/updates".to_string(),
                    config: "/api/agent/config".to_string(),
                },
            })),
        )
            .into_response(),
        Err(e) => {
            use kh_agent::registry::RegistryError;
            let (status, code) = match &e {
                RegistryError::VoucherNotFound => (axum::http::StatusCode::NOT_FOUND, "voucher_not_found"),
                RegistryError::VoucherConsumed => (axum::http::StatusCode::CONFLICT, "voucher_consumed"),
                RegistryError::AgentNotFound => (axum::http::StatusCode::NOT_FOUND, "agent_not_found"),
                RegistryError::Store(_) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            };
            (status, Json(error_envelope(code, e.to_string()))).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/agent/config
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WebsocketTimings {
    write_wait: u64,
    pong_wait: u64,
    ping_period: u64,
}

#[derive(Debug, Serialize)]
struct AgentConfigResponse {
    websocket: WebsocketTimings,
    heartbeat_interval: u64,
    server_version: String,
}

async fn agent_config(State(state): State<Arc<BridgeState>>) -> impl IntoResponse {
    let bridge = &state.config.bridge;
    let agent = &state.config.agent;
    Json(AgentConfigResponse {
        websocket: WebsocketTimings {
            write_wait: bridge.write_wait_secs,
            pong_wait: bridge.pong_wait_secs,
            ping_period: bridge.ping_period_secs,
        },
        heartbeat_interval: agent.heartbeat_interval_secs,
        server_version: state.server_version.clone(),
    })
}

// ---------------------------------------------------------------------------
// GET /api/binary/latest, GET /api/binary/download/{id}
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BinaryLatestQuery {
    #[serde(rename = "type")]
    binary_type: String,
}

async fn binary_latest(
    State(state): State<Arc<BridgeState>>,
    Query(q): Query<BinaryLatestQuery>,
) -> impl IntoResponse {
    match state.store.get_latest_binary_version(&q.binary_type).await {
        Ok(Some(binary)) => (axum::http::StatusCode::OK, Json(serde_json::json!(binary))).into_response(),
        Ok(None) => (
            axum::http::StatusCode::NOT_FOUND,
            Json(error_envelope("binary_not_found", "no assignable binary of that type")),
        )
            .into_response(),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_envelope("internal_error", e.to_string())),
        )
            .into_response(),
    }
}

/// Streams the binary's bytes with its MD5 in a response header. File
/// storage is out of scope for this crate (spec non-goal); this endpoint
/// looks up and reports metadata only, leaving the actual byte stream to an
/// out-of-scope file-serving collaborator.
async fn binary_download(
    State(state): State<Arc<BridgeState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_binary_version(id).await {
        Ok(Some(binary)) if binary.assignable() => (
            [("X-MD5-Hash", binary.md5_hash.clone())],
            Json(serde_json::json!(binary)),
        )
            .into_response(),
        Ok(Some(_)) => (
            axum::http::StatusCode::CONFLICT,
            Json(error_envelope("binary_not_verified", "binary exists but is not assignable")),
        )
            .into_response(),
        Ok(None) => (
            axum::http::StatusCode::NOT_FOUND,
            Json(error_envelope("binary_not_found", "no such binary")),
        )
            .into_response(),
        Err(e) => (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(error_envelope("internal_error", e.to_string())),
        )
            .into_response(),
    }
}
