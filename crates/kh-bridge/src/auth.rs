//! Agent control-channel handshake (spec.md §4.5): the client presents
//! `X-API-Key` and `X-Agent-ID` headers; the server resolves the agent
//! record and rejects a mismatch with `401` before upgrading. The API key
//! comparison is constant-time, the same discipline the teacher applies to
//! its own HTTP API key check.

use axum::http::HeaderMap;
use kh_core::types::Agent;
use kh_core::Store;
use subtle::ConstantTimeEq;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("missing X-API-Key or X-Agent-ID header")]
    MissingHeaders,
    #[error("X-Agent-ID is not a valid integer")]
    InvalidAgentId,
    #[error("invalid API key")]
    InvalidApiKey,
    #[error("store error: {0}")]
    Store(#[from] kh_core::KhError),
}

/// Resolves and authenticates the agent presenting a control-channel
/// handshake. Returns the agent record on success.
pub async fn authenticate_agent(store: &Store, headers: &HeaderMap) -> Result<Agent, HandshakeError> {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(HandshakeError::MissingHeaders)?;
    let agent_id = headers
        .get("x-agent-id")
        .and_then(|v| v.to_str().ok())
        .ok_or(HandshakeError::MissingHeaders)?;
    let agent_id: i64 = agent_id.parse().map_err(|_| HandshakeError::InvalidAgentId)?;

    let agent = store
        .get_agent_by_id(agent_id)
        .await?
        .ok_or(HandshakeError::InvalidApiKey)?;

    if bool::from(agent.api_key.as_bytes().ct_eq(api_key.as_bytes())) {
        Ok(agent)
    } else {
        Err(HandshakeError::InvalidApiKey)
    }
}
