use chrono::Utc;
use kh_core::random::RandomSource;
use kh_core::store::Store;
use kh_core::types::{Agent, AgentDevice, AgentStatus};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("claim voucher not found")]
    VoucherNotFound,

    #[error("claim voucher already consumed")]
    VoucherConsumed,

    #[error("agent not found")]
    AgentNotFound,

    #[error("store error: {0}")]
    Store(#[from] kh_core::error::KhError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Outcome of a successful `POST /api/agent/register` redemption: the caller
/// (kh-bridge) hands the `api_key` to the agent exactly once and never
/// persists it outside the store.
#[derive(Debug, Clone)]
pub struct RegisteredAgent {
    pub agent: Agent,
    pub api_key: String,
}

/// Redeems a claim voucher and creates (or re-registers, for continuous
/// vouchers) the agent record behind it. The voucher's `agent_name` becomes
/// the agent's display name; `hostname` is carried into `os_info` for
/// operators to tell rigs apart.
pub async fn redeem_claim_voucher(
    store: &Store,
    random: &dyn RandomSource,
    code: &str,
    hostname: &str,
) -> Result<RegisteredAgent> {
    let voucher = store
        .get_claim_voucher_by_code(code)
        .await?
        .ok_or(RegistryError::VoucherNotFound)?;

    if !voucher.is_redeemable() {
        return Err(RegistryError::VoucherConsumed);
    }

    let api_key = random.hex_secret(32);
    let mut agent = Agent::new(voucher.agent_name.clone(), api_key.clone());
    agent.os_info = Some(hostname.to_string());
    let id = store.insert_agent(&agent).await?;
    agent.id = id;

    store.consume_claim_voucher(voucher.id, Utc::now()).await?;

    Ok(RegisteredAgent { agent, api_key })
}

/// Admin-equivalent toggle: disabling an agent excludes it from scheduling
/// and agent sessions immediately on next control-channel heartbeat, but
/// never deletes it.
pub async fn set_agent_enabled(store: &Store, agent_id: i64, enabled: bool) -> Result<()> {
    let mut agent = store
        .get_agent_by_id(agent_id)
        .await?
        .ok_or(RegistryError::AgentNotFound)?;
    agent.enabled = enabled;
    store.update_agent(&agent).await?;
    Ok(())
}

/// Per-device toggle: a disabled device is excluded from the agent's
/// available capacity without forcing the whole agent offline.
pub async fn set_device_enabled(
    store: &Store,
    agent_id: i64,
    device_id: i32,
    enabled: bool,
) -> Result<()> {
    store
        .set_device_enabled(agent_id, device_id, enabled)
        .await?;
    Ok(())
}

pub async fn upsert_device(store: &Store, device: &AgentDevice) -> Result<()> {
    store.upsert_device(device).await?;
    Ok(())
}

/// Marks an agent `Error` with the given message; used when a control
/// channel frame is malformed or the agent reports an unrecoverable fault.
pub async fn mark_agent_error(store: &Store, agent_id: i64, message: impl Into<String>) -> Result<()> {
    let mut agent = store
        .get_agent_by_id(agent_id)
        .await?
        .ok_or(RegistryError::AgentNotFound)?;
    agent.status = AgentStatus::Error;
    agent.last_error = Some(message.into());
    store.update_agent(&agent).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kh_core::random::OsRandom;
    use kh_core::types::ClaimVoucher;

    #[tokio::test]
    async fn redeeming_single_use_voucher_creates_agent_and_consumes_it() {
        let store = Store::new_in_memory().await.unwrap();
        let voucher = ClaimVoucher::new("claim-1", "rig-alpha", false);
        store.insert_claim_voucher(&voucher).await.unwrap();

        let random = OsRandom;
        let registered = redeem_claim_voucher(&store, &random, "claim-1", "alpha.local")
            .await
            .unwrap();
        assert_eq!(registered.agent.name, "rig-alpha");
        assert_eq!(registered.api_key.len(), 64);

        let second = redeem_claim_voucher(&store, &random, "claim-1", "alpha.local").await;
        assert!(matches!(second, Err(RegistryError::VoucherConsumed)));
    }

    #[tokio::test]
    async fn continuous_voucher_can_be_redeemed_repeatedly() {
        let store = Store::new_in_memory().await.unwrap();
        let voucher = ClaimVoucher::new("claim-cont", "rig-beta", true);
        store.insert_claim_voucher(&voucher).await.unwrap();

        let random = OsRandom;
        redeem_claim_voucher(&store, &random, "claim-cont", "beta-1.local")
            .await
            .unwrap();
        let second = redeem_claim_voucher(&store, &random, "claim-cont", "beta-2.local").await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn unknown_voucher_code_is_rejected() {
        let store = Store::new_in_memory().await.unwrap();
        let random = OsRandom;
        let result = redeem_claim_voucher(&store, &random, "does-not-exist", "host").await;
        assert!(matches!(result, Err(RegistryError::VoucherNotFound)));
    }

    #[tokio::test]
    async fn disabling_agent_persists() {
        let store = Store::new_in_memory().await.unwrap();
        let voucher = ClaimVoucher::new("claim-2", "rig-gamma", false);
        store.insert_claim_voucher(&voucher).await.unwrap();
        let random = OsRandom;
        let registered = redeem_claim_voucher(&store, &random, "claim-2", "gamma.local")
            .await
            .unwrap();

        set_agent_enabled(&store, registered.agent.id, false).await.unwrap();
        let fetched = store.get_agent_by_id(registered.agent.id).await.unwrap().unwrap();
        assert!(!fetched.enabled);
    }
}
