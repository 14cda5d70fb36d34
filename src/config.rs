//! Environment-driven configuration for the swap client.
//!
//! We keep this intentionally small and explicit:
//! - RPC + indexer + decryption-service endpoints
//! - program ids
//! - the persistent lookup table the flow keeps in sync
//! - proof API version and retry budgets
//!
//! The proof API version is an explicit config value threaded through every
//! constructor; there is no process-wide "force version" switch.

use anyhow::Context;
use solana_sdk::pubkey::Pubkey;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::decrypt::BackoffPolicy;
use crate::solana::{DECRYPTION_ORACLE_PROGRAM_ID, SWAP_PROGRAM_ID};

/// Ledger caps compute units per transaction at 1.4M.
const COMPUTE_UNIT_LIMIT_HARD_CAP: u32 = 1_400_000;
/// Keep decrypt retry budgets bounded; the service either catches up within
/// a couple of minutes or something upstream is wrong.
const DECRYPT_MAX_ATTEMPTS_HARD_CAP: u32 = 25;

#[derive(Clone)]
pub struct Config {
    /// Solana HTTP RPC endpoint (Helius, etc).
    pub rpc_url: String,
    /// Base URL for the compressed-state indexer JSON-RPC.
    pub indexer_url: String,
    /// Optional bearer token for the indexer.
    pub indexer_auth_token: Option<String>,
    /// Base URL for the attested decryption service.
    pub decrypt_url: String,
    /// Confidential swap program id.
    pub swap_program_id: Pubkey,
    /// Program that owns permission (allowance) state and encrypted-balance
    /// records; the decryption service only honors grants under this id.
    pub permission_program_id: Pubkey,
    /// Persistent address lookup table referenced by every swap transaction.
    pub lookup_table: Pubkey,
    /// Indexer proof API version (1 = per-account endpoints only,
    /// 2 = batched endpoint first). Threaded explicitly; never global.
    pub proof_api_version: u8,
    pub compute_unit_limit: u32,
    pub compute_unit_price_micro_lamports: u64,
    pub confirm_timeout_secs: u64,
    pub decrypt_retry_base_ms: u64,
    pub decrypt_retry_increment_ms: u64,
    pub decrypt_max_attempts: u32,
}

impl Config {
    pub fn decrypt_backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.decrypt_retry_base_ms),
            increment: Duration::from_millis(self.decrypt_retry_increment_ms),
            max_attempts: self.decrypt_max_attempts,
        }
    }
}

fn env_required(key: &str) -> anyhow::Result<String> {
    env::var(key).with_context(|| format!("Missing env var: {key}"))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_lowercase();
            matches!(s.as_str(), "1" | "true" | "yes" | "y" | "on")
        })
        .unwrap_or(default)
}

fn env_pubkey(key: &str, default: &str) -> anyhow::Result<Pubkey> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    Pubkey::from_str(raw.trim()).with_context(|| format!("Invalid {key}: {raw}"))
}

fn validate_service_url(key: &str, raw: &str) -> anyhow::Result<String> {
    let u = Url::parse(raw).with_context(|| format!("Invalid {key}: {raw}"))?;
    let scheme = u.scheme();
    let allow_insecure_http = env_bool(&format!("{key}_ALLOW_INSECURE_HTTP"), false);
    if scheme != "https" && !(allow_insecure_http && scheme == "http") {
        anyhow::bail!("{key} must use https (or set {key}_ALLOW_INSECURE_HTTP=true): {raw}");
    }
    if u.host_str().is_none() {
        anyhow::bail!("{key} missing host: {raw}");
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

pub fn load_config() -> anyhow::Result<Config> {
    let rpc_url = env_required("RPC_URL")?;
    let indexer_url = validate_service_url("INDEXER_URL", &env_required("INDEXER_URL")?)?;
    let decrypt_url = validate_service_url("DECRYPT_URL", &env_required("DECRYPT_URL")?)?;
    let indexer_auth_token = env::var("INDEXER_AUTH_TOKEN")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let swap_program_id = env_pubkey("SWAP_PROGRAM_ID", SWAP_PROGRAM_ID)?;
    let permission_program_id =
        env_pubkey("PERMISSION_PROGRAM_ID", DECRYPTION_ORACLE_PROGRAM_ID)?;
    let lookup_table = Pubkey::from_str(env_required("LOOKUP_TABLE")?.trim())
        .context("Invalid LOOKUP_TABLE")?;

    let proof_api_version = env_u64("PROOF_API_VERSION", 2);
    if !(1..=2).contains(&proof_api_version) {
        anyhow::bail!("PROOF_API_VERSION must be 1 or 2, got {proof_api_version}");
    }

    let mut compute_unit_limit = env_u64("COMPUTE_UNIT_LIMIT", 1_000_000) as u32;
    if compute_unit_limit > COMPUTE_UNIT_LIMIT_HARD_CAP {
        tracing::warn!(
            "COMPUTE_UNIT_LIMIT={} exceeds ledger cap; clamping to {}",
            compute_unit_limit,
            COMPUTE_UNIT_LIMIT_HARD_CAP
        );
        compute_unit_limit = COMPUTE_UNIT_LIMIT_HARD_CAP;
    }
    let compute_unit_price_micro_lamports = env_u64("COMPUTE_UNIT_PRICE_MICROLAMPORTS", 0);

    let confirm_timeout_secs = env_u64("CONFIRM_TIMEOUT_SECS", 60).max(1);

    let decrypt_retry_base_ms = env_u64("DECRYPT_RETRY_BASE_MS", 500);
    let decrypt_retry_increment_ms = env_u64("DECRYPT_RETRY_INCREMENT_MS", 500);
    let mut decrypt_max_attempts = env_u64("DECRYPT_MAX_ATTEMPTS", 10) as u32;
    if decrypt_max_attempts == 0 {
        tracing::warn!("DECRYPT_MAX_ATTEMPTS=0 invalid; defaulting to 1");
        decrypt_max_attempts = 1;
    }
    if decrypt_max_attempts > DECRYPT_MAX_ATTEMPTS_HARD_CAP {
        tracing::warn!(
            "DECRYPT_MAX_ATTEMPTS={} too large; clamping to {}",
            decrypt_max_attempts,
            DECRYPT_MAX_ATTEMPTS_HARD_CAP
        );
        decrypt_max_attempts = DECRYPT_MAX_ATTEMPTS_HARD_CAP;
    }

    Ok(Config {
        rpc_url,
        indexer_url,
        indexer_auth_token,
        decrypt_url,
        swap_program_id,
        permission_program_id,
        lookup_table,
        proof_api_version: proof_api_version as u8,
        compute_unit_limit,
        compute_unit_price_micro_lamports,
        confirm_timeout_secs,
        decrypt_retry_base_ms,
        decrypt_retry_increment_ms,
        decrypt_max_attempts,
    })
}
