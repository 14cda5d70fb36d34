//! Client for the compressed-state indexer JSON-RPC API.
//!
//! The indexer is the only source of validity proofs and compressed account
//! contents. Its proof endpoints have accumulated several response shapes
//! over versions, so this module returns raw `serde_json::Value` results for
//! the proof endpoints and leaves normalization to `proof.rs` (which reads
//! every field through the tolerant parser in `parse.rs`).
//!
//! Compressed-account lookups have a stable enough shape to decode here.

use borsh::BorshDeserialize;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::parse::{lenient_u64, lenient_u32};
use crate::types::{CompressedAccountRef, PoolBundle, SwapPool};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// The four proof endpoints, abstracted so the resolver's fallback chain is
/// testable without a live indexer.
pub trait ProofEndpoints {
    /// Primary batched endpoint (API v2).
    fn batch_proof(&self, hashes: &[[u8; 32]], new_addresses: &[NewAddress]) -> ClientResult<Value>;
    /// Multi-account proof.
    fn multi_proof(&self, hashes: &[[u8; 32]]) -> ClientResult<Value>;
    /// Per-account proof.
    fn account_proof(&self, hash: &[u8; 32]) -> ClientResult<Value>;
    /// Legacy single-proof endpoint.
    fn legacy_proof(&self, hash: &[u8; 32]) -> ClientResult<Value>;
}

/// A not-yet-created address proven against an address tree.
#[derive(Debug, Clone)]
pub struct NewAddress {
    pub address: [u8; 32],
    pub tree: Pubkey,
}

pub struct IndexerClient {
    http: reqwest::blocking::Client,
    base: String,
    auth_token: Option<String>,
    /// Threaded from `Config`; selects which endpoints exist server-side.
    pub api_version: u8,
}

impl IndexerClient {
    pub fn new(base: &str, auth_token: Option<String>, api_version: u8) -> ClientResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Indexer(format!("http client init failed: {e}")))?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            auth_token,
            api_version,
        })
    }

    fn rpc_call(&self, method: &str, params: Value) -> ClientResult<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let mut req = self.http.post(&self.base).json(&body);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .map_err(|e| ClientError::Indexer(format!("{method} request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(ClientError::Indexer(format!(
                "{method} failed ({status}): {text}"
            )));
        }
        let envelope: Value = resp
            .json()
            .map_err(|e| ClientError::Indexer(format!("{method} JSON parse failed: {e}")))?;
        if let Some(err) = envelope.get("error") {
            return Err(ClientError::Indexer(format!("{method} error: {err}")));
        }
        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| ClientError::Indexer(format!("{method} response missing result")))
    }

    /// Fetch a compressed account by its derived address.
    pub fn get_compressed_account(&self, address: &[u8; 32]) -> ClientResult<(CompressedAccountRef, Vec<u8>)> {
        let result = self.rpc_call(
            "getCompressedAccount",
            json!({ "address": hex32(address) }),
        )?;
        decode_account_bundle(&result)
    }

    /// List compressed accounts owned by `owner` (the swap program, for pool
    /// records).
    pub fn get_compressed_accounts_by_owner(
        &self,
        owner: &Pubkey,
    ) -> ClientResult<Vec<(CompressedAccountRef, Vec<u8>)>> {
        let result = self.rpc_call(
            "getCompressedAccountsByOwner",
            json!({ "owner": owner.to_string() }),
        )?;
        let items = result
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| result.as_array().cloned())
            .ok_or_else(|| {
                ClientError::Indexer("getCompressedAccountsByOwner: unexpected shape".into())
            })?;
        items.iter().map(decode_account_bundle).collect()
    }

    /// Locate the pool record for a mint pair among the program's compressed
    /// accounts. Refuses nothing here; policy checks live in `engine.rs`.
    pub fn find_pool(
        &self,
        swap_program: &Pubkey,
        mint_a: &Pubkey,
        mint_b: &Pubkey,
    ) -> ClientResult<PoolBundle> {
        let accounts = self.get_compressed_accounts_by_owner(swap_program)?;
        for (account, data) in accounts {
            // Pool records carry an 8-byte discriminator before the borsh body.
            if data.len() <= 8 {
                continue;
            }
            let Ok(pool) = SwapPool::try_from_slice(&data[8..]) else {
                continue;
            };
            if pool.mint_a == *mint_a && pool.mint_b == *mint_b {
                return Ok(PoolBundle { account, pool });
            }
        }
        Err(ClientError::Indexer(format!(
            "no pool record for mints {mint_a}/{mint_b}"
        )))
    }
}

impl ProofEndpoints for IndexerClient {
    fn batch_proof(&self, hashes: &[[u8; 32]], new_addresses: &[NewAddress]) -> ClientResult<Value> {
        let addresses: Vec<Value> = new_addresses
            .iter()
            .map(|a| json!({ "address": hex32(&a.address), "tree": a.tree.to_string() }))
            .collect();
        self.rpc_call(
            "getValidityProof",
            json!({
                "hashes": hashes.iter().map(|h| hex32(h)).collect::<Vec<_>>(),
                "newAddressesWithTrees": addresses,
            }),
        )
    }

    fn multi_proof(&self, hashes: &[[u8; 32]]) -> ClientResult<Value> {
        self.rpc_call(
            "getMultipleCompressedAccountProofs",
            json!(hashes.iter().map(|h| hex32(h)).collect::<Vec<_>>()),
        )
    }

    fn account_proof(&self, hash: &[u8; 32]) -> ClientResult<Value> {
        self.rpc_call("getCompressedAccountProof", json!({ "hash": hex32(hash) }))
    }

    fn legacy_proof(&self, hash: &[u8; 32]) -> ClientResult<Value> {
        self.rpc_call("getCompressedProof", json!({ "hash": hex32(hash) }))
    }
}

fn hex32(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a 32-byte hex string into `[u8; 32]`.
pub fn parse_hex32(s: &str) -> ClientResult<[u8; 32]> {
    let s = s.trim().trim_start_matches("0x");
    let v = hex::decode(s).map_err(|e| ClientError::Indexer(format!("invalid hex: {e}")))?;
    v.try_into()
        .map_err(|v: Vec<u8>| ClientError::Indexer(format!("expected 32 bytes, got {}", v.len())))
}

fn field_str<'a>(v: &'a Value, key: &str) -> ClientResult<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::Indexer(format!("compressed account missing {key}")))
}

fn decode_account_bundle(v: &Value) -> ClientResult<(CompressedAccountRef, Vec<u8>)> {
    let hash = parse_hex32(field_str(v, "hash")?)?;
    let address = match v.get("address") {
        Some(Value::String(s)) if !s.is_empty() => Some(parse_hex32(s)?),
        _ => None,
    };
    let tree = Pubkey::from_str(field_str(v, "tree")?)
        .map_err(|e| ClientError::Indexer(format!("invalid tree pubkey: {e}")))?;
    let queue = Pubkey::from_str(field_str(v, "queue")?)
        .map_err(|e| ClientError::Indexer(format!("invalid queue pubkey: {e}")))?;
    // Leaf indices come back as numbers or strings depending on version.
    let leaf_index = v
        .get("leafIndex")
        .or_else(|| v.get("leaf_index"))
        .and_then(lenient_u64)
        .ok_or_else(|| ClientError::Indexer("compressed account missing leafIndex".into()))?;

    let data_hex = field_str(v, "data")?;
    let data = hex::decode(data_hex.trim_start_matches("0x"))
        .map_err(|e| ClientError::Indexer(format!("invalid account data hex: {e}")))?;

    Ok((
        CompressedAccountRef {
            hash,
            address,
            tree,
            queue,
            leaf_index,
        },
        data,
    ))
}

/// Current root index advertised by tree metadata, when the indexer includes
/// it in an account bundle. Used as the last-resort proof field default.
pub fn tree_default_root_index(v: &Value) -> Option<u32> {
    v.get("rootIndex")
        .or_else(|| v.get("root_index"))
        .and_then(lenient_u32)
}
