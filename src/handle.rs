//! Ciphertext-handle extraction.
//!
//! An encrypted-balance record has a fixed layout:
//!
//!   discriminator(8) || owner(32) || mint(32) || handle(16 LE) || tail
//!
//! so the handle occupies bytes 72..88. Structured (simulated/decoded)
//! account values have no fixed shape across RPC versions; `from_value`
//! tries the known representations in order and fails loudly when none
//! parse, because an unrecognized shape is a resolver bug rather than a
//! runtime condition.

use serde_json::Value;
use solana_client::rpc_client::RpcClient;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;

use crate::error::{ClientError, ClientResult};
use crate::parse::lenient_u128;
use crate::solana::simulate_with_account_capture;
use crate::types::Handle;

pub const HANDLE_OFFSET: usize = 72;
pub const HANDLE_LEN: usize = 16;

/// Extract the handle from raw account bytes.
pub fn extract_handle_from_raw(data: &[u8]) -> ClientResult<Handle> {
    if data.len() < HANDLE_OFFSET + HANDLE_LEN {
        return Err(ClientError::BadRequest(format!(
            "account data too short for handle: {} bytes (need {})",
            data.len(),
            HANDLE_OFFSET + HANDLE_LEN
        )));
    }
    let bytes = &data[HANDLE_OFFSET..HANDLE_OFFSET + HANDLE_LEN];
    // Little-endian: the highest byte is last. Fold high-to-low.
    let mut value: u128 = 0;
    for b in bytes.iter().rev() {
        value = (value << 8) | u128::from(*b);
    }
    Ok(Handle(value))
}

/// Write a handle into a buffer at the fixed record offset. Used by tests
/// and fixtures; the client never mutates real account bytes.
pub fn encode_handle_at_offset(handle: Handle, buf: &mut [u8]) -> ClientResult<()> {
    if buf.len() < HANDLE_OFFSET + HANDLE_LEN {
        return Err(ClientError::BadRequest(format!(
            "buffer too short for handle: {} bytes",
            buf.len()
        )));
    }
    buf[HANDLE_OFFSET..HANDLE_OFFSET + HANDLE_LEN].copy_from_slice(&handle.to_le_bytes());
    Ok(())
}

/// Extract the handle from a decoded account value of unknown shape.
///
/// Tries, in order: a 16-byte array (LE), a big-integer wrapper (covers
/// decimal strings and `{_bn: ...}` objects), a single-keyed nested
/// container.
pub fn extract_handle_from_value(v: &Value) -> ClientResult<Handle> {
    if let Some(items) = v.as_array() {
        if items.len() == HANDLE_LEN {
            let mut bytes = [0u8; HANDLE_LEN];
            let mut ok = true;
            for (i, item) in items.iter().enumerate() {
                match item.as_u64().and_then(|b| u8::try_from(b).ok()) {
                    Some(b) => bytes[i] = b,
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok {
                return Ok(Handle::from_le_bytes(bytes));
            }
        }
    }
    if let Some(n) = lenient_u128(v) {
        return Ok(Handle(n));
    }
    if let Some(map) = v.as_object() {
        if map.len() == 1 {
            if let Some(inner) = map.values().next() {
                if let Ok(h) = extract_handle_from_value(inner) {
                    return Ok(h);
                }
            }
        }
    }
    Err(ClientError::Internal(format!(
        "unrecognized handle encoding: {v}"
    )))
}

/// Simulate-then-read: discover handles that do not exist on ledger yet.
///
/// Builds the candidate instruction into a transaction signed against a
/// disposable recent blockhash, simulates without broadcasting, and reads
/// the watched accounts' post-simulation state. Accounts the simulation did
/// not materialize come back as errors naming the account.
pub fn simulate_and_read_handles(
    rpc: &RpcClient,
    payer: &Keypair,
    ix: Instruction,
    watched: &[Pubkey],
) -> ClientResult<Vec<Handle>> {
    let captured = simulate_with_account_capture(rpc, payer, ix, watched)?;
    let mut out = Vec::with_capacity(watched.len());
    for (pubkey, bytes) in watched.iter().zip(captured) {
        let Some(bytes) = bytes else {
            return Err(ClientError::Rpc(format!(
                "simulation did not materialize account {pubkey}"
            )));
        };
        out.push(extract_handle_from_raw(&bytes)?);
    }
    Ok(out)
}

/// Confirmed-read: fetch the committed record after real submission.
pub fn read_confirmed_handle(rpc: &RpcClient, account: &Pubkey) -> ClientResult<Handle> {
    let acc = rpc
        .get_account(account)
        .map_err(|e| ClientError::Rpc(format!("fetch account {account} failed: {e}")))?;
    extract_handle_from_raw(&acc.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_with(handle: Handle) -> Vec<u8> {
        let mut buf = vec![0u8; HANDLE_OFFSET + HANDLE_LEN + 9];
        encode_handle_at_offset(handle, &mut buf).unwrap();
        buf
    }

    #[test]
    fn raw_round_trip_at_boundaries() {
        for v in [0u128, 1, u128::MAX] {
            let buf = record_with(Handle(v));
            assert_eq!(extract_handle_from_raw(&buf).unwrap(), Handle(v));
        }
    }

    #[test]
    fn raw_is_little_endian_at_fixed_offset() {
        let mut buf = vec![0u8; 96];
        buf[HANDLE_OFFSET] = 0x01;
        buf[HANDLE_OFFSET + 1] = 0x02;
        assert_eq!(extract_handle_from_raw(&buf).unwrap(), Handle(0x0201));
    }

    #[test]
    fn short_record_is_rejected() {
        let buf = vec![0u8; HANDLE_OFFSET + HANDLE_LEN - 1];
        assert!(extract_handle_from_raw(&buf).is_err());
    }

    #[test]
    fn value_shapes_byte_array_wrapper_and_container() {
        let h = Handle(0xDEAD_BEEF);
        let le: Vec<u8> = h.to_le_bytes().to_vec();
        assert_eq!(extract_handle_from_value(&json!(le)).unwrap(), h);
        assert_eq!(
            extract_handle_from_value(&json!({"_bn": h.0.to_string()})).unwrap(),
            h
        );
        assert_eq!(
            extract_handle_from_value(&json!({"euint128": {"_bn": h.0.to_string()}})).unwrap(),
            h
        );
        assert_eq!(
            extract_handle_from_value(&json!(h.0.to_string())).unwrap(),
            h
        );
    }

    #[test]
    fn unrecognized_shape_fails_loudly() {
        let err = extract_handle_from_value(&json!({"a": 1, "b": 2})).unwrap_err();
        assert!(matches!(err, ClientError::Internal(_)));
        assert!(err.to_string().contains("unrecognized handle encoding"));
    }
}
