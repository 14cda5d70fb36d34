//! Shared data model.
//!
//! We separate these from `engine.rs` so the flow code stays readable.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::pubkey::Pubkey;

use crate::error::ClientError;

const MAX_CIPHERTEXT_LEN: usize = 2048;

/// Opaque identifier for one homomorphically-encrypted value.
///
/// The client only ever compares handles and (de)serializes them as 16-byte
/// little-endian integers; the ciphertext itself never passes through here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub u128);

impl Handle {
    pub fn to_le_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_le_bytes()))
    }
}

/// One record inside a Merkleized state tree.
///
/// Immutable once fetched, but becomes stale when the tree root advances:
/// a stale ref must be refetched, never patched up.
#[derive(Debug, Clone)]
pub struct CompressedAccountRef {
    pub hash: [u8; 32],
    /// Present for addressed accounts; `None` for hash-only records.
    pub address: Option<[u8; 32]>,
    pub tree: Pubkey,
    pub queue: Pubkey,
    pub leaf_index: u64,
}

/// Groth16-style curve-point triple as the receiving program expects it.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CompressedProof {
    pub a: [u8; 32],
    pub b: [u8; 64],
    pub c: [u8; 32],
}

/// Authorization for a compressed-state transition.
///
/// Exactly one of `proof` or `prove_by_index` is the mechanism; both absent
/// is an invalid proof and `ProofResolver` refuses to return one.
#[derive(Debug, Clone)]
pub struct ValidityProof {
    pub proof: Option<CompressedProof>,
    pub root_index: u32,
    pub prove_by_index: bool,
}

impl ValidityProof {
    pub fn is_usable(&self) -> bool {
        self.proof.is_some() || self.prove_by_index
    }
}

/// Client-side mirror of the on-chain compressed pool record.
///
/// Layout must match the program's `SwapPool` account exactly (borsh fields
/// after the 8-byte discriminator). The four `u128` fields are ciphertext
/// handles, not plaintext amounts.
#[derive(Debug, Clone, BorshDeserialize, BorshSerialize)]
pub struct SwapPool {
    pub authority: Pubkey,
    pub pool_authority: Pubkey,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub reserve_a: u128,
    pub reserve_b: u128,
    pub protocol_fee_a: u128,
    pub protocol_fee_b: u128,
    pub fee_bps: u16,
    pub is_paused: bool,
    pub last_update_ts: i64,
}

/// A compressed pool record together with its tree position.
#[derive(Debug, Clone)]
pub struct PoolBundle {
    pub account: CompressedAccountRef,
    pub pool: SwapPool,
}

/// Tree position of a compressed account as the on-chain program consumes
/// it: tree/queue pubkeys are replaced by indices into the packed accounts.
///
/// Must match the program's packed tree-info layout byte for byte.
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct PackedStateTreeInfo {
    pub root_index: u16,
    pub prove_by_index: bool,
    pub merkle_tree_pubkey_index: u8,
    pub queue_pubkey_index: u8,
    pub leaf_index: u32,
}

/// Instruction-data metadata for the compressed pool account.
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize)]
pub struct CompressedAccountMeta {
    pub tree_info: PackedStateTreeInfo,
    pub address: Option<[u8; 32]>,
    pub output_state_tree_index: u8,
}

pub(crate) fn ensure_ciphertext_len(field: &str, bytes: &[u8]) -> Result<(), ClientError> {
    if bytes.is_empty() {
        return Err(ClientError::BadRequest(format!("{field} must not be empty")));
    }
    if bytes.len() > MAX_CIPHERTEXT_LEN {
        return Err(ClientError::BadRequest(format!(
            "{field} too long: {} bytes (max {MAX_CIPHERTEXT_LEN})",
            bytes.len()
        )));
    }
    Ok(())
}
