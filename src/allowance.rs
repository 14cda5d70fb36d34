//! Allowance PDA derivation.
//!
//! An allowance authorizes `grantee` to request decryption of the value
//! behind `handle`. The record is created on-chain atomically with the swap
//! instruction and never persisted by the client past derivation.
//!
//! Seeds are exactly the 16-byte little-endian handle encoding followed by
//! the grantee's raw address bytes, hashed against the permission program.
//! This must match the receiving program's own derivation byte for byte:
//! a divergence (endianness, seed order) produces an unrelated address and
//! the transaction fails with an *authorization* error, not a decoding
//! error. On an unexplained authorization failure, audit this first.

use solana_sdk::pubkey::Pubkey;

use crate::types::Handle;

pub fn derive_allowance_pda(
    handle: Handle,
    grantee: &Pubkey,
    permission_program: &Pubkey,
) -> (Pubkey, u8) {
    let handle_bytes = handle.to_le_bytes();
    Pubkey::find_program_address(&[handle_bytes.as_ref(), grantee.as_ref()], permission_program)
}
