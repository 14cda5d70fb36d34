//! Packed remaining-accounts table.
//!
//! The on-chain program consumes a variable-length account list positionally:
//! position encodes meaning, and there is no type safety at the boundary.
//! Internally every entry carries a named role so ordering mistakes surface
//! as a typed defect during assembly instead of as an opaque on-chain error;
//! the role tags are erased only at the final flatten into `AccountMeta`s.
//!
//! Any schema change on the program side requires a coordinated change to
//! the packing order in `engine.rs`.

use solana_sdk::instruction::AccountMeta;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;

use crate::error::{ClientError, ClientResult};

/// What an entry in the remaining-accounts list *is*. Names follow the
/// receiving program's account list, not this crate's internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRole {
    LightSystemProgram,
    CpiAuthority,
    AccountCompressionProgram,
    NoopProgram,
    SystemProgram,
    StateTree,
    OutputQueue,
    PoolAuthority,
    Allowance,
    OutputBalance,
}

#[derive(Debug, Clone)]
struct PackedEntry {
    role: AccountRole,
    meta: AccountMeta,
}

/// Insertion-ordered unique account table.
#[derive(Debug, Default)]
pub struct PackedAccounts {
    entries: Vec<PackedEntry>,
    index_of: HashMap<Pubkey, u8>,
    defect: Option<String>,
}

impl PackedAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a writable, non-signer account; returns its index. Repeated
    /// insertion of the same key returns the same index without growing the
    /// table; a readonly entry is upgraded to writable on re-insert.
    pub fn insert_or_get(&mut self, role: AccountRole, pubkey: Pubkey) -> u8 {
        self.insert(role, pubkey, true)
    }

    pub fn insert_or_get_readonly(&mut self, role: AccountRole, pubkey: Pubkey) -> u8 {
        self.insert(role, pubkey, false)
    }

    fn insert(&mut self, role: AccountRole, pubkey: Pubkey, writable: bool) -> u8 {
        if let Some(&idx) = self.index_of.get(&pubkey) {
            let existing_role = self.entries[idx as usize].role;
            if existing_role != role {
                // Same pubkey under two roles would silently alias table
                // positions; record the defect and fail at flatten time.
                self.defect.get_or_insert_with(|| {
                    format!("account {pubkey} inserted as {existing_role:?} and again as {role:?}")
                });
            }
            if writable {
                self.entries[idx as usize].meta.is_writable = true;
            }
            return idx;
        }
        if self.entries.len() >= usize::from(u8::MAX) {
            self.defect
                .get_or_insert_with(|| "packed accounts table overflow (max 255)".to_string());
            return u8::MAX;
        }
        let idx = self.entries.len() as u8;
        let meta = if writable {
            AccountMeta::new(pubkey, false)
        } else {
            AccountMeta::new_readonly(pubkey, false)
        };
        self.entries.push(PackedEntry { role, meta });
        self.index_of.insert(pubkey, idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index_of(&self, pubkey: &Pubkey) -> Option<u8> {
        self.index_of.get(pubkey).copied()
    }

    /// Every packed address, in table order. This is the target set the
    /// lookup table must cover before assembly.
    pub fn addresses(&self) -> Vec<Pubkey> {
        self.entries.iter().map(|e| e.meta.pubkey).collect()
    }

    pub fn role_at(&self, index: u8) -> Option<AccountRole> {
        self.entries.get(index as usize).map(|e| e.role)
    }

    /// Flatten to the positional wire format. Role tags are erased here and
    /// nowhere else; a recorded contract violation surfaces now as
    /// `AccountOrderingDefect`.
    pub fn to_account_metas(&self) -> ClientResult<Vec<AccountMeta>> {
        if let Some(defect) = &self.defect {
            return Err(ClientError::AccountOrderingDefect(defect.clone()));
        }
        Ok(self.entries.iter().map(|e| e.meta.clone()).collect())
    }
}
