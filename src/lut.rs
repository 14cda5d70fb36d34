//! Persistent address-lookup-table sync.
//!
//! A swap transaction references more accounts than a legacy message can
//! encode; the flow therefore compiles a v0 message against one persistent
//! lookup table. The table must contain every packed address *before*
//! assembly: a compiled message referencing addresses absent from the table
//! exceeds the maximum encoding size and the ledger rejects it outright.
//!
//! The snapshot is the only client-local mutable shared state in the crate.
//! It is invalidated and reloaded after every extend.

use solana_client::rpc_client::RpcClient;
use solana_sdk::address_lookup_table::instruction::extend_lookup_table;
use solana_sdk::address_lookup_table::state::AddressLookupTable;
use solana_sdk::address_lookup_table::AddressLookupTableAccount;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};

/// Keep each extend instruction comfortably under the packet size.
const EXTEND_CHUNK: usize = 20;

pub struct LookupTableManager {
    rpc: Arc<RpcClient>,
    table: Pubkey,
    snapshot: Option<Vec<Pubkey>>,
    confirm_timeout: Duration,
}

impl LookupTableManager {
    pub fn new(rpc: Arc<RpcClient>, table: Pubkey, confirm_timeout: Duration) -> Self {
        Self {
            rpc,
            table,
            snapshot: None,
            confirm_timeout,
        }
    }

    pub fn table_address(&self) -> Pubkey {
        self.table
    }

    pub fn invalidate(&mut self) {
        self.snapshot = None;
    }

    /// Cached table contents, loading lazily.
    pub fn snapshot(&mut self) -> ClientResult<&[Pubkey]> {
        if self.snapshot.is_none() {
            self.snapshot = Some(self.load()?);
        }
        Ok(self.snapshot.as_deref().expect("just loaded"))
    }

    fn load(&self) -> ClientResult<Vec<Pubkey>> {
        let acc = self
            .rpc
            .get_account(&self.table)
            .map_err(|e| ClientError::LookupTableSync(format!("fetch table failed: {e}")))?;
        let table = AddressLookupTable::deserialize(&acc.data)
            .map_err(|e| ClientError::LookupTableSync(format!("table decode failed: {e}")))?;
        Ok(table.addresses.to_vec())
    }

    /// Addresses in `targets` the table does not hold yet.
    pub fn missing(&mut self, targets: &[Pubkey]) -> ClientResult<Vec<Pubkey>> {
        let snapshot = self.snapshot()?;
        let mut missing: Vec<Pubkey> = Vec::new();
        for t in targets {
            if !snapshot.contains(t) && !missing.contains(t) {
                missing.push(*t);
            }
        }
        Ok(missing)
    }

    /// Ensure the table covers `targets`, extending it if needed, and return
    /// the account to compile the v0 message against.
    ///
    /// Each extend is submitted, confirmed, and retried once on failure; a
    /// second failure is fatal. After any extend the snapshot is invalidated
    /// and reloaded, and the diff is re-checked before returning.
    pub fn sync(
        &mut self,
        authority: &Keypair,
        targets: &[Pubkey],
    ) -> ClientResult<AddressLookupTableAccount> {
        let missing = self.missing(targets)?;
        if missing.is_empty() {
            return self.account();
        }
        tracing::info!(
            table = %self.table,
            missing = missing.len(),
            "extending lookup table"
        );

        for chunk in missing.chunks(EXTEND_CHUNK) {
            if let Err(first) = self.extend_once(authority, chunk) {
                tracing::warn!(error = %first, "lookup table extend failed; retrying once");
                self.extend_once(authority, chunk).map_err(|e| {
                    ClientError::LookupTableSync(format!("extend failed after retry: {e}"))
                })?;
            }
        }

        self.invalidate();
        let still_missing = self.missing(targets)?;
        if !still_missing.is_empty() {
            return Err(ClientError::LookupTableSync(format!(
                "{} addresses still missing after extend",
                still_missing.len()
            )));
        }
        self.account()
    }

    fn extend_once(&self, authority: &Keypair, addresses: &[Pubkey]) -> ClientResult<()> {
        let ix = extend_lookup_table(
            self.table,
            authority.pubkey(),
            Some(authority.pubkey()),
            addresses.to_vec(),
        );
        let bh = self
            .rpc
            .get_latest_blockhash()
            .map_err(|e| ClientError::Rpc(format!("blockhash failed: {e}")))?;
        let tx = Transaction::new_signed_with_payer(
            &[ix],
            Some(&authority.pubkey()),
            &[authority],
            bh,
        );
        let sig = self
            .rpc
            .send_transaction(&tx)
            .map_err(|e| ClientError::Rpc(format!("send extend failed: {e}")))?;
        crate::solana::wait_for_signature_confirmed(&self.rpc, &sig, self.confirm_timeout)
    }

    fn account(&mut self) -> ClientResult<AddressLookupTableAccount> {
        let addresses = self.snapshot()?.to_vec();
        Ok(AddressLookupTableAccount {
            key: self.table,
            addresses,
        })
    }
}
