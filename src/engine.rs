//! Core swap-flow logic.
//!
//! We keep this file focused on:
//! - quote math
//! - the flow state machine
//! - assembling, submitting, and confirming the final transaction
//!
//! Anything that touches the network is delegated:
//! - RPC fetching / tx submission lives in `solana.rs`
//! - indexer API calls live in `indexer.rs`
//! - proof normalization lives in `proof.rs`
//! - decryption service calls live in `decrypt.rs`
//!
//! The flow is strictly sequential and fail-fast. Once `Submitted`, the pool
//! may already have mutated on-chain, so nothing here retries forward with
//! stale inputs and nothing auto-resubmits.

use solana_client::rpc_client::RpcClient;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;

use crate::accounts::{AccountRole, PackedAccounts};
use crate::allowance::derive_allowance_pda;
use crate::config::Config;
use crate::decrypt::{
    decrypt_with_retry, AttestedDecryptClient, DecryptOutcome, SystemClock,
};
use crate::error::{ClientError, ClientResult};
use crate::handle::simulate_and_read_handles;
use crate::indexer::IndexerClient;
use crate::lut::LookupTableManager;
use crate::proof::{resolve_validity_proof, ProofTarget};
use crate::solana::{
    build_swap_exact_in, canonical_mints, cpi_authority_pda, encrypted_balance_pda,
    pool_authority_pda, pubkey_const, rpc_client, send_transaction_skip_preflight,
    wait_for_signature_confirmed, SwapExactInArgs, ACCOUNT_COMPRESSION_PROGRAM_ID,
    LIGHT_SYSTEM_PROGRAM_ID, NOOP_PROGRAM_ID,
};
use crate::types::{
    ensure_ciphertext_len, CompressedAccountMeta, Handle, PackedStateTreeInfo, PoolBundle,
    ValidityProof,
};

// ---------------------------------------------------------------------
// Quote math
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapQuote {
    pub amount_in: u64,
    pub fee_amount: u64,
    pub amount_out: u64,
}

/// Constant-product quote with a basis-point fee on the input side:
///
///   fee = amount_in * fee_bps / 10_000
///   net = amount_in - fee
///   out = floor(reserve_out * net / (reserve_in + net))
///
/// Reserves are the plaintexts behind the pool's reserve handles; obtaining
/// them (via an allowance + the decryption service) is the caller's problem.
pub fn quote_exact_in(
    amount_in: u64,
    reserve_in: u64,
    reserve_out: u64,
    fee_bps: u16,
) -> ClientResult<SwapQuote> {
    if amount_in == 0 {
        return Err(ClientError::BadRequest("amount_in must be > 0".into()));
    }
    if reserve_in == 0 || reserve_out == 0 {
        return Err(ClientError::BadRequest("pool has empty reserves".into()));
    }
    if fee_bps >= 10_000 {
        return Err(ClientError::BadRequest(format!(
            "fee_bps must be < 10_000, got {fee_bps}"
        )));
    }
    let fee_amount = ((amount_in as u128) * (fee_bps as u128) / 10_000) as u64;
    let net_in = amount_in - fee_amount;
    if net_in == 0 {
        return Err(ClientError::BadRequest(
            "amount_in too small: fee consumes the entire input".into(),
        ));
    }
    let den = (reserve_in as u128) + (net_in as u128);
    let amount_out = ((reserve_out as u128) * (net_in as u128) / den) as u64;
    Ok(SwapQuote {
        amount_in,
        fee_amount,
        amount_out,
    })
}

// ---------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Idle,
    QuoteComputed,
    ProofResolved,
    AccountsPacked,
    LutSynced,
    Assembled,
    Submitted,
    Confirmed,
    Failed,
}

/// One confidential swap, fully specified by the caller.
///
/// The three ciphertext blobs come from an external encryptor and are
/// opaque here; `quote` is the plaintext the blobs were produced from.
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub mint_in: Pubkey,
    pub mint_out: Pubkey,
    pub quote: SwapQuote,
    pub amount_in_ciphertext: Vec<u8>,
    pub amount_out_ciphertext: Vec<u8>,
    pub fee_amount_ciphertext: Vec<u8>,
    pub input_type: u8,
}

impl SwapRequest {
    pub fn validate(&self) -> ClientResult<()> {
        if self.mint_in == self.mint_out {
            return Err(ClientError::BadRequest(
                "mint_in and mint_out must differ".into(),
            ));
        }
        if self.quote.amount_in == 0 {
            return Err(ClientError::BadRequest("amount_in must be > 0".into()));
        }
        ensure_ciphertext_len("amount_in_ciphertext", &self.amount_in_ciphertext)?;
        ensure_ciphertext_len("amount_out_ciphertext", &self.amount_out_ciphertext)?;
        ensure_ciphertext_len("fee_amount_ciphertext", &self.fee_amount_ciphertext)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SwapReceipt {
    pub signature: Signature,
    /// Ciphertext handle of the caller's post-swap output balance,
    /// discovered via simulate-then-read before submission.
    pub output_handle: Handle,
    /// Allowance PDA created atomically with the swap; authorizes the
    /// caller to decrypt `output_handle`.
    pub allowance: Pubkey,
    pub quote: SwapQuote,
}

pub struct SwapFlow {
    cfg: Arc<Config>,
    rpc: Arc<RpcClient>,
    indexer: Arc<IndexerClient>,
    // Option so the manager can move into spawn_blocking and back; the
    // snapshot it holds persists across flows.
    lut: Option<LookupTableManager>,
    stage: FlowStage,
}

impl SwapFlow {
    pub fn new(cfg: Arc<Config>) -> ClientResult<Self> {
        let rpc = Arc::new(rpc_client(cfg.rpc_url.clone()));
        let indexer = Arc::new(IndexerClient::new(
            &cfg.indexer_url,
            cfg.indexer_auth_token.clone(),
            cfg.proof_api_version,
        )?);
        let lut = LookupTableManager::new(
            rpc.clone(),
            cfg.lookup_table,
            Duration::from_secs(cfg.confirm_timeout_secs),
        );
        Ok(Self {
            cfg,
            rpc,
            indexer,
            lut: Some(lut),
            stage: FlowStage::Idle,
        })
    }

    pub fn stage(&self) -> FlowStage {
        self.stage
    }

    fn advance(&mut self, from: FlowStage, to: FlowStage) -> ClientResult<()> {
        if self.stage != from {
            return Err(ClientError::Internal(format!(
                "flow out of order: expected stage {from:?}, currently {:?}",
                self.stage
            )));
        }
        tracing::debug!(stage = ?to, "flow stage");
        self.stage = to;
        Ok(())
    }

    fn fail<T>(&mut self, err: ClientError) -> ClientResult<T> {
        self.stage = FlowStage::Failed;
        Err(err)
    }

    /// Execute the whole flow: prove, pack, sync the lookup table, assemble,
    /// submit, confirm. A flow runs once; after `Confirmed` or `Failed` a
    /// new `SwapFlow` must be created (the flow is not idempotent past
    /// submission, and resubmission after partial on-chain state mutation is
    /// unsafe).
    pub async fn run(
        &mut self,
        payer: Arc<Keypair>,
        req: SwapRequest,
    ) -> ClientResult<SwapReceipt> {
        match self.run_inner(payer, req).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => self.fail(e),
        }
    }

    async fn run_inner(
        &mut self,
        payer: Arc<Keypair>,
        req: SwapRequest,
    ) -> ClientResult<SwapReceipt> {
        req.validate()?;
        self.advance(FlowStage::Idle, FlowStage::QuoteComputed)?;

        // Pool record first: proof resolution needs its hash, packing needs
        // its tree position.
        let (mint_a, mint_b) = canonical_mints(req.mint_in, req.mint_out);
        let bundle = {
            let indexer = self.indexer.clone();
            let swap_program = self.cfg.swap_program_id;
            tokio::task::spawn_blocking(move || indexer.find_pool(&swap_program, &mint_a, &mint_b))
                .await
                .map_err(|e| ClientError::Internal(format!("pool fetch join failed: {e}")))??
        };
        let a_to_b = self.check_pool(&req, &bundle)?;

        // Proof resolution and base packing are independent; run them as
        // parallel logical stages.
        let proof_task = {
            let indexer = self.indexer.clone();
            let hash = bundle.account.hash;
            let api_version = self.cfg.proof_api_version;
            tokio::task::spawn_blocking(move || {
                resolve_validity_proof(
                    &*indexer,
                    api_version,
                    &ProofTarget::Existing { hash },
                    None,
                )
            })
        };
        let pack_task = async {
            self.pack_base_accounts(&payer, &req, &bundle)
        };
        let (proof_res, pack_res) = tokio::join!(proof_task, pack_task);
        let proof = proof_res
            .map_err(|e| ClientError::Internal(format!("proof task join failed: {e}")))??;
        let (mut packed, output_balance) = pack_res?;
        self.advance(FlowStage::QuoteComputed, FlowStage::ProofResolved)?;

        let pool_meta = self.pool_meta(&bundle, &proof, &packed)?;

        // Simulate-then-read: the output balance handle does not exist on
        // ledger yet; discover it from the probe's post-simulation state,
        // then derive the allowance the real transaction will create.
        let output_handle = {
            let probe = self.build_swap_ix(&payer, &req, &bundle, &proof, &pool_meta, &packed, a_to_b)?;
            let rpc = self.rpc.clone();
            let payer = payer.clone();
            tokio::task::spawn_blocking(move || {
                simulate_and_read_handles(&rpc, &payer, probe, &[output_balance])
            })
            .await
            .map_err(|e| ClientError::Internal(format!("probe task join failed: {e}")))??
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Internal("probe returned no handles".into()))?
        };
        let (allowance, _bump) = derive_allowance_pda(
            output_handle,
            &payer.pubkey(),
            &self.cfg.permission_program_id,
        );
        packed.insert_or_get(AccountRole::Allowance, allowance);
        self.advance(FlowStage::ProofResolved, FlowStage::AccountsPacked)?;

        // Lookup-table sync must finish before assembly: address-table gaps
        // oversize the compiled message and the ledger rejects it outright.
        let mut targets = packed.addresses();
        targets.push(self.cfg.permission_program_id);
        let lut_account = {
            let mut lut = self
                .lut
                .take()
                .ok_or_else(|| ClientError::Internal("lookup table manager missing".into()))?;
            let payer = payer.clone();
            let (lut, synced) = tokio::task::spawn_blocking(move || {
                let synced = lut.sync(&payer, &targets);
                (lut, synced)
            })
            .await
            .map_err(|e| ClientError::Internal(format!("lut task join failed: {e}")))?;
            self.lut = Some(lut);
            synced?
        };
        self.advance(FlowStage::AccountsPacked, FlowStage::LutSynced)?;

        // Assemble against a current blockhash.
        let swap_ix =
            self.build_swap_ix(&payer, &req, &bundle, &proof, &pool_meta, &packed, a_to_b)?;
        let mut ixs: Vec<Instruction> = vec![ComputeBudgetInstruction::set_compute_unit_limit(
            self.cfg.compute_unit_limit,
        )];
        if self.cfg.compute_unit_price_micro_lamports > 0 {
            ixs.push(ComputeBudgetInstruction::set_compute_unit_price(
                self.cfg.compute_unit_price_micro_lamports,
            ));
        }
        ixs.push(swap_ix);

        let bh = self
            .rpc
            .get_latest_blockhash()
            .map_err(|e| ClientError::Rpc(format!("blockhash failed: {e}")))?;
        let message = v0::Message::try_compile(&payer.pubkey(), &ixs, &[lut_account], bh)
            .map_err(|e| ClientError::Rpc(format!("message compile failed: {e}")))?;
        let tx = VersionedTransaction::try_new(VersionedMessage::V0(message), &[&*payer])
            .map_err(|e| ClientError::Rpc(format!("sign tx failed: {e}")))?;
        self.advance(FlowStage::LutSynced, FlowStage::Assembled)?;

        let sig = send_transaction_skip_preflight(&self.rpc, &tx)?;
        self.advance(FlowStage::Assembled, FlowStage::Submitted)?;
        tracing::info!(%sig, "swap submitted");

        {
            let rpc = self.rpc.clone();
            let timeout = Duration::from_secs(self.cfg.confirm_timeout_secs);
            tokio::task::spawn_blocking(move || wait_for_signature_confirmed(&rpc, &sig, timeout))
                .await
                .map_err(|e| ClientError::Internal(format!("confirm task join failed: {e}")))??;
        }
        self.advance(FlowStage::Submitted, FlowStage::Confirmed)?;
        tracing::info!(%sig, %output_handle, "swap confirmed");

        Ok(SwapReceipt {
            signature: sig,
            output_handle,
            allowance,
            quote: req.quote,
        })
    }

    /// Independently verify a settled handle against the decryption service.
    ///
    /// This is a blocking helper (HTTP + thread sleep). Call it from
    /// `spawn_blocking`. Exhaustion is the sentinel outcome, not an error.
    pub fn verify_outcome(
        &self,
        signer: &dyn Signer,
        handle: Handle,
    ) -> ClientResult<DecryptOutcome> {
        let service = AttestedDecryptClient::new(&self.cfg.decrypt_url)?;
        decrypt_with_retry(
            &service,
            signer,
            handle,
            &self.cfg.decrypt_backoff(),
            &SystemClock,
        )
    }

    fn check_pool(&self, req: &SwapRequest, bundle: &PoolBundle) -> ClientResult<bool> {
        let pool = &bundle.pool;
        if pool.is_paused {
            return Err(ClientError::BadRequest("pool is paused".into()));
        }
        let (expected_authority, _bump) =
            pool_authority_pda(&self.cfg.swap_program_id, &pool.mint_a, &pool.mint_b);
        if pool.pool_authority != expected_authority {
            tracing::warn!(
                onchain = %pool.pool_authority,
                derived = %expected_authority,
                "pool authority mismatch"
            );
            return Err(ClientError::Internal(
                "pool authority does not match derivation".into(),
            ));
        }
        // The quote was computed off decrypted reserves we cannot see here,
        // but the fee leg is checkable against the pool's configured rate.
        let expected_fee =
            ((req.quote.amount_in as u128) * (pool.fee_bps as u128) / 10_000) as u64;
        if req.quote.fee_amount != expected_fee {
            return Err(ClientError::BadRequest(format!(
                "quote fee {} does not match pool fee_bps {} (expected {})",
                req.quote.fee_amount, pool.fee_bps, expected_fee
            )));
        }
        if req.mint_in == pool.mint_a && req.mint_out == pool.mint_b {
            Ok(true)
        } else if req.mint_in == pool.mint_b && req.mint_out == pool.mint_a {
            Ok(false)
        } else {
            Err(ClientError::BadRequest(
                "mint_in/mint_out must match pool mints".into(),
            ))
        }
    }

    /// Build the remaining-accounts table in the order the on-chain program
    /// expects. Returns the table and the caller's output-balance record.
    ///
    /// Order is the positional contract with the program; any change on the
    /// program side requires a coordinated change here.
    fn pack_base_accounts(
        &self,
        payer: &Keypair,
        req: &SwapRequest,
        bundle: &PoolBundle,
    ) -> ClientResult<(PackedAccounts, Pubkey)> {
        let mut packed = PackedAccounts::new();
        packed.insert_or_get_readonly(
            AccountRole::LightSystemProgram,
            pubkey_const(LIGHT_SYSTEM_PROGRAM_ID),
        );
        packed.insert_or_get_readonly(
            AccountRole::CpiAuthority,
            cpi_authority_pda(&self.cfg.swap_program_id).0,
        );
        packed.insert_or_get_readonly(
            AccountRole::AccountCompressionProgram,
            pubkey_const(ACCOUNT_COMPRESSION_PROGRAM_ID),
        );
        packed.insert_or_get_readonly(AccountRole::NoopProgram, pubkey_const(NOOP_PROGRAM_ID));
        packed.insert_or_get_readonly(
            AccountRole::SystemProgram,
            solana_sdk::system_program::id(),
        );
        packed.insert_or_get(AccountRole::StateTree, bundle.account.tree);
        packed.insert_or_get(AccountRole::OutputQueue, bundle.account.queue);
        packed.insert_or_get_readonly(AccountRole::PoolAuthority, bundle.pool.pool_authority);

        let (output_balance, _bump) = encrypted_balance_pda(
            &self.cfg.permission_program_id,
            &payer.pubkey(),
            &req.mint_out,
        );
        packed.insert_or_get(AccountRole::OutputBalance, output_balance);
        Ok((packed, output_balance))
    }

    fn pool_meta(
        &self,
        bundle: &PoolBundle,
        proof: &ValidityProof,
        packed: &PackedAccounts,
    ) -> ClientResult<CompressedAccountMeta> {
        let tree_index = packed
            .index_of(&bundle.account.tree)
            .ok_or_else(|| ClientError::AccountOrderingDefect("state tree not packed".into()))?;
        let queue_index = packed
            .index_of(&bundle.account.queue)
            .ok_or_else(|| ClientError::AccountOrderingDefect("output queue not packed".into()))?;
        let root_index = u16::try_from(proof.root_index)
            .map_err(|_| ClientError::Internal(format!("root index {} exceeds u16", proof.root_index)))?;
        let leaf_index = u32::try_from(bundle.account.leaf_index)
            .map_err(|_| ClientError::Internal(format!("leaf index {} exceeds u32", bundle.account.leaf_index)))?;
        Ok(CompressedAccountMeta {
            tree_info: PackedStateTreeInfo {
                root_index,
                prove_by_index: proof.prove_by_index,
                merkle_tree_pubkey_index: tree_index,
                queue_pubkey_index: queue_index,
                leaf_index,
            },
            address: bundle.account.address,
            output_state_tree_index: tree_index,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_swap_ix(
        &self,
        payer: &Keypair,
        req: &SwapRequest,
        bundle: &PoolBundle,
        proof: &ValidityProof,
        pool_meta: &CompressedAccountMeta,
        packed: &PackedAccounts,
        a_to_b: bool,
    ) -> ClientResult<Instruction> {
        let pool_data = borsh::to_vec(&bundle.pool)
            .map_err(|e| ClientError::Internal(format!("pool serialize failed: {e}")))?;
        build_swap_exact_in(
            self.cfg.swap_program_id,
            self.cfg.permission_program_id,
            payer.pubkey(),
            &SwapExactInArgs {
                proof,
                pool_meta,
                pool_data: &pool_data,
                amount_in_ciphertext: &req.amount_in_ciphertext,
                amount_out_ciphertext: &req.amount_out_ciphertext,
                fee_amount_ciphertext: &req.fee_amount_ciphertext,
                input_type: req.input_type,
                a_to_b,
            },
            packed.to_account_metas()?,
        )
    }
}
