//! Solana RPC helpers + on-chain instruction builder.
//!
//! The client intentionally does not use Anchor client codegen here.
//! We build the instruction data manually (Anchor ABI) because:
//! - the service is Rust
//! - the instruction args are simple and stable
//! - it avoids a dependency on program codegen
//!
//! Preflight simulation is unreliable for encrypted-state transitions (it
//! can reject valid transactions), so submission always skips preflight and
//! correctness is verified by polling confirmation afterwards.

use base64::Engine;
use solana_account_decoder::{UiAccountData, UiAccountEncoding};
use solana_client::rpc_client::RpcClient;
use solana_client::rpc_config::{
    RpcSendTransactionConfig, RpcSimulateTransactionAccountsConfig, RpcSimulateTransactionConfig,
    RpcTransactionConfig,
};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::{Transaction, VersionedTransaction};
use solana_transaction_status::{TransactionConfirmationStatus, UiTransactionEncoding};
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::error::{ClientError, ClientResult};
use crate::types::{CompressedAccountMeta, ValidityProof};

pub const SWAP_PROGRAM_ID: &str = "4b8jCufu7b4WKXdxFRQHWSks4QdskW62qF7tApSNXuZD";
pub const DECRYPTION_ORACLE_PROGRAM_ID: &str = "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5";
pub const LIGHT_SYSTEM_PROGRAM_ID: &str = "SySTEM1eSU2p4BGQfQpimFEWWSC1XDFeun3Nqzz3rT7";
pub const ACCOUNT_COMPRESSION_PROGRAM_ID: &str = "compr6CUsB5m2jS4Y3831ztGSTnDpnKJTKS95d64XVq";
pub const NOOP_PROGRAM_ID: &str = "noopb9bkMVfRPU8AsbpTUg8AQkHtKwMYZiFUjNRtMmV";

pub fn rpc_client(rpc_url: String) -> RpcClient {
    RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed())
}

pub fn anchor_discriminator(ix_name: &str) -> [u8; 8] {
    // Anchor discriminator for global instructions:
    // sha256("global:<ix_name>")[..8]
    use sha2::{Digest, Sha256};
    let mut h = Sha256::new();
    h.update(format!("global:{ix_name}").as_bytes());
    let out = h.finalize();
    out[..8].try_into().expect("slice")
}

pub fn pubkey_const(b58: &str) -> Pubkey {
    Pubkey::from_str(b58).expect("static")
}

/// Pool authority PDA. Seeds on-chain: [b"pool_authority", mint_a, mint_b]
/// with canonical ordering mint_a < mint_b.
pub fn pool_authority_pda(program_id: &Pubkey, mint_a: &Pubkey, mint_b: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[b"pool_authority", mint_a.as_ref(), mint_b.as_ref()],
        program_id,
    )
}

/// The swap program's CPI signer toward the compressed-state system program.
pub fn cpi_authority_pda(program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[b"cpi_authority"], program_id)
}

/// Encrypted-balance record for (owner, mint) under the permission program.
///
/// The record layout is fixed: discriminator(8) || owner(32) || mint(32)
/// || ciphertext handle(16) || tail. `handle.rs` depends on that layout.
pub fn encrypted_balance_pda(
    permission_program: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[b"enc_balance", owner.as_ref(), mint.as_ref()], permission_program)
}

pub fn canonical_mints(a: Pubkey, b: Pubkey) -> (Pubkey, Pubkey) {
    if a.to_bytes() < b.to_bytes() {
        (a, b)
    } else {
        (b, a)
    }
}

/// Arguments for `swap_exact_in`, serialized in the exact on-chain order.
pub struct SwapExactInArgs<'a> {
    pub proof: &'a ValidityProof,
    pub pool_meta: &'a CompressedAccountMeta,
    pub pool_data: &'a [u8],
    pub amount_in_ciphertext: &'a [u8],
    pub amount_out_ciphertext: &'a [u8],
    pub fee_amount_ciphertext: &'a [u8],
    pub input_type: u8,
    pub a_to_b: bool,
}

/// Build the `swap_exact_in` instruction.
///
/// Static accounts are `[fee_payer, decryption oracle program]`; everything
/// else (system programs, trees, pool authority, allowance) rides in
/// `remaining` in packed order. The program indexes `remaining` positionally.
pub fn build_swap_exact_in(
    program_id: Pubkey,
    permission_program: Pubkey,
    fee_payer: Pubkey,
    args: &SwapExactInArgs<'_>,
    remaining: Vec<AccountMeta>,
) -> ClientResult<Instruction> {
    // Anchor args layout:
    // disc(8)
    // || proof: Option<(a,b,c)>
    // || pool_meta (packed tree info + address + output tree index)
    // || pool_data: vec<u8>
    // || amount_in/out/fee ciphertexts: vec<u8> each
    // || input_type: u8
    // || a_to_b: bool
    let mut data = Vec::with_capacity(
        8 + 129
            + args.pool_data.len()
            + args.amount_in_ciphertext.len()
            + args.amount_out_ciphertext.len()
            + args.fee_amount_ciphertext.len()
            + 64,
    );
    data.extend_from_slice(&anchor_discriminator("swap_exact_in"));
    match &args.proof.proof {
        Some(p) => {
            data.push(1);
            data.extend_from_slice(&p.a);
            data.extend_from_slice(&p.b);
            data.extend_from_slice(&p.c);
        }
        None => data.push(0),
    }
    let meta_bytes = borsh::to_vec(args.pool_meta)
        .map_err(|e| ClientError::Internal(format!("pool meta serialize failed: {e}")))?;
    data.extend_from_slice(&meta_bytes);
    for blob in [
        args.pool_data,
        args.amount_in_ciphertext,
        args.amount_out_ciphertext,
        args.fee_amount_ciphertext,
    ] {
        data.extend_from_slice(&(blob.len() as u32).to_le_bytes());
        data.extend_from_slice(blob);
    }
    data.push(args.input_type);
    data.push(args.a_to_b as u8);

    let mut accounts = vec![
        AccountMeta::new(fee_payer, true),
        AccountMeta::new_readonly(permission_program, false),
    ];
    accounts.extend(remaining);

    Ok(Instruction {
        program_id,
        accounts,
        data,
    })
}

pub fn send_transaction_skip_preflight(
    rpc: &RpcClient,
    tx: &VersionedTransaction,
) -> ClientResult<Signature> {
    rpc.send_transaction_with_config(
        tx,
        RpcSendTransactionConfig {
            skip_preflight: true,
            ..RpcSendTransactionConfig::default()
        },
    )
    .map_err(|e| ClientError::Rpc(format!("send tx failed: {e}")))
}

/// Block until `sig` is confirmed/finalized, or return an error/timeout.
///
/// This is a blocking helper (uses RPC polling + thread sleep). Call it from
/// `spawn_blocking`. On a failed transaction the execution log is fetched
/// and surfaced verbatim.
pub fn wait_for_signature_confirmed(
    rpc: &RpcClient,
    sig: &Signature,
    timeout: Duration,
) -> ClientResult<()> {
    let t0 = Instant::now();
    let mut backoff_ms: u64 = 250;
    loop {
        if t0.elapsed() > timeout {
            return Err(ClientError::Rpc(format!(
                "tx confirmation timeout after {}s",
                timeout.as_secs()
            )));
        }

        let st = rpc
            .get_signature_statuses(&[*sig])
            .map_err(|e| ClientError::Rpc(format!("get_signature_statuses failed: {e}")))?;

        let s0 = st.value.first().and_then(|v| v.as_ref());
        if let Some(s0) = s0 {
            if let Some(err) = &s0.err {
                tracing::warn!(?err, %sig, "tx failed while confirming");
                let logs = fetch_transaction_logs(rpc, sig).unwrap_or_default();
                return Err(ClientError::OnChainExecution {
                    signature: sig.to_string(),
                    logs,
                });
            }

            // Treat "confirmed" or "finalized" as success.
            let ok = matches!(
                s0.confirmation_status,
                Some(
                    TransactionConfirmationStatus::Confirmed
                        | TransactionConfirmationStatus::Finalized
                )
            ) || s0.confirmations.is_none();

            if ok {
                return Ok(());
            }
        }

        std::thread::sleep(Duration::from_millis(backoff_ms));
        backoff_ms = (backoff_ms.saturating_mul(2)).min(2_000);
    }
}

/// Fetch the execution log of a landed transaction.
///
/// Errors from encrypted-state programs do not carry structured payloads;
/// the log is the only diagnostic signal, so it is returned verbatim.
pub fn fetch_transaction_logs(rpc: &RpcClient, sig: &Signature) -> ClientResult<Vec<String>> {
    let tx = rpc
        .get_transaction_with_config(
            sig,
            RpcTransactionConfig {
                encoding: Some(UiTransactionEncoding::Json),
                commitment: Some(CommitmentConfig::confirmed()),
                max_supported_transaction_version: Some(0),
            },
        )
        .map_err(|e| ClientError::Rpc(format!("get_transaction failed: {e}")))?;
    let logs = tx
        .transaction
        .meta
        .and_then(|m| Option::<Vec<String>>::from(m.log_messages))
        .unwrap_or_default();
    Ok(logs)
}

/// Sign `ix` against a disposable recent blockhash, simulate without
/// broadcasting, and return the watched accounts' post-simulation bytes.
///
/// `None` entries are accounts the simulation did not materialize.
pub fn simulate_with_account_capture(
    rpc: &RpcClient,
    payer: &Keypair,
    ix: Instruction,
    watched: &[Pubkey],
) -> ClientResult<Vec<Option<Vec<u8>>>> {
    let bh = rpc
        .get_latest_blockhash()
        .map_err(|e| ClientError::Rpc(format!("blockhash failed: {e}")))?;
    let tx = Transaction::new_signed_with_payer(&[ix], Some(&payer.pubkey()), &[payer], bh);

    let sim = rpc
        .simulate_transaction_with_config(
            &tx,
            RpcSimulateTransactionConfig {
                sig_verify: true,
                commitment: Some(CommitmentConfig::confirmed()),
                accounts: Some(RpcSimulateTransactionAccountsConfig {
                    encoding: Some(UiAccountEncoding::Base64),
                    addresses: watched.iter().map(|k| k.to_string()).collect(),
                }),
                ..RpcSimulateTransactionConfig::default()
            },
        )
        .map_err(|e| ClientError::Rpc(format!("simulate failed: {e}")))?;

    if let Some(err) = sim.value.err {
        let logs = sim.value.logs.unwrap_or_default();
        tracing::warn!(?err, "probe simulation failed");
        return Err(ClientError::Rpc(format!(
            "probe simulation failed: {err:?}; logs: {logs:?}"
        )));
    }

    let accounts = sim.value.accounts.unwrap_or_default();
    let mut out = Vec::with_capacity(accounts.len());
    for acc in accounts {
        let Some(acc) = acc else {
            out.push(None);
            continue;
        };
        match acc.data {
            UiAccountData::Binary(b64, UiAccountEncoding::Base64) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(b64.as_bytes())
                    .map_err(|e| ClientError::Rpc(format!("account data decode failed: {e}")))?;
                out.push(Some(bytes));
            }
            _ => {
                return Err(ClientError::Rpc(
                    "unexpected account encoding in simulation result".into(),
                ))
            }
        }
    }
    Ok(out)
}
