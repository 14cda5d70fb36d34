//! Offline pipeline tests: everything between "quote computed" and "bytes on
//! the wire" without a ledger, indexer, or decryption service. Network-free
//! stand-ins implement the same traits the live clients do.

use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::cell::RefCell;
use std::time::Duration;

use swap_client::accounts::{AccountRole, PackedAccounts};
use swap_client::allowance::derive_allowance_pda;
use swap_client::decrypt::{
    decrypt_with_retry, BackoffPolicy, Clock, DecryptError, DecryptOutcome, DecryptionService,
};
use swap_client::engine::quote_exact_in;
use swap_client::error::ClientError;
use swap_client::handle::{
    encode_handle_at_offset, extract_handle_from_raw, HANDLE_LEN, HANDLE_OFFSET,
};
use swap_client::indexer::{NewAddress, ProofEndpoints};
use swap_client::proof::{resolve_validity_proof, ProofTarget};
use swap_client::solana::{
    build_swap_exact_in, pubkey_const, SwapExactInArgs, DECRYPTION_ORACLE_PROGRAM_ID,
    SWAP_PROGRAM_ID,
};
use swap_client::types::{
    CompressedAccountMeta, CompressedProof, Handle, PackedStateTreeInfo, ValidityProof,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .try_init();
}

// ---------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------

#[test]
fn end_to_end_quote_scenario() {
    init_tracing();
    // 1 unit in, reserves (1000, 100) in base units, 30 bps fee.
    let q = quote_exact_in(1_000_000_000, 1_000_000_000_000, 100_000_000_000, 30).unwrap();
    assert_eq!(q.fee_amount, 3_000_000);
    let net = 997_000_000u128;
    let expect = (100_000_000_000u128 * net / (1_000_000_000_000u128 + net)) as u64;
    assert_eq!(q.amount_out, expect);
}

// ---------------------------------------------------------------------
// Proof fallback chain
// ---------------------------------------------------------------------

#[derive(Default)]
struct ScriptedEndpoints {
    batch: Option<Value>,
    multi: Option<Value>,
    account: Option<Value>,
    legacy: Option<Value>,
    calls: RefCell<Vec<&'static str>>,
}

impl ScriptedEndpoints {
    fn respond(&self, name: &'static str, v: &Option<Value>) -> Result<Value, ClientError> {
        self.calls.borrow_mut().push(name);
        v.clone()
            .ok_or_else(|| ClientError::Indexer(format!("{name} unavailable")))
    }
}

impl ProofEndpoints for ScriptedEndpoints {
    fn batch_proof(&self, _: &[[u8; 32]], _: &[NewAddress]) -> Result<Value, ClientError> {
        self.respond("batch", &self.batch)
    }
    fn multi_proof(&self, _: &[[u8; 32]]) -> Result<Value, ClientError> {
        self.respond("multi", &self.multi)
    }
    fn account_proof(&self, _: &[u8; 32]) -> Result<Value, ClientError> {
        self.respond("account", &self.account)
    }
    fn legacy_proof(&self, _: &[u8; 32]) -> Result<Value, ClientError> {
        self.respond("legacy", &self.legacy)
    }
}

fn proof_points() -> Value {
    json!({ "a": vec![1u8; 32], "b": vec![2u8; 64], "c": vec![3u8; 32] })
}

#[test]
fn sentinel_primary_takes_first_fallback_and_stops() {
    init_tracing();
    let ep = ScriptedEndpoints {
        batch: Some(json!({ "compressedProof": proof_points(), "rootIndices": [0] })),
        multi: Some(json!([{ "rootIndex": 7 }])),
        account: Some(json!({ "rootIndex": 1000 })),
        legacy: Some(json!({ "rootIndex": 2000 })),
        ..ScriptedEndpoints::default()
    };
    let target = ProofTarget::Existing { hash: [9u8; 32] };
    let proof = resolve_validity_proof(&ep, 2, &target, None).unwrap();
    assert_eq!(proof.root_index, 7);
    assert_eq!(*ep.calls.borrow(), vec!["batch", "multi"]);
}

#[test]
fn mixed_field_encodings_resolve_through_one_parser() {
    // Root index as bigint wrapper, prove-by-index as stringified boolean:
    // the endpoints disagree on encodings and the resolver does not care.
    let ep = ScriptedEndpoints {
        batch: Some(json!({
            "compressedProof": proof_points(),
            "rootIndices": [{"_bn": "0"}],
        })),
        multi: Some(json!([{ "proveByIndex": "true" }])),
        ..ScriptedEndpoints::default()
    };
    let target = ProofTarget::Existing { hash: [9u8; 32] };
    let proof = resolve_validity_proof(&ep, 2, &target, None).unwrap();
    assert!(proof.prove_by_index);
    assert!(proof.proof.is_none());
    assert_eq!(*ep.calls.borrow(), vec!["batch", "multi"]);
}

#[test]
fn exhausted_chain_is_proof_unavailable() {
    let ep = ScriptedEndpoints {
        batch: Some(json!({ "rootIndices": [0] })),
        multi: Some(json!([{}])),
        account: Some(json!({})),
        legacy: Some(json!({})),
        ..ScriptedEndpoints::default()
    };
    let target = ProofTarget::Existing { hash: [9u8; 32] };
    let err = resolve_validity_proof(&ep, 2, &target, None).unwrap_err();
    assert!(matches!(err, ClientError::ProofUnavailable(_)));
    assert_eq!(
        *ep.calls.borrow(),
        vec!["batch", "multi", "account", "legacy"]
    );
}

// ---------------------------------------------------------------------
// Handle extraction + allowance + packing + instruction bytes
// ---------------------------------------------------------------------

#[test]
fn handle_round_trips_at_boundary_values() {
    for v in [0u128, 1, u128::MAX] {
        let mut record = vec![0u8; HANDLE_OFFSET + HANDLE_LEN];
        encode_handle_at_offset(Handle(v), &mut record).unwrap();
        assert_eq!(extract_handle_from_raw(&record).unwrap(), Handle(v));
    }
}

#[test]
fn packer_indices_are_dense_and_stable() {
    let mut packed = PackedAccounts::new();
    let keys: Vec<Pubkey> = (0..8).map(|_| Pubkey::new_unique()).collect();
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(packed.insert_or_get(AccountRole::StateTree, *k), i as u8);
    }
    for (i, k) in keys.iter().enumerate() {
        assert_eq!(packed.insert_or_get(AccountRole::StateTree, *k), i as u8);
    }
    assert_eq!(packed.len(), keys.len());
}

/// The offline slice of the real flow: a simulated post-state record yields
/// the output handle, the handle and grantee derive the allowance, both land
/// in the packed table, and the final instruction carries the ciphertexts
/// with the table flattened in role order.
#[test]
fn probe_to_instruction_pipeline() {
    let payer = Keypair::new();
    let permission_program = pubkey_const(DECRYPTION_ORACLE_PROGRAM_ID);
    let swap_program = pubkey_const(SWAP_PROGRAM_ID);

    // Post-simulation bytes of the output balance record.
    let fresh_handle = Handle(0x1122_3344_5566_7788_99AA_BBCC_DDEE_FF00);
    let mut record = vec![0u8; 128];
    encode_handle_at_offset(fresh_handle, &mut record).unwrap();
    let discovered = extract_handle_from_raw(&record).unwrap();
    assert_eq!(discovered, fresh_handle);

    let (allowance, _bump) =
        derive_allowance_pda(discovered, &payer.pubkey(), &permission_program);
    // Same inputs, same address; different grantee, different address.
    assert_eq!(
        allowance,
        derive_allowance_pda(discovered, &payer.pubkey(), &permission_program).0
    );
    assert_ne!(
        allowance,
        derive_allowance_pda(discovered, &Pubkey::new_unique(), &permission_program).0
    );

    let tree = Pubkey::new_unique();
    let queue = Pubkey::new_unique();
    let pool_authority = Pubkey::new_unique();
    let output_balance = Pubkey::new_unique();

    let mut packed = PackedAccounts::new();
    let tree_index = packed.insert_or_get(AccountRole::StateTree, tree);
    let queue_index = packed.insert_or_get(AccountRole::OutputQueue, queue);
    packed.insert_or_get_readonly(AccountRole::PoolAuthority, pool_authority);
    packed.insert_or_get(AccountRole::OutputBalance, output_balance);
    packed.insert_or_get(AccountRole::Allowance, allowance);

    let proof = ValidityProof {
        proof: Some(CompressedProof {
            a: [4u8; 32],
            b: [5u8; 64],
            c: [6u8; 32],
        }),
        root_index: 42,
        prove_by_index: false,
    };
    let pool_meta = CompressedAccountMeta {
        tree_info: PackedStateTreeInfo {
            root_index: 42,
            prove_by_index: false,
            merkle_tree_pubkey_index: tree_index,
            queue_pubkey_index: queue_index,
            leaf_index: 3,
        },
        address: Some([8u8; 32]),
        output_state_tree_index: tree_index,
    };
    let amount_in_ct = vec![0xA1; 48];
    let amount_out_ct = vec![0xB2; 48];
    let fee_ct = vec![0xC3; 48];
    let ix = build_swap_exact_in(
        swap_program,
        permission_program,
        payer.pubkey(),
        &SwapExactInArgs {
            proof: &proof,
            pool_meta: &pool_meta,
            pool_data: &[0u8; 32],
            amount_in_ciphertext: &amount_in_ct,
            amount_out_ciphertext: &amount_out_ct,
            fee_amount_ciphertext: &fee_ct,
            input_type: 1,
            a_to_b: false,
        },
        packed.to_account_metas().unwrap(),
    )
    .unwrap();

    // Static accounts first, then the packed table in insertion order.
    assert_eq!(ix.accounts[0].pubkey, payer.pubkey());
    assert!(ix.accounts[0].is_signer);
    assert_eq!(ix.accounts[1].pubkey, permission_program);
    assert_eq!(ix.accounts[2].pubkey, tree);
    assert_eq!(ix.accounts[3].pubkey, queue);
    assert_eq!(ix.accounts[4].pubkey, pool_authority);
    assert_eq!(ix.accounts[5].pubkey, output_balance);
    assert_eq!(ix.accounts[6].pubkey, allowance);
    assert!(ix.accounts[6].is_writable);

    // The ciphertexts ride in the data, length-prefixed, in argument order.
    let data = &ix.data;
    let pos_in = find_subslice(data, &amount_in_ct).expect("amount_in ciphertext embedded");
    let pos_out = find_subslice(data, &amount_out_ct).expect("amount_out ciphertext embedded");
    let pos_fee = find_subslice(data, &fee_ct).expect("fee ciphertext embedded");
    assert!(pos_in < pos_out && pos_out < pos_fee);
    assert_eq!(&data[pos_in - 4..pos_in], &48u32.to_le_bytes());
    // Trailing args: input_type, a_to_b.
    assert_eq!(&data[data.len() - 2..], &[1u8, 0u8]);
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
}

// ---------------------------------------------------------------------
// Decrypt retry policy
// ---------------------------------------------------------------------

struct LaggingService {
    failures_before_success: u32,
    plaintext: u128,
    calls: RefCell<u32>,
}

impl DecryptionService for LaggingService {
    fn reveal(&self, handles: &[Handle], _: &dyn Signer) -> Result<Vec<u128>, DecryptError> {
        let mut calls = self.calls.borrow_mut();
        *calls += 1;
        if *calls <= self.failures_before_success {
            Err(DecryptError::NotYetIndexed("not yet indexed".into()))
        } else {
            Ok(vec![self.plaintext; handles.len()])
        }
    }
}

struct RecordingClock(RefCell<Vec<Duration>>);

impl Clock for RecordingClock {
    fn sleep(&self, d: Duration) {
        self.0.borrow_mut().push(d);
    }
}

#[test]
fn decrypt_completes_within_n_plus_one_attempts() {
    for n in [0u32, 1, 4] {
        let svc = LaggingService {
            failures_before_success: n,
            plaintext: 424_242,
            calls: RefCell::new(0),
        };
        let clock = RecordingClock(RefCell::new(Vec::new()));
        let policy = BackoffPolicy {
            base: Duration::from_millis(5),
            increment: Duration::from_millis(1),
            max_attempts: 8,
        };
        let signer = Keypair::new();
        let out = decrypt_with_retry(&svc, &signer, Handle(7), &policy, &clock).unwrap();
        assert_eq!(out, DecryptOutcome::Revealed(424_242));
        assert_eq!(*svc.calls.borrow(), n + 1);
    }
}

#[test]
fn decrypt_exhaustion_is_a_sentinel_never_a_panic_or_error() {
    let svc = LaggingService {
        failures_before_success: u32::MAX,
        plaintext: 0,
        calls: RefCell::new(0),
    };
    let clock = RecordingClock(RefCell::new(Vec::new()));
    let policy = BackoffPolicy {
        base: Duration::from_millis(5),
        increment: Duration::from_millis(5),
        max_attempts: 4,
    };
    let signer = Keypair::new();
    let out = decrypt_with_retry(&svc, &signer, Handle(8), &policy, &clock).unwrap();
    assert_eq!(out, DecryptOutcome::Exhausted);
    assert_eq!(*svc.calls.borrow(), 4);
    // Delays grew linearly and the final attempt did not sleep.
    assert_eq!(
        *clock.0.borrow(),
        vec![
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(15),
        ]
    );
}
