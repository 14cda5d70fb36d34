//! Validity-proof resolution with endpoint fallback.
//!
//! The indexer's proof endpoints are not mutually consistent: the batched
//! endpoint's `rootIndex` of `0` can mean either "valid root zero" or "not
//! resolved" depending on indexer version, and the per-account endpoints
//! each have their own response shape. The resolver treats `0` as the
//! unresolved sentinel everywhere, walks a strict fallback chain until some
//! endpoint yields a non-sentinel root index or an explicit prove-by-index
//! flag, then merges fields across everything it collected.
//!
//! Which fallbacks are still reachable on current indexer versions is
//! unknown; the full chain is the safe baseline.

use serde_json::Value;

use crate::error::{ClientError, ClientResult};
use crate::indexer::{NewAddress, ProofEndpoints};
use crate::parse::{lenient_bool, lenient_bytes, lenient_u32};
use crate::types::{CompressedProof, ValidityProof};

/// What we are proving: an existing record (by hash) or a not-yet-created
/// address.
#[derive(Debug, Clone)]
pub enum ProofTarget {
    Existing { hash: [u8; 32] },
    NewAddress(NewAddress),
}

/// Endpoint a candidate came from. Field-level merge precedence is fixed:
/// per-account > batch > multi > legacy > tree default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProofSource {
    PerAccount,
    Batch,
    Multi,
    Legacy,
}

const MERGE_PRECEDENCE: [ProofSource; 4] = [
    ProofSource::PerAccount,
    ProofSource::Batch,
    ProofSource::Multi,
    ProofSource::Legacy,
];

#[derive(Debug, Clone)]
struct ProofCandidate {
    source: ProofSource,
    proof: Option<CompressedProof>,
    /// `None` means unresolved: the sentinel `0` maps to `None` here.
    root_index: Option<u32>,
    prove_by_index: Option<bool>,
}

impl ProofCandidate {
    fn is_resolved(&self) -> bool {
        self.root_index.is_some() || self.prove_by_index == Some(true)
    }
}

/// Resolve a validity proof for `target`.
///
/// `tree_default_root_index` is the root index advertised by tree metadata,
/// used only when every endpoint left the field unresolved (a legitimately
/// zero root lands here). Fails with `ProofUnavailable` when no endpoint
/// yields a usable proof or prove-by-index flag; callers must not proceed
/// to submission in that case.
pub fn resolve_validity_proof(
    endpoints: &impl ProofEndpoints,
    api_version: u8,
    target: &ProofTarget,
    tree_default_root_index: Option<u32>,
) -> ClientResult<ValidityProof> {
    let mut candidates: Vec<ProofCandidate> = Vec::new();

    let attempt = |source: ProofSource, candidates: &mut Vec<ProofCandidate>| -> bool {
        let response = match call_endpoint(endpoints, source, target) {
            Some(Ok(v)) => v,
            Some(Err(e)) => {
                tracing::warn!(?source, error = %e, "proof endpoint failed; continuing chain");
                return false;
            }
            // Endpoint not applicable to this target (hash-based endpoint,
            // new-address target).
            None => return false,
        };
        let candidate = parse_candidate(source, &response);
        let resolved = candidate.is_resolved();
        candidates.push(candidate);
        resolved
    };

    // v1 indexers do not serve the batched endpoint at all.
    let chain: &[ProofSource] = if api_version >= 2 {
        &[
            ProofSource::Batch,
            ProofSource::Multi,
            ProofSource::PerAccount,
            ProofSource::Legacy,
        ]
    } else {
        &[ProofSource::PerAccount, ProofSource::Legacy]
    };

    for (i, source) in chain.iter().enumerate() {
        let resolved = attempt(*source, &mut candidates);
        if resolved {
            break;
        }
        if i == 0 {
            tracing::debug!(
                ?source,
                "primary proof response unresolved; walking fallback chain"
            );
        }
    }

    merge_candidates(&candidates, tree_default_root_index)
}

fn call_endpoint(
    endpoints: &impl ProofEndpoints,
    source: ProofSource,
    target: &ProofTarget,
) -> Option<ClientResult<Value>> {
    match (source, target) {
        (ProofSource::Batch, ProofTarget::Existing { hash }) => {
            Some(endpoints.batch_proof(std::slice::from_ref(hash), &[]))
        }
        (ProofSource::Batch, ProofTarget::NewAddress(addr)) => {
            Some(endpoints.batch_proof(&[], std::slice::from_ref(addr)))
        }
        // The hash-based endpoints cannot prove a not-yet-created address.
        (_, ProofTarget::NewAddress(_)) => None,
        (ProofSource::Multi, ProofTarget::Existing { hash }) => {
            Some(endpoints.multi_proof(std::slice::from_ref(hash)))
        }
        (ProofSource::PerAccount, ProofTarget::Existing { hash }) => {
            Some(endpoints.account_proof(hash))
        }
        (ProofSource::Legacy, ProofTarget::Existing { hash }) => Some(endpoints.legacy_proof(hash)),
    }
}

fn parse_candidate(source: ProofSource, response: &Value) -> ProofCandidate {
    // Multi-account responses are arrays (sometimes wrapped in `items`);
    // we requested a single hash, so the first entry is ours.
    let v: &Value = response
        .get("items")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .or_else(|| response.as_array().and_then(|a| a.first()))
        .unwrap_or(response);

    ProofCandidate {
        source,
        proof: extract_proof(v),
        root_index: extract_root_index(v),
        prove_by_index: extract_prove_by_index(v),
    }
}

fn extract_root_index(v: &Value) -> Option<u32> {
    let raw = v
        .get("rootIndices")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .or_else(|| v.get("rootIndex"))
        .or_else(|| v.get("root_index"))
        .or_else(|| v.get("rootSeq"))
        .and_then(lenient_u32)?;
    // `0` is the unresolved sentinel across all endpoints; a legitimately
    // zero root only ever arrives via the tree default.
    if raw == 0 {
        None
    } else {
        Some(raw)
    }
}

fn extract_prove_by_index(v: &Value) -> Option<bool> {
    v.get("proveByIndices")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .or_else(|| v.get("proveByIndex"))
        .or_else(|| v.get("prove_by_index"))
        .and_then(lenient_bool)
}

fn extract_proof(v: &Value) -> Option<CompressedProof> {
    let p = v.get("compressedProof").or_else(|| v.get("proof"))?;
    if p.is_null() {
        return None;
    }
    Some(CompressedProof {
        a: lenient_bytes::<32>(p.get("a")?)?,
        b: lenient_bytes::<64>(p.get("b")?)?,
        c: lenient_bytes::<32>(p.get("c")?)?,
    })
}

fn first_by_precedence<'a>(
    candidates: &'a [ProofCandidate],
    pick: impl Fn(&ProofCandidate) -> bool,
) -> Option<&'a ProofCandidate> {
    MERGE_PRECEDENCE.iter().find_map(|source| {
        candidates
            .iter()
            .find(|c| c.source == *source && pick(c))
    })
}

fn merge_candidates(
    candidates: &[ProofCandidate],
    tree_default_root_index: Option<u32>,
) -> ClientResult<ValidityProof> {
    let proof = first_by_precedence(candidates, |c| c.proof.is_some())
        .and_then(|c| c.proof.clone());
    let root_index = first_by_precedence(candidates, |c| c.root_index.is_some())
        .and_then(|c| c.root_index)
        .or(tree_default_root_index)
        .unwrap_or(0);
    let prove_by_index = first_by_precedence(candidates, |c| c.prove_by_index.is_some())
        .and_then(|c| c.prove_by_index)
        .unwrap_or(false);

    if prove_by_index {
        // Exactly one authorization mechanism: prove-by-index wins and any
        // proof points collected along the way are discarded.
        return Ok(ValidityProof {
            proof: None,
            root_index,
            prove_by_index: true,
        });
    }
    let Some(proof) = proof else {
        return Err(ClientError::ProofUnavailable(format!(
            "no endpoint yielded a proof or prove-by-index flag ({} responses collected)",
            candidates.len()
        )));
    };
    Ok(ValidityProof {
        proof: Some(proof),
        root_index,
        prove_by_index: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    fn proof_json() -> Value {
        json!({
            "a": vec![1u8; 32],
            "b": vec![2u8; 64],
            "c": vec![3u8; 32],
        })
    }

    /// Scripted endpoints that record which were hit.
    #[derive(Default)]
    struct Scripted {
        batch: Option<Value>,
        multi: Option<Value>,
        account: Option<Value>,
        legacy: Option<Value>,
        calls: RefCell<Vec<&'static str>>,
    }

    impl Scripted {
        fn respond(&self, name: &'static str, v: &Option<Value>) -> ClientResult<Value> {
            self.calls.borrow_mut().push(name);
            v.clone()
                .ok_or_else(|| ClientError::Indexer(format!("{name} down")))
        }
    }

    impl ProofEndpoints for Scripted {
        fn batch_proof(&self, _: &[[u8; 32]], _: &[NewAddress]) -> ClientResult<Value> {
            self.respond("batch", &self.batch)
        }
        fn multi_proof(&self, _: &[[u8; 32]]) -> ClientResult<Value> {
            self.respond("multi", &self.multi)
        }
        fn account_proof(&self, _: &[u8; 32]) -> ClientResult<Value> {
            self.respond("account", &self.account)
        }
        fn legacy_proof(&self, _: &[u8; 32]) -> ClientResult<Value> {
            self.respond("legacy", &self.legacy)
        }
    }

    fn existing() -> ProofTarget {
        ProofTarget::Existing { hash: [7u8; 32] }
    }

    #[test]
    fn sentinel_zero_falls_back_and_stops_at_first_resolved() {
        let ep = Scripted {
            batch: Some(json!({ "compressedProof": proof_json(), "rootIndices": [0] })),
            multi: Some(json!([{ "rootIndex": 7 }])),
            account: Some(json!({ "rootIndex": 99 })),
            legacy: Some(json!({ "rootIndex": 100 })),
            ..Scripted::default()
        };
        let proof = resolve_validity_proof(&ep, 2, &existing(), None).unwrap();
        assert_eq!(proof.root_index, 7);
        assert!(!proof.prove_by_index);
        assert!(proof.proof.is_some()); // merged from the batch response
        // The chain stopped at the first resolved fallback.
        assert_eq!(*ep.calls.borrow(), vec!["batch", "multi"]);
    }

    #[test]
    fn resolved_primary_queries_nothing_else() {
        let ep = Scripted {
            batch: Some(json!({ "compressedProof": proof_json(), "rootIndices": ["12"] })),
            ..Scripted::default()
        };
        let proof = resolve_validity_proof(&ep, 2, &existing(), None).unwrap();
        assert_eq!(proof.root_index, 12);
        assert_eq!(*ep.calls.borrow(), vec!["batch"]);
    }

    #[test]
    fn prove_by_index_discards_proof_points() {
        let ep = Scripted {
            batch: Some(json!({
                "compressedProof": proof_json(),
                "rootIndices": [0],
                "proveByIndices": ["true"],
            })),
            ..Scripted::default()
        };
        let proof = resolve_validity_proof(&ep, 2, &existing(), None).unwrap();
        assert!(proof.prove_by_index);
        assert!(proof.proof.is_none());
        assert_eq!(*ep.calls.borrow(), vec!["batch"]);
    }

    #[test]
    fn endpoint_failures_continue_the_chain() {
        let ep = Scripted {
            batch: None, // transport error
            multi: None,
            account: Some(json!({ "compressedProof": proof_json(), "rootIndex": {"_bn": "3"} })),
            ..Scripted::default()
        };
        let proof = resolve_validity_proof(&ep, 2, &existing(), None).unwrap();
        assert_eq!(proof.root_index, 3);
        assert_eq!(*ep.calls.borrow(), vec!["batch", "multi", "account"]);
    }

    #[test]
    fn per_account_wins_field_merge_over_legacy() {
        // Per-account resolves nothing but carries a proof; legacy resolves
        // the root. Precedence: per-account proof wins, legacy root is the
        // only root available.
        let ep = Scripted {
            batch: Some(json!({ "rootIndices": [0] })),
            multi: Some(json!([{}])),
            account: Some(json!({ "compressedProof": proof_json() })),
            legacy: Some(json!({ "rootIndex": 44 })),
            ..Scripted::default()
        };
        let proof = resolve_validity_proof(&ep, 2, &existing(), None).unwrap();
        assert_eq!(proof.root_index, 44);
        assert_eq!(proof.proof.as_ref().unwrap().a, [1u8; 32]);
    }

    #[test]
    fn all_sentinel_uses_tree_default() {
        let ep = Scripted {
            batch: Some(json!({ "compressedProof": proof_json(), "rootIndices": [0] })),
            multi: Some(json!([{ "rootIndex": 0 }])),
            account: Some(json!({ "rootIndex": "0" })),
            legacy: Some(json!({})),
            ..Scripted::default()
        };
        let proof = resolve_validity_proof(&ep, 2, &existing(), Some(0)).unwrap();
        assert_eq!(proof.root_index, 0); // legitimately zero, via tree default
        assert!(proof.proof.is_some());
    }

    #[test]
    fn nothing_usable_is_proof_unavailable() {
        let ep = Scripted::default(); // every endpoint down
        let err = resolve_validity_proof(&ep, 2, &existing(), Some(5)).unwrap_err();
        assert!(matches!(err, ClientError::ProofUnavailable(_)));
    }

    #[test]
    fn v1_skips_batched_endpoint() {
        let ep = Scripted {
            account: Some(json!({ "compressedProof": proof_json(), "rootIndex": 2 })),
            ..Scripted::default()
        };
        let proof = resolve_validity_proof(&ep, 1, &existing(), None).unwrap();
        assert_eq!(proof.root_index, 2);
        assert_eq!(*ep.calls.borrow(), vec!["account"]);
    }

    #[test]
    fn new_address_only_consults_batch() {
        let ep = Scripted {
            batch: Some(json!({ "compressedProof": proof_json(), "rootIndices": [0] })),
            multi: Some(json!([{ "rootIndex": 9 }])),
            ..Scripted::default()
        };
        let target = ProofTarget::NewAddress(NewAddress {
            address: [1u8; 32],
            tree: solana_sdk::pubkey::Pubkey::new_unique(),
        });
        let proof = resolve_validity_proof(&ep, 2, &target, Some(6)).unwrap();
        assert_eq!(proof.root_index, 6);
        assert_eq!(*ep.calls.borrow(), vec!["batch"]);
    }
}
