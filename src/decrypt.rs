//! Attested decryption-service client + bounded retry.
//!
//! The service's visibility of a handle lags ledger commitment by an
//! unbounded but empirically bounded interval: a request issued too early
//! returns a retryable "not yet indexed" error, distinguishable from
//! terminal ones. The retry loop degrades exhaustion to a typed sentinel
//! instead of an error, so verification code asserts against a known
//! outcome rather than handling an exception. Decryption is a verification
//! step, not a correctness precondition of the swap.
//!
//! Delays come from an explicit backoff policy driven by an injectable
//! clock, so tests run without real elapsed time.

use serde::Serialize;
use serde_json::Value;
use solana_sdk::signature::Signer;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::parse::{lenient_bool, lenient_u128};
use crate::types::Handle;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Service-level failure, split by retryability.
#[derive(Debug)]
pub enum DecryptError {
    /// The handle has not propagated to the service yet; retry later.
    NotYetIndexed(String),
    /// Anything else: malformed request, rejected signature, service bug.
    Terminal(String),
}

/// One reveal round-trip. Abstracted so the retry loop is testable against
/// a scripted service.
pub trait DecryptionService {
    /// Request plaintexts for `handles`, in order, authenticating with the
    /// caller-provided signing capability.
    fn reveal(&self, handles: &[Handle], signer: &dyn Signer) -> Result<Vec<u128>, DecryptError>;
}

pub struct AttestedDecryptClient {
    http: reqwest::blocking::Client,
    base: String,
}

#[derive(Serialize)]
struct RevealRequest {
    handles: Vec<String>,
    requester: String,
    signature: String,
}

impl AttestedDecryptClient {
    pub fn new(base: &str) -> ClientResult<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Decrypt(format!("http client init failed: {e}")))?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// Canonical signing payload. The service recomputes this exact string;
    /// any drift invalidates the signature.
    fn signing_message(handles: &[Handle]) -> String {
        let parts: Vec<String> = handles
            .iter()
            .map(|h| hex::encode(h.to_le_bytes()))
            .collect();
        format!("reveal:v1:{}", parts.join(","))
    }
}

impl DecryptionService for AttestedDecryptClient {
    fn reveal(&self, handles: &[Handle], signer: &dyn Signer) -> Result<Vec<u128>, DecryptError> {
        let message = Self::signing_message(handles);
        let signature = signer
            .try_sign_message(message.as_bytes())
            .map_err(|e| DecryptError::Terminal(format!("signing failed: {e}")))?;

        let body = RevealRequest {
            handles: handles
                .iter()
                .map(|h| format!("0x{}", hex::encode(h.to_le_bytes())))
                .collect(),
            requester: signer.pubkey().to_string(),
            signature: signature.to_string(),
        };

        let resp = self
            .http
            .post(format!("{}/reveal", self.base))
            .json(&body)
            .send()
            .map_err(|e| DecryptError::Terminal(format!("reveal request failed: {e}")))?;

        let status = resp.status();
        let payload: Value = resp.json().unwrap_or(Value::Null);

        if status.as_u16() == 404 {
            return Err(DecryptError::NotYetIndexed(format!(
                "handle not yet indexed: {payload}"
            )));
        }
        if !status.is_success() {
            // Some service versions signal retryability in the body instead
            // of the status code.
            let retryable = payload
                .get("retryable")
                .and_then(lenient_bool)
                .unwrap_or(false);
            let msg = format!("reveal failed ({status}): {payload}");
            return if retryable {
                Err(DecryptError::NotYetIndexed(msg))
            } else {
                Err(DecryptError::Terminal(msg))
            };
        }

        let plaintexts = payload
            .get("plaintexts")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                DecryptError::Terminal(format!("reveal response missing plaintexts: {payload}"))
            })?;
        if plaintexts.len() != handles.len() {
            return Err(DecryptError::Terminal(format!(
                "reveal returned {} plaintexts for {} handles",
                plaintexts.len(),
                handles.len()
            )));
        }
        plaintexts
            .iter()
            .map(|v| {
                lenient_u128(v).ok_or_else(|| {
                    DecryptError::Terminal(format!("unparseable plaintext in response: {v}"))
                })
            })
            .collect()
    }
}

/// Retry schedule: `base + attempt * increment`, at most `max_attempts`
/// requests.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub increment: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base + self.increment * attempt
    }
}

/// Injectable time source for the retry loop.
pub trait Clock {
    fn sleep(&self, d: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Result of a bounded decrypt: either the plaintext or the exhaustion
/// sentinel. Exhaustion is an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptOutcome {
    Revealed(u128),
    Exhausted,
}

/// Decrypt one settled handle, retrying "not yet indexed" responses with
/// increasing delay. Terminal errors abort immediately; exhausting the
/// budget returns `Exhausted` rather than raising.
pub fn decrypt_with_retry(
    service: &impl DecryptionService,
    signer: &dyn Signer,
    handle: Handle,
    policy: &BackoffPolicy,
    clock: &impl Clock,
) -> ClientResult<DecryptOutcome> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        match service.reveal(&[handle], signer) {
            Ok(plaintexts) => {
                let value = plaintexts.first().copied().ok_or_else(|| {
                    ClientError::Decrypt("service returned empty plaintext list".into())
                })?;
                return Ok(DecryptOutcome::Revealed(value));
            }
            Err(DecryptError::NotYetIndexed(msg)) => {
                if attempt + 1 == attempts {
                    tracing::warn!(%handle, attempts, "decrypt retry budget exhausted");
                    return Ok(DecryptOutcome::Exhausted);
                }
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(%handle, attempt, ?delay, msg, "handle not indexed yet; retrying");
                clock.sleep(delay);
            }
            Err(DecryptError::Terminal(msg)) => {
                return Err(ClientError::Decrypt(msg));
            }
        }
    }
    Ok(DecryptOutcome::Exhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::Keypair;
    use std::cell::RefCell;

    /// Fails with a retryable error `failures` times, then reveals `value`.
    struct FlakyService {
        failures: u32,
        value: u128,
        calls: RefCell<u32>,
    }

    impl DecryptionService for FlakyService {
        fn reveal(&self, handles: &[Handle], _: &dyn Signer) -> Result<Vec<u128>, DecryptError> {
            let mut calls = self.calls.borrow_mut();
            *calls += 1;
            if *calls <= self.failures {
                return Err(DecryptError::NotYetIndexed("lagging".into()));
            }
            Ok(vec![self.value; handles.len()])
        }
    }

    struct TestClock {
        slept: RefCell<Vec<Duration>>,
    }

    impl TestClock {
        fn new() -> Self {
            Self {
                slept: RefCell::new(Vec::new()),
            }
        }
    }

    impl Clock for TestClock {
        fn sleep(&self, d: Duration) {
            self.slept.borrow_mut().push(d);
        }
    }

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(100),
            increment: Duration::from_millis(50),
            max_attempts,
        }
    }

    #[test]
    fn succeeds_within_n_plus_one_attempts() {
        let svc = FlakyService {
            failures: 3,
            value: 777,
            calls: RefCell::new(0),
        };
        let clock = TestClock::new();
        let signer = Keypair::new();
        let out = decrypt_with_retry(&svc, &signer, Handle(1), &policy(10), &clock).unwrap();
        assert_eq!(out, DecryptOutcome::Revealed(777));
        assert_eq!(*svc.calls.borrow(), 4);
        // Linear backoff: base, base+inc, base+2*inc.
        assert_eq!(
            *clock.slept.borrow(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(150),
                Duration::from_millis(200),
            ]
        );
    }

    #[test]
    fn always_retryable_exhausts_to_sentinel_without_raising() {
        let svc = FlakyService {
            failures: u32::MAX,
            value: 0,
            calls: RefCell::new(0),
        };
        let clock = TestClock::new();
        let signer = Keypair::new();
        let out = decrypt_with_retry(&svc, &signer, Handle(2), &policy(5), &clock).unwrap();
        assert_eq!(out, DecryptOutcome::Exhausted);
        assert_eq!(*svc.calls.borrow(), 5);
        // No sleep after the final attempt.
        assert_eq!(clock.slept.borrow().len(), 4);
    }

    #[test]
    fn terminal_error_aborts_immediately() {
        struct Broken;
        impl DecryptionService for Broken {
            fn reveal(&self, _: &[Handle], _: &dyn Signer) -> Result<Vec<u128>, DecryptError> {
                Err(DecryptError::Terminal("signature rejected".into()))
            }
        }
        let clock = TestClock::new();
        let signer = Keypair::new();
        let err = decrypt_with_retry(&Broken, &signer, Handle(3), &policy(5), &clock).unwrap_err();
        assert!(matches!(err, ClientError::Decrypt(_)));
        assert!(clock.slept.borrow().is_empty());
    }

    #[test]
    fn signing_message_is_stable() {
        let msg = AttestedDecryptClient::signing_message(&[Handle(1), Handle(2)]);
        assert_eq!(
            msg,
            format!(
                "reveal:v1:{},{}",
                hex::encode(1u128.to_le_bytes()),
                hex::encode(2u128.to_le_bytes())
            )
        );
    }
}
