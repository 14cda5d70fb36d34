use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("bad request: {0}")]
    BadRequest(String),
    /// No proof endpoint yielded a usable proof or an explicit
    /// prove-by-index flag. The flow must not proceed to submission.
    #[error("validity proof unavailable: {0}")]
    ProofUnavailable(String),
    /// The packed-accounts contract was violated. This is a programming
    /// error, not a runtime condition: the on-chain program indexes the
    /// remaining-accounts list positionally.
    #[error("account packing defect: {0}")]
    AccountOrderingDefect(String),
    #[error("lookup table sync failed: {0}")]
    LookupTableSync(String),
    /// The ledger reported the transaction as failed. `logs` is the
    /// execution log verbatim; it is the only diagnostic signal available
    /// (encrypted-state programs do not carry structured error payloads).
    #[error("on-chain execution failed: {signature}")]
    OnChainExecution {
        signature: String,
        logs: Vec<String>,
    },
    #[error("rpc: {0}")]
    Rpc(String),
    #[error("indexer: {0}")]
    Indexer(String),
    /// Terminal decryption-service error. Retryable "not yet indexed"
    /// responses never surface here; they are handled by the retry loop in
    /// `decrypt.rs`, which degrades to a typed sentinel instead.
    #[error("decrypt service: {0}")]
    Decrypt(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
