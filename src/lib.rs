//! Confidential swap client.
//!
//! This crate builds, proves, and submits a single confidential-swap
//! transaction against a constant-product pool whose reserves and balances
//! are ciphertext handles and whose pool record lives in a compressed
//! (Merkleized) account served by an indexer.
//!
//! Three external systems are coordinated into one atomic ledger transaction:
//! - the ledger RPC (submit/simulate/confirm, address lookup tables)
//! - the compressed-state indexer (validity proofs, compressed accounts)
//! - the attested decryption service (signed reveal requests)
//!
//! Notes on responsibilities:
//! - Network-touching code is delegated:
//!   - RPC fetching / tx submission lives in `solana.rs`
//!   - indexer API calls live in `indexer.rs`
//!   - decryption service calls live in `decrypt.rs`
//! - Proof normalization (`proof.rs`) and account packing (`accounts.rs`)
//!   are pure given their inputs, so they stay unit-testable.
//! - Wallet loading, CLI parsing, and config persistence are the embedding
//!   application's job. So is installing a `tracing` subscriber.

pub mod accounts;
pub mod allowance;
pub mod config;
pub mod decrypt;
pub mod engine;
pub mod error;
pub mod handle;
pub mod indexer;
pub mod lut;
pub mod parse;
pub mod proof;
pub mod solana;
pub mod types;

pub use config::Config;
pub use decrypt::{decrypt_with_retry, BackoffPolicy, DecryptOutcome};
pub use engine::{quote_exact_in, SwapFlow, SwapQuote, SwapReceipt, SwapRequest};
pub use error::{ClientError, ClientResult};
pub use types::{CompressedAccountRef, Handle, ValidityProof};
