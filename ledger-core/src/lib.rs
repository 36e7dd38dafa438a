//! SpendWise Ledger
//!
//! Append-only, hash-chained transaction ledger with tamper detection,
//! Merkle anchoring and chain repair after retroactive edits.
//!
//! # Architecture
//!
//! - **Hash Chain**: every record commits to its contents and its predecessor
//! - **Single Writer**: one actor task serializes append, edit and soft delete
//! - **Merkle Tree**: daily batch roots and inclusion proofs
//! - **Snapshots**: verification and scans run on consistent copies
//!
//! # Invariants
//!
//! - The first record in chain order links to the genesis sentinel
//! - `current_hash` is a pure function of the canonical encoding
//! - Integrity failures are reported as data, never raised
//! - Records are never physically removed by ledger operations

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod actor;
pub mod anomaly;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod metrics;
pub mod providers;
pub mod storage;
pub mod types;
pub mod verify;

// Re-exports
pub use anomaly::{Anomaly, AnomalyKind, AnomalyReport};
pub use config::Config;
pub use crypto::{Digest, KeyPair, Signature, GENESIS_SENTINEL};
pub use error::{Error, Result};
pub use ledger::{DailyAnchor, Ledger, LedgerSummary};
pub use merkle::{verify_proof as verify_merkle_proof, MerkleProof, MerkleTree};
pub use storage::{MemoryStore, RecordStore, RocksStore};
pub use types::{
    Currency, NewTransaction, Record, RecordDraft, RecordId, RecordUpdate, TransactionKind,
    SCHEMA_VERSION,
};
pub use verify::{FailureKind, IntegrityFailure, VerificationResult};
