//! Main ledger orchestration layer
//!
//! Ties together the record store, the single-writer actor, verification,
//! Merkle anchoring and the anomaly scanner into the API the application calls.
//!
//! # Example
//!
//! ```no_run
//! use spendwise_ledger::{Config, Currency, Ledger, NewTransaction, TransactionKind};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> spendwise_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let tx = NewTransaction::new(
//!         TransactionKind::Expense,
//!         Decimal::new(24950, 2),
//!         Currency::INR,
//!         "groceries",
//!     );
//!     let record = ledger.append_transaction(tx).await?;
//!     assert!(ledger.verify_ledger().await?.valid);
//!
//!     let proof = ledger.merkle_proof(&record.id).await?;
//!     assert!(ledger.verify_merkle_proof(&record.current_hash, &proof));
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, Collaborators, LedgerHandle},
    anomaly::{self, AnomalyReport},
    crypto::{Digest, KeyPair, Signature},
    merkle::{self, MerkleProof, MerkleTree},
    metrics::Metrics,
    providers::{Clock, SystemClock, UuidV7Supplier},
    storage::{MemoryStore, RecordStore, RocksStore},
    types::{Currency, NewTransaction, Record, RecordId, RecordUpdate, FIELD_DELIMITER},
    verify::{self, VerificationResult},
    Config, Error, Result,
};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

const MS_PER_DAY: i64 = 86_400_000;

/// Signed commitment to one UTC day of records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAnchor {
    /// UTC calendar day
    pub date: NaiveDate,
    /// Merkle root of the day's records in chain order
    pub root: Digest,
    /// Records in the batch
    pub record_count: usize,
    /// First record of the day
    pub first_record_id: Option<RecordId>,
    /// Last record of the day
    pub last_record_id: Option<RecordId>,
    /// Ed25519 signature over the root bytes (when the ledger holds a key pair)
    pub signature: Option<Signature>,
}

impl DailyAnchor {
    /// Check the signature against `public_key`. Unsigned anchors never verify.
    pub fn verify_signature(&self, public_key: &[u8; 32]) -> bool {
        self.signature
            .as_ref()
            .map(|sig| crate::crypto::verify_signature(self.root.as_bytes(), sig, public_key))
            .unwrap_or(false)
    }
}

/// Whole-ledger report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    /// Records in the chain
    pub total_records: usize,
    /// Amount totals per currency (soft-deleted records count as zero)
    pub totals_by_currency: BTreeMap<Currency, Decimal>,
    /// Mean time between consecutive records, `None` below two records
    pub average_interval_ms: Option<i64>,
    /// Merkle root over the whole chain
    pub chain_root: Digest,
    /// Hash of the first record
    pub genesis_hash: Option<Digest>,
    /// Verification outcome
    pub integrity: VerificationResult,
    /// Anomaly scan outcome
    pub anomalies: AnomalyReport,
}

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for mutations and snapshots
    handle: LedgerHandle,

    /// Actor task, awaited on shutdown
    task: JoinHandle<()>,

    /// Clock, shared with the actor (anomaly "now")
    clock: Arc<dyn Clock>,

    /// Key pair for signing anchors (if enabled)
    keypair: Option<KeyPair>,

    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open a RocksDB-backed ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let store = Arc::new(RocksStore::open(&config)?);
        Self::with_store(store, config).await
    }

    /// Open a ledger over an in-memory store
    pub async fn in_memory(config: Config) -> Result<Self> {
        Self::with_store(Arc::new(MemoryStore::new()), config).await
    }

    /// Open a ledger over any store, with the system clock and UUIDv7 ids
    pub async fn with_store(store: Arc<dyn RecordStore>, config: Config) -> Result<Self> {
        let collaborators = Collaborators {
            store,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidV7Supplier),
        };
        Self::with_collaborators(collaborators, config).await
    }

    /// Open a ledger with explicit collaborators. Must run inside a Tokio runtime.
    pub async fn with_collaborators(collaborators: Collaborators, config: Config) -> Result<Self> {
        config.validate()?;

        let metrics = Metrics::new()?;
        let clock = collaborators.clock.clone();

        let (handle, task) = spawn_ledger_actor(
            collaborators,
            config.deletion_tag.clone(),
            metrics.clone(),
            config.mailbox_capacity,
        );

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            "Ledger opened"
        );

        Ok(Self {
            handle,
            task,
            clock,
            keypair: None,
            metrics,
            config,
        })
    }

    /// Set signing key pair
    pub fn with_keypair(mut self, keypair: KeyPair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    /// Public key anchors are signed with
    pub fn public_key(&self) -> Option<[u8; 32]> {
        self.keypair.as_ref().map(KeyPair::public_key)
    }

    /// Validate a transaction and append it at the tip
    pub async fn append_transaction(&self, transaction: NewTransaction) -> Result<Record> {
        let transaction = self.validate_transaction(transaction)?;
        self.handle.append(transaction).await
    }

    /// Verify the whole chain on a snapshot
    pub async fn verify_ledger(&self) -> Result<VerificationResult> {
        let records = self.handle.snapshot().await?;

        let started = Instant::now();
        let result = verify::verify_sorted(&records);
        self.metrics.record_verification(
            result.valid,
            started.elapsed().as_secs_f64(),
            records.len(),
        );

        tracing::info!(
            valid = result.valid,
            total = result.total,
            verified = result.verified_count,
            integrity_score = result.integrity_score,
            "Ledger verified"
        );

        Ok(result)
    }

    /// Apply a partial update; re-chains when the hash input changed
    pub async fn edit_transaction(&self, id: &RecordId, update: RecordUpdate) -> Result<Record> {
        let update = self.validate_update(update)?;
        self.handle.edit(id.clone(), update).await
    }

    /// Zero the amount, tag as deleted and re-chain. Idempotent.
    pub async fn soft_delete(&self, id: &RecordId) -> Result<Record> {
        self.handle.soft_delete(id.clone()).await
    }

    /// Records in chain order
    pub async fn records(&self) -> Result<Vec<Record>> {
        self.handle.snapshot().await
    }

    /// Merkle root of the records stamped on `date` (UTC)
    pub async fn daily_merkle_root(&self, date: NaiveDate) -> Result<Digest> {
        let records = self.handle.snapshot().await?;
        Ok(MerkleTree::from_records(&daily_batch(&records, date)).root())
    }

    /// Inclusion proof of `id` in its own UTC-day batch
    pub async fn merkle_proof(&self, id: &RecordId) -> Result<MerkleProof> {
        let records = self.handle.snapshot().await?;
        let record = records
            .iter()
            .find(|r| &r.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let batch = daily_batch(&records, utc_day(record.timestamp)?);
        merkle::proof_for(&batch, id).ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Check `proof` for `leaf_hash`
    pub fn verify_merkle_proof(&self, leaf_hash: &Digest, proof: &MerkleProof) -> bool {
        merkle::verify_proof(leaf_hash, proof)
    }

    /// Merkle root of `date`, signed when the ledger holds a key pair
    pub async fn daily_anchor(&self, date: NaiveDate) -> Result<DailyAnchor> {
        let records = self.handle.snapshot().await?;
        let batch = daily_batch(&records, date);
        let root = MerkleTree::from_records(&batch).root();

        let anchor = DailyAnchor {
            date,
            root,
            record_count: batch.len(),
            first_record_id: batch.first().map(|r| r.id.clone()),
            last_record_id: batch.last().map(|r| r.id.clone()),
            signature: self.keypair.as_ref().map(|kp| kp.sign(root.as_bytes())),
        };

        tracing::info!(
            date = %date,
            root = %anchor.root,
            records = anchor.record_count,
            signed = anchor.signature.is_some(),
            "Daily anchor computed"
        );

        Ok(anchor)
    }

    /// Advisory anomaly scan against the ledger clock
    pub async fn scan_anomalies(&self) -> Result<AnomalyReport> {
        let records = self.handle.snapshot().await?;
        Ok(anomaly::scan(&records, self.clock.now_ms(), &self.config.anomaly))
    }

    /// Totals, integrity and anomalies in one report
    pub async fn summary(&self) -> Result<LedgerSummary> {
        let records = self.handle.snapshot().await?;

        let mut totals_by_currency = BTreeMap::new();
        for record in &records {
            *totals_by_currency
                .entry(record.currency)
                .or_insert(Decimal::ZERO) += record.amount;
        }

        let average_interval_ms = match (records.first(), records.last()) {
            (Some(first), Some(last)) if records.len() > 1 => {
                let span = last.timestamp.saturating_sub(first.timestamp);
                Some(span / (records.len() as i64 - 1))
            }
            _ => None,
        };

        let integrity = verify::verify_sorted(&records);
        let anomalies = anomaly::scan(&records, self.clock.now_ms(), &self.config.anomaly);

        Ok(LedgerSummary {
            total_records: records.len(),
            totals_by_currency,
            average_interval_ms,
            chain_root: MerkleTree::from_records(&records).root(),
            genesis_hash: records.first().map(|r| r.current_hash),
            integrity,
            anomalies,
        })
    }

    /// Metrics of this ledger instance
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Shutdown ledger, waiting until the actor has released the store
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.task
            .await
            .map_err(|e| Error::Concurrency(format!("Ledger actor failed: {}", e)))?;
        tracing::info!("Ledger shut down");
        Ok(())
    }

    /// Validate draft invariants and normalize the amount to two decimal places
    fn validate_transaction(&self, mut transaction: NewTransaction) -> Result<NewTransaction> {
        transaction.amount = self.validate_amount(transaction.amount)?;
        self.validate_category(&transaction.category_id)?;
        self.validate_note(transaction.note.as_deref())?;
        self.validate_tags(&transaction.tags)?;
        Ok(transaction)
    }

    fn validate_update(&self, mut update: RecordUpdate) -> Result<RecordUpdate> {
        if update.is_empty() {
            return Err(Error::Validation("Update changes nothing".to_string()));
        }
        if let Some(amount) = update.amount {
            update.amount = Some(self.validate_amount(amount)?);
        }
        if let Some(ref category_id) = update.category_id {
            self.validate_category(category_id)?;
        }
        if let Some(Some(ref note)) = update.note {
            self.validate_note(Some(note))?;
        }
        if let Some(ref tags) = update.tags {
            self.validate_tags(tags)?;
        }
        Ok(update)
    }

    fn validate_amount(&self, amount: Decimal) -> Result<Decimal> {
        // Check amount is positive
        if amount <= Decimal::ZERO {
            return Err(Error::Validation("Amount must be positive".to_string()));
        }

        let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        if rounded.is_zero() {
            return Err(Error::Validation(
                "Amount must be positive after rounding to 2 decimal places".to_string(),
            ));
        }
        if rounded > self.config.validation.max_amount {
            return Err(Error::Validation(format!(
                "Amount exceeds maximum of {}",
                self.config.validation.max_amount
            )));
        }
        Ok(rounded)
    }

    fn validate_category(&self, category_id: &str) -> Result<()> {
        if category_id.trim().is_empty() {
            return Err(Error::Validation("Category is required".to_string()));
        }
        if category_id.chars().count() > self.config.validation.max_category_len {
            return Err(Error::Validation(format!(
                "Category exceeds {} characters",
                self.config.validation.max_category_len
            )));
        }
        if category_id.contains(FIELD_DELIMITER) {
            return Err(Error::Validation(format!(
                "Category must not contain '{}'",
                FIELD_DELIMITER
            )));
        }
        Ok(())
    }

    fn validate_note(&self, note: Option<&str>) -> Result<()> {
        match note {
            Some(note) if note.chars().count() > self.config.validation.max_note_len => {
                Err(Error::Validation(format!(
                    "Note exceeds {} characters",
                    self.config.validation.max_note_len
                )))
            }
            _ => Ok(()),
        }
    }

    fn validate_tags(&self, tags: &[String]) -> Result<()> {
        if tags.len() > self.config.validation.max_tags {
            return Err(Error::Validation(format!(
                "At most {} tags allowed",
                self.config.validation.max_tags
            )));
        }
        // Only soft_delete may set the marker
        if tags.iter().any(|t| t == &self.config.deletion_tag) {
            return Err(Error::Validation(format!(
                "Tag '{}' is reserved for soft deletion",
                self.config.deletion_tag
            )));
        }
        Ok(())
    }
}

/// UTC calendar day of a millisecond timestamp
pub fn utc_day(timestamp_ms: i64) -> Result<NaiveDate> {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.date_naive())
        .ok_or_else(|| Error::Validation(format!("Timestamp {} out of range", timestamp_ms)))
}

/// Records of `records` (chain order) stamped within `date`, UTC, bounds inclusive
pub fn daily_batch(records: &[Record], date: NaiveDate) -> Vec<Record> {
    let start = Utc
        .from_utc_datetime(&date.and_time(NaiveTime::default()))
        .timestamp_millis();
    let end = start + MS_PER_DAY - 1;

    records
        .iter()
        .filter(|r| (start..=end).contains(&r.timestamp))
        .cloned()
        .collect()
}
