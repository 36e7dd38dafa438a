//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic hashing (fixed canonical encoding, see [`Record::canonical_encoding`])
//! - Deterministic serialization (bincode at rest, JSON at the edges)
//! - Exact arithmetic (Decimal for money)

use crate::crypto::{hash_bytes, Digest};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Version of the canonical hash encoding written by this crate
pub const SCHEMA_VERSION: u32 = 1;

/// Field delimiter of the canonical encoding
pub const FIELD_DELIMITER: char = '|';

/// Globally unique record identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create new record ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for RecordId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id.to_string())
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// Indian Rupee
    INR,
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
    /// UAE Dirham
    AED,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::INR => "INR",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::AED => "AED",
        }
    }
}

impl FromStr for Currency {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "INR" => Ok(Currency::INR),
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "AED" => Ok(Currency::AED),
            other => Err(crate::Error::Validation(format!(
                "Unsupported currency: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// What the transaction represents to the user. Not part of the hash input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Money spent
    Expense,
    /// Money received
    Income,
    /// Movement between own accounts
    Transfer,
    /// Bill payment (usually carries `due_at`)
    Bill,
}

/// User-supplied transaction fields, before the ledger assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    /// Transaction kind
    pub kind: TransactionKind,
    /// Amount (exact decimal, positive)
    pub amount: Decimal,
    /// Currency
    pub currency: Currency,
    /// Classification bucket, opaque to the ledger
    pub category_id: String,
    /// Bill due date (milliseconds since epoch)
    pub due_at: Option<i64>,
    /// Free-form note
    pub note: Option<String>,
    /// Merchant name
    pub merchant: Option<String>,
    /// Tags
    pub tags: Vec<String>,
}

impl NewTransaction {
    /// Create a transaction with the required fields
    pub fn new(
        kind: TransactionKind,
        amount: Decimal,
        currency: Currency,
        category_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            amount,
            currency,
            category_id: category_id.into(),
            due_at: None,
            note: None,
            merchant: None,
            tags: Vec::new(),
        }
    }

    /// Set the bill due date
    pub fn with_due_at(mut self, due_at: i64) -> Self {
        self.due_at = Some(due_at);
        self
    }

    /// Set the note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Set the merchant
    pub fn with_merchant(mut self, merchant: impl Into<String>) -> Self {
        self.merchant = Some(merchant.into());
        self
    }

    /// Stamp with the ledger-assigned id and timestamp
    pub fn into_draft(self, id: RecordId, timestamp: i64) -> RecordDraft {
        RecordDraft {
            id,
            kind: self.kind,
            amount: self.amount,
            currency: self.currency,
            category_id: self.category_id,
            timestamp,
            due_at: self.due_at,
            note: self.note,
            merchant: self.merchant,
            tags: self.tags,
            nonce: 0,
        }
    }
}

/// Every record field except the two hash fields. Input of the chain builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    /// Record id
    pub id: RecordId,
    /// Transaction kind
    pub kind: TransactionKind,
    /// Amount
    pub amount: Decimal,
    /// Currency
    pub currency: Currency,
    /// Category id
    pub category_id: String,
    /// Creation time (milliseconds since epoch)
    pub timestamp: i64,
    /// Bill due date (milliseconds since epoch)
    pub due_at: Option<i64>,
    /// Note
    pub note: Option<String>,
    /// Merchant
    pub merchant: Option<String>,
    /// Tags
    pub tags: Vec<String>,
    /// Reserved for proof-of-work style extensions
    pub nonce: u64,
}

/// Hash-linked ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique record id, immutable
    pub id: RecordId,

    /// Transaction kind
    pub kind: TransactionKind,

    /// Amount (exact decimal, zero once soft-deleted)
    pub amount: Decimal,

    /// Currency
    pub currency: Currency,

    /// Category id
    pub category_id: String,

    /// Creation time (milliseconds since epoch), orders the chain
    pub timestamp: i64,

    /// Bill due date (milliseconds since epoch)
    pub due_at: Option<i64>,

    /// Note
    pub note: Option<String>,

    /// Merchant
    pub merchant: Option<String>,

    /// Tags (the soft-delete marker lives here)
    pub tags: Vec<String>,

    /// Digest of the chain predecessor, or the genesis sentinel
    pub previous_hash: Digest,

    /// Digest of this record's canonical encoding
    pub current_hash: Digest,

    /// Reserved for proof-of-work style extensions
    pub nonce: u64,

    /// Canonical encoding version
    pub version: u32,
}

impl Record {
    /// Canonical hash input, or `None` for an unknown schema version.
    ///
    /// Version 1: `id|amount|currency|category_id|timestamp|due_at|previous_hash|nonce`,
    /// with `amount` at two or more decimal places (trailing zeros beyond the
    /// cents trimmed), an absent `due_at` encoded as the empty string and
    /// `previous_hash` as lowercase hex.
    pub fn canonical_encoding(&self) -> Option<String> {
        match self.version {
            1 => Some(canonical_v1(&HashInput::of(self), &self.previous_hash)),
            _ => None,
        }
    }

    /// Recompute this record's digest from its own fields
    pub fn compute_hash(&self) -> Option<Digest> {
        self.canonical_encoding()
            .map(|encoding| hash_bytes(encoding.as_bytes()))
    }

    /// Whether the stored `current_hash` matches the recomputed one
    pub fn hash_is_valid(&self) -> bool {
        self.compute_hash() == Some(self.current_hash)
    }

    /// Whether the record has been soft-deleted: it carries the deletion
    /// marker and its amount is zero
    pub fn is_deleted(&self, deletion_tag: &str) -> bool {
        self.amount.is_zero() && self.tags.iter().any(|t| t == deletion_tag)
    }

    /// Apply a partial update.
    ///
    /// Returns `true` when a field of the hash input changed, in which case the
    /// record and every successor must be re-chained.
    pub fn apply(&mut self, update: &RecordUpdate) -> bool {
        let before = HashInput::of(self).to_owned_key();

        if let Some(kind) = update.kind {
            self.kind = kind;
        }
        if let Some(amount) = update.amount {
            self.amount = amount;
        }
        if let Some(currency) = update.currency {
            self.currency = currency;
        }
        if let Some(ref category_id) = update.category_id {
            self.category_id = category_id.clone();
        }
        if let Some(timestamp) = update.timestamp {
            self.timestamp = timestamp;
        }
        if let Some(due_at) = update.due_at {
            self.due_at = due_at;
        }
        if let Some(ref note) = update.note {
            self.note = note.clone();
        }
        if let Some(ref merchant) = update.merchant {
            self.merchant = merchant.clone();
        }
        if let Some(ref tags) = update.tags {
            self.tags = tags.clone();
        }

        before != HashInput::of(self).to_owned_key()
    }
}

/// Total chain order: timestamp ascending, ties broken by id
pub fn chain_order(a: &Record, b: &Record) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort records into chain order
pub fn sort_chain(records: &mut [Record]) {
    records.sort_by(chain_order);
}

/// Partial update of a record. `None` leaves a field untouched; for optional
/// fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    /// New kind
    pub kind: Option<TransactionKind>,
    /// New amount
    pub amount: Option<Decimal>,
    /// New currency
    pub currency: Option<Currency>,
    /// New category id
    pub category_id: Option<String>,
    /// New timestamp
    pub timestamp: Option<i64>,
    /// New due date
    pub due_at: Option<Option<i64>>,
    /// New note
    pub note: Option<Option<String>>,
    /// New merchant
    pub merchant: Option<Option<String>>,
    /// Replacement tag list
    pub tags: Option<Vec<String>>,
}

impl RecordUpdate {
    /// Update the amount
    pub fn amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Update the currency
    pub fn currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    /// Update the category
    pub fn category_id(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    /// Update the timestamp
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Update or clear the due date
    pub fn due_at(mut self, due_at: Option<i64>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    /// Update or clear the note
    pub fn note(mut self, note: Option<String>) -> Self {
        self.note = Some(note);
        self
    }

    /// Replace the tags
    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Whether the update carries no change at all
    pub fn is_empty(&self) -> bool {
        *self == RecordUpdate::default()
    }
}

/// Borrowed view of the hashed payload fields (everything except the link)
struct HashInput<'a> {
    id: &'a str,
    amount: &'a Decimal,
    currency: Currency,
    category_id: &'a str,
    timestamp: i64,
    due_at: Option<i64>,
    nonce: u64,
}

impl<'a> HashInput<'a> {
    fn of(record: &'a Record) -> Self {
        Self {
            id: record.id.as_str(),
            amount: &record.amount,
            currency: record.currency,
            category_id: &record.category_id,
            timestamp: record.timestamp,
            due_at: record.due_at,
            nonce: record.nonce,
        }
    }

    fn of_draft(draft: &'a RecordDraft) -> Self {
        Self {
            id: draft.id.as_str(),
            amount: &draft.amount,
            currency: draft.currency,
            category_id: &draft.category_id,
            timestamp: draft.timestamp,
            due_at: draft.due_at,
            nonce: draft.nonce,
        }
    }

    /// Comparable key, independent of `previous_hash`
    fn to_owned_key(&self) -> String {
        canonical_v1(self, &crate::crypto::GENESIS_SENTINEL)
    }
}

/// Canonical amount text: at least two decimal places, never fewer digits than
/// the value needs. `100` and `100.000` encode as `100.00`; `100.004` stays exact.
fn canonical_amount(amount: &Decimal) -> String {
    let mut scaled = amount.normalize();
    if scaled.scale() < 2 {
        scaled.rescale(2);
    }
    scaled.to_string()
}

fn canonical_v1(input: &HashInput<'_>, previous_hash: &Digest) -> String {
    let due_at = input.due_at.map(|d| d.to_string()).unwrap_or_default();
    [
        input.id.to_string(),
        canonical_amount(input.amount),
        input.currency.code().to_string(),
        input.category_id.to_string(),
        input.timestamp.to_string(),
        due_at,
        previous_hash.to_hex(),
        input.nonce.to_string(),
    ]
    .join(&FIELD_DELIMITER.to_string())
}

/// Digest of a draft linked to `previous_hash`, under the current schema version
pub(crate) fn hash_draft(draft: &RecordDraft, previous_hash: &Digest) -> Digest {
    hash_bytes(canonical_v1(&HashInput::of_draft(draft), previous_hash).as_bytes())
}
