//! Chain verification
//!
//! One pass over the records in chain order, halting at the first record
//! whose hash or link does not hold. Everything after a break is
//! cryptographically meaningless, so it is never counted as verified.

use crate::crypto::{Digest, GENESIS_SENTINEL};
use crate::types::{sort_chain, Record, RecordId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What went wrong with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Stored `current_hash` differs from the recomputed digest
    HashMismatch,
    /// First record does not link to the genesis sentinel
    InvalidGenesis,
    /// `previous_hash` differs from the predecessor's `current_hash`
    BrokenLink,
    /// Record carries a canonical encoding version this build cannot compute
    UnsupportedVersion,
}

/// Located integrity failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityFailure {
    /// Position in chain order
    pub index: usize,
    /// Offending record
    pub record_id: RecordId,
    /// Failure kind
    pub kind: FailureKind,
    /// Digest the verifier expected (absent for unsupported versions)
    pub expected: Option<Digest>,
    /// Digest the record carries
    pub actual: Digest,
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::HashMismatch => write!(
                f,
                "Transaction {} at position {} has invalid hash",
                self.record_id, self.index
            ),
            FailureKind::InvalidGenesis => write!(
                f,
                "Genesis transaction {} has invalid previous hash",
                self.record_id
            ),
            FailureKind::BrokenLink => write!(
                f,
                "Transaction {} at position {} has broken chain link",
                self.record_id, self.index
            ),
            FailureKind::UnsupportedVersion => write!(
                f,
                "Transaction {} at position {} uses an unsupported schema version",
                self.record_id, self.index
            ),
        }
    }
}

/// Outcome of a verification pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whole chain verified
    pub valid: bool,
    /// Number of records examined
    pub total: usize,
    /// Records fully verified before the first failure
    pub verified_count: usize,
    /// Id of the first failing record
    pub failed_at_id: Option<RecordId>,
    /// Chain position of the first failing record
    pub failed_at_index: Option<usize>,
    /// Failures found (at most one, verification halts)
    pub errors: Vec<IntegrityFailure>,
    /// Percentage of the chain verified before the first failure
    pub integrity_score: u8,
}

impl VerificationResult {
    fn valid(total: usize) -> Self {
        Self {
            valid: true,
            total,
            verified_count: total,
            failed_at_id: None,
            failed_at_index: None,
            errors: Vec::new(),
            integrity_score: 100,
        }
    }

    fn failed(total: usize, failure: IntegrityFailure) -> Self {
        let verified_count = failure.index;
        Self {
            valid: false,
            total,
            verified_count,
            failed_at_id: Some(failure.record_id.clone()),
            failed_at_index: Some(failure.index),
            errors: vec![failure],
            integrity_score: integrity_score(verified_count, total),
        }
    }

    /// Human-readable error messages
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

/// `verified / total` as an integer percentage, rounded half up; 100 when empty
pub fn integrity_score(verified: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let verified = verified.min(total) as u128;
    let total = total as u128;
    ((verified * 100 * 2 + total) / (total * 2)) as u8
}

/// Verify the records, which may be passed in any order.
///
/// Pure and read-only: sorts a private copy.
pub fn verify(records: &[Record]) -> VerificationResult {
    let mut sorted = records.to_vec();
    sort_chain(&mut sorted);
    verify_sorted(&sorted)
}

/// Verify records already in chain order
pub fn verify_sorted(records: &[Record]) -> VerificationResult {
    let total = records.len();

    for (index, record) in records.iter().enumerate() {
        if let Some(failure) = check_record(index, record, records) {
            tracing::warn!(
                record_id = %failure.record_id,
                position = index,
                kind = ?failure.kind,
                "Chain verification failed"
            );
            return VerificationResult::failed(total, failure);
        }
    }

    VerificationResult::valid(total)
}

fn check_record(index: usize, record: &Record, records: &[Record]) -> Option<IntegrityFailure> {
    let failure = |kind, expected| IntegrityFailure {
        index,
        record_id: record.id.clone(),
        kind,
        expected,
        actual: record.current_hash,
    };

    // a. own hash
    match record.compute_hash() {
        None => return Some(failure(FailureKind::UnsupportedVersion, None)),
        Some(hash) if hash != record.current_hash => {
            return Some(failure(FailureKind::HashMismatch, Some(hash)))
        }
        Some(_) => {}
    }

    // b. link
    let (expected_prev, kind) = if index == 0 {
        (GENESIS_SENTINEL, FailureKind::InvalidGenesis)
    } else {
        (records[index - 1].current_hash, FailureKind::BrokenLink)
    };

    if record.previous_hash != expected_prev {
        return Some(IntegrityFailure {
            actual: record.previous_hash,
            ..failure(kind, Some(expected_prev))
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{append, rechain_from};
    use crate::crypto::hash_bytes;
    use crate::types::{Currency, RecordDraft, TransactionKind};
    use rust_decimal::Decimal;

    fn chain(len: usize) -> Vec<Record> {
        let mut records: Vec<Record> = Vec::new();
        for n in 0..len {
            let draft = RecordDraft {
                id: RecordId::new(format!("tx-{}", n)),
                kind: TransactionKind::Expense,
                amount: Decimal::new(100 * (n as i64 + 1), 0),
                currency: Currency::INR,
                category_id: "food".to_string(),
                timestamp: 1_700_000_000_000 + n as i64 * 1000,
                due_at: None,
                note: None,
                merchant: None,
                tags: vec![],
                nonce: 0,
            };
            let record = append(draft, records.last());
            records.push(record);
        }
        records
    }

    #[test]
    fn test_empty_chain_is_valid() {
        let result = verify(&[]);
        assert!(result.valid);
        assert_eq!(result.verified_count, 0);
        assert_eq!(result.integrity_score, 100);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_valid_chain() {
        let result = verify(&chain(5));
        assert!(result.valid);
        assert_eq!(result.total, 5);
        assert_eq!(result.verified_count, 5);
        assert_eq!(result.integrity_score, 100);
        assert_eq!(result.failed_at_id, None);
    }

    #[test]
    fn test_unordered_input_is_sorted() {
        let mut records = chain(4);
        records.reverse();
        assert!(verify(&records).valid);
    }

    #[test]
    fn test_amount_tamper_detected() {
        let mut records = chain(4);
        records[2].amount = Decimal::new(9999, 0);

        let result = verify(&records);
        assert!(!result.valid);
        assert_eq!(result.failed_at_id, Some(records[2].id.clone()));
        assert_eq!(result.failed_at_index, Some(2));
        assert_eq!(result.verified_count, 2);
        assert_eq!(result.integrity_score, 50);
        assert_eq!(result.errors[0].kind, FailureKind::HashMismatch);
        assert!(result.messages()[0].contains("tx-2"));
    }

    #[test]
    fn test_forged_hash_breaks_next_link() {
        let mut records = chain(3);
        // Re-hash record 1 consistently with a forged amount: its own hash holds,
        // the successor's link does not
        records[1].amount = Decimal::new(1, 0);
        records[1].current_hash = records[1].compute_hash().unwrap();

        let result = verify(&records);
        assert_eq!(result.failed_at_index, Some(2));
        assert_eq!(result.errors[0].kind, FailureKind::BrokenLink);
        assert_eq!(result.errors[0].expected, Some(records[1].current_hash));
    }

    #[test]
    fn test_forged_genesis_fails_at_zero() {
        let mut records = chain(3);
        records[0].previous_hash = hash_bytes(b"forged");
        records[0].current_hash = records[0].compute_hash().unwrap();

        let result = verify(&records);
        assert!(!result.valid);
        assert_eq!(result.failed_at_index, Some(0));
        assert_eq!(result.verified_count, 0);
        assert_eq!(result.integrity_score, 0);
        assert_eq!(result.errors[0].kind, FailureKind::InvalidGenesis);
    }

    #[test]
    fn test_unsupported_version() {
        let mut records = chain(2);
        records[1].version = 7;
        let result = verify(&records);
        assert_eq!(result.errors[0].kind, FailureKind::UnsupportedVersion);
        assert_eq!(result.verified_count, 1);
    }

    #[test]
    fn test_verification_halts_at_first_failure() {
        let mut records = chain(4);
        records[1].amount = Decimal::new(1, 0);
        records[3].amount = Decimal::new(1, 0);

        let result = verify(&records);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.failed_at_index, Some(1));
    }

    #[test]
    fn test_integrity_score_rounds_half_up() {
        assert_eq!(integrity_score(0, 0), 100);
        assert_eq!(integrity_score(1, 8), 13); // 12.5
        assert_eq!(integrity_score(1, 3), 33); // 33.33
        assert_eq!(integrity_score(2, 3), 67); // 66.67
        assert_eq!(integrity_score(3, 3), 100);
        assert_eq!(integrity_score(0, 5), 0);
    }

    #[test]
    fn test_repaired_chain_verifies() {
        let mut records = chain(3);
        records[0].amount = Decimal::new(5, 0);
        let repaired = rechain_from(records, 0);
        assert!(verify(&repaired).valid);
    }
}
