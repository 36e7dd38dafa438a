//! Chain construction and repair
//!
//! - [`append`] links a draft to the current tip (pure, no I/O)
//! - [`rechain_from`] re-links and re-hashes a suffix after a historical edit
//!
//! Persisting the returned records is the caller's job.

use crate::crypto::GENESIS_SENTINEL;
use crate::types::{hash_draft, sort_chain, Record, RecordDraft, SCHEMA_VERSION};

/// Build the record that extends `previous_tip`.
///
/// With no tip the record is the genesis record and links to
/// [`GENESIS_SENTINEL`]. The draft is assumed to be validated already.
pub fn append(draft: RecordDraft, previous_tip: Option<&Record>) -> Record {
    let previous_hash = previous_tip
        .map(|tip| tip.current_hash)
        .unwrap_or(GENESIS_SENTINEL);
    let current_hash = hash_draft(&draft, &previous_hash);

    Record {
        id: draft.id,
        kind: draft.kind,
        amount: draft.amount,
        currency: draft.currency,
        category_id: draft.category_id,
        timestamp: draft.timestamp,
        due_at: draft.due_at,
        note: draft.note,
        merchant: draft.merchant,
        tags: draft.tags,
        previous_hash,
        current_hash,
        nonce: draft.nonce,
        version: SCHEMA_VERSION,
    }
}

/// Re-link and re-hash every record from `from_index` to the end.
///
/// The records are first put in chain order, so an edit that moved a
/// timestamp is accounted for. Records before `from_index` are returned
/// untouched. An out-of-range `from_index` returns the input as given.
/// Re-hashed records are re-encoded under [`SCHEMA_VERSION`].
pub fn rechain_from(mut records: Vec<Record>, from_index: usize) -> Vec<Record> {
    if from_index >= records.len() {
        return records;
    }

    sort_chain(&mut records);

    for i in from_index..records.len() {
        let previous_hash = if i == 0 {
            GENESIS_SENTINEL
        } else {
            records[i - 1].current_hash
        };

        let record = &mut records[i];
        record.previous_hash = previous_hash;
        record.version = SCHEMA_VERSION;
        // Version is SCHEMA_VERSION, so an encoding always exists
        if let Some(hash) = record.compute_hash() {
            record.current_hash = hash;
        }
    }

    tracing::debug!(
        from_index,
        rechained = records.len() - from_index,
        "Chain suffix re-linked"
    );

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, RecordId, RecordUpdate, TransactionKind};
    use crate::verify::verify;
    use rust_decimal::Decimal;

    fn draft(n: i64, amount: i64) -> RecordDraft {
        RecordDraft {
            id: RecordId::new(format!("tx-{}", n)),
            kind: TransactionKind::Expense,
            amount: Decimal::new(amount, 0),
            currency: Currency::INR,
            category_id: "food".to_string(),
            timestamp: 1_700_000_000_000 + n,
            due_at: None,
            note: None,
            merchant: None,
            tags: vec![],
            nonce: 0,
        }
    }

    fn chain(amounts: &[i64]) -> Vec<Record> {
        let mut records: Vec<Record> = Vec::new();
        for (n, amount) in amounts.iter().enumerate() {
            let record = append(draft(n as i64, *amount), records.last());
            records.push(record);
        }
        records
    }

    #[test]
    fn test_genesis_append() {
        let record = append(draft(0, 100), None);
        assert_eq!(record.previous_hash, GENESIS_SENTINEL);
        assert!(record.hash_is_valid());
        assert_eq!(record.version, SCHEMA_VERSION);
    }

    #[test]
    fn test_append_links_to_tip() {
        let first = append(draft(0, 100), None);
        let second = append(draft(1, 200), Some(&first));
        assert_eq!(second.previous_hash, first.current_hash);
        assert!(second.hash_is_valid());
    }

    #[test]
    fn test_append_is_pure() {
        let tip = append(draft(0, 100), None);
        let a = append(draft(1, 200), Some(&tip));
        let b = append(draft(1, 200), Some(&tip));
        assert_eq!(a, b);
    }

    #[test]
    fn test_rechain_repairs_edit() {
        let mut records = chain(&[100, 200, 300]);
        records[1].apply(&RecordUpdate::default().amount(Decimal::new(250, 0)));
        assert!(!verify(&records).valid);

        let repaired = rechain_from(records, 1);
        assert!(verify(&repaired).valid);
        assert_eq!(repaired[2].previous_hash, repaired[1].current_hash);
    }

    #[test]
    fn test_rechain_keeps_prefix() {
        let records = chain(&[100, 200, 300]);
        let first = records[0].clone();
        let repaired = rechain_from(records, 1);
        assert_eq!(repaired[0], first);
    }

    #[test]
    fn test_rechain_out_of_range_is_noop() {
        let mut records = chain(&[100, 200]);
        records.reverse();
        let untouched = records.clone();
        assert_eq!(rechain_from(records, 2), untouched);
        assert!(rechain_from(Vec::new(), 0).is_empty());
    }

    #[test]
    fn test_rechain_resorts_moved_timestamp() {
        let mut records = chain(&[100, 200, 300]);
        // Move the last record before the first
        records[2].timestamp = 1_600_000_000_000;

        let repaired = rechain_from(records, 0);
        assert_eq!(repaired[0].id.as_str(), "tx-2");
        assert!(repaired[0].previous_hash.is_genesis());
        assert!(verify(&repaired).valid);
    }

    #[test]
    fn test_rechain_is_idempotent() {
        let mut records = chain(&[100, 200, 300, 400]);
        records[0].apply(&RecordUpdate::default().category_id("rent"));

        let once = rechain_from(records, 0);
        let twice = rechain_from(once.clone(), 0);
        assert_eq!(once, twice);
    }
}
