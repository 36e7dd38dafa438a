//! Anomaly scanner
//!
//! Advisory pass over the chain. Findings never fail an operation and are no
//! substitute for [`crate::verify`]: a forged chain can be anomaly-free.

use crate::config::AnomalyConfig;
use crate::crypto::{Digest, GENESIS_SENTINEL};
use crate::types::{chain_order, Record, RecordId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Points each finding adds to the risk score
const RISK_PER_FINDING: u32 = 20;

/// Pattern detected by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Timestamp ahead of "now" by more than the future tolerance
    FutureTimestamp,
    /// Timestamp behind its link predecessor by more than the regression tolerance
    TimestampRegression,
    /// Amount above the large-amount threshold
    LargeAmount,
    /// Amount below zero
    NegativeAmount,
    /// Id shared by more than one record
    DuplicateId,
}

/// One finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Flagged record
    pub record_id: RecordId,
    /// Pattern
    pub kind: AnomalyKind,
    /// Human-readable description
    pub description: String,
}

/// Scanner output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// All findings, in scan order
    pub findings: Vec<Anomaly>,
    /// Flagged ids, deduplicated, first-seen order
    pub flagged_ids: Vec<RecordId>,
    /// `min(100, 20 * findings)`
    pub risk_score: u8,
}

impl AnomalyReport {
    fn from_findings(findings: Vec<Anomaly>) -> Self {
        let mut seen = HashSet::new();
        let flagged_ids = findings
            .iter()
            .filter(|a| seen.insert(a.record_id.clone()))
            .map(|a| a.record_id.clone())
            .collect();

        let risk_score = (findings.len() as u32)
            .saturating_mul(RISK_PER_FINDING)
            .min(100) as u8;

        Self {
            findings,
            flagged_ids,
            risk_score,
        }
    }

    /// No findings
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Human-readable pattern descriptions
    pub fn descriptions(&self) -> Vec<&str> {
        self.findings.iter().map(|a| a.description.as_str()).collect()
    }
}

/// Records in the order their links describe.
///
/// Starts at the genesis sentinel and follows `previous_hash` forward. Where
/// several records claim the same predecessor the first in chain order wins.
/// Records the walk never reaches are appended in chain order.
pub fn link_order(records: &[Record]) -> Vec<&Record> {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| chain_order(a, b));

    let mut successors: HashMap<Digest, Vec<usize>> = HashMap::new();
    for (i, record) in sorted.iter().enumerate() {
        successors.entry(record.previous_hash).or_default().push(i);
    }

    let mut visited = vec![false; sorted.len()];
    let mut ordered = Vec::with_capacity(sorted.len());
    let mut cursor = GENESIS_SENTINEL;

    loop {
        let next = match successors
            .get(&cursor)
            .and_then(|candidates| candidates.iter().copied().find(|&i| !visited[i]))
        {
            Some(next) => next,
            None => break,
        };

        visited[next] = true;
        ordered.push(sorted[next]);
        cursor = sorted[next].current_hash;
    }

    ordered.extend(
        sorted
            .iter()
            .zip(&visited)
            .filter(|(_, &seen)| !seen)
            .map(|(record, _)| *record),
    );
    ordered
}

/// Scan `records` (any order) against `now_ms`
pub fn scan(records: &[Record], now_ms: i64, config: &AnomalyConfig) -> AnomalyReport {
    let mut findings = Vec::new();
    let mut previous: Option<&Record> = None;

    for record in link_order(records) {
        if record.timestamp > now_ms.saturating_add(config.future_tolerance_ms) {
            findings.push(Anomaly {
                record_id: record.id.clone(),
                kind: AnomalyKind::FutureTimestamp,
                description: format!(
                    "Transaction {} has future timestamp ({} ms ahead)",
                    record.id,
                    record.timestamp.saturating_sub(now_ms)
                ),
            });
        }

        if let Some(prev) = previous {
            if record.timestamp < prev.timestamp.saturating_sub(config.regression_tolerance_ms) {
                findings.push(Anomaly {
                    record_id: record.id.clone(),
                    kind: AnomalyKind::TimestampRegression,
                    description: format!(
                        "Transaction {} timestamp is {} ms earlier than its predecessor {}",
                        record.id,
                        prev.timestamp.saturating_sub(record.timestamp),
                        prev.id
                    ),
                });
            }
        }

        if record.amount > config.large_amount_threshold {
            findings.push(Anomaly {
                record_id: record.id.clone(),
                kind: AnomalyKind::LargeAmount,
                description: format!(
                    "Transaction {} has unusually large amount {}",
                    record.id, record.amount
                ),
            });
        }

        if record.amount < Decimal::ZERO {
            findings.push(Anomaly {
                record_id: record.id.clone(),
                kind: AnomalyKind::NegativeAmount,
                description: format!(
                    "Transaction {} has negative amount {}",
                    record.id, record.amount
                ),
            });
        }

        previous = Some(record);
    }

    findings.extend(duplicate_ids(records));

    let report = AnomalyReport::from_findings(findings);
    if !report.is_clean() {
        tracing::warn!(
            findings = report.findings.len(),
            risk_score = report.risk_score,
            "Anomalies detected in ledger"
        );
    }
    report
}

/// One finding per id that occurs more than once
fn duplicate_ids(records: &[Record]) -> Vec<Anomaly> {
    let mut counts: HashMap<&RecordId, usize> = HashMap::new();
    for record in records {
        *counts.entry(&record.id).or_default() += 1;
    }

    let mut duplicated: Vec<(&RecordId, usize)> =
        counts.into_iter().filter(|(_, n)| *n > 1).collect();
    duplicated.sort();

    duplicated
        .into_iter()
        .map(|(id, n)| Anomaly {
            record_id: id.clone(),
            kind: AnomalyKind::DuplicateId,
            description: format!("Duplicate transaction id {} ({} records)", id, n),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::append;
    use crate::types::{Currency, RecordDraft, TransactionKind};

    const NOW: i64 = 1_700_000_000_000;

    fn draft(n: usize, timestamp: i64, amount: Decimal) -> RecordDraft {
        RecordDraft {
            id: RecordId::new(format!("tx-{}", n)),
            kind: TransactionKind::Expense,
            amount,
            currency: Currency::INR,
            category_id: "food".to_string(),
            timestamp,
            due_at: None,
            note: None,
            merchant: None,
            tags: vec![],
            nonce: 0,
        }
    }

    /// Chain linked in the order the timestamps are given
    fn linked(timestamps: &[i64]) -> Vec<Record> {
        let mut records: Vec<Record> = Vec::new();
        for (n, ts) in timestamps.iter().enumerate() {
            let record = append(draft(n, *ts, Decimal::new(100, 0)), records.last());
            records.push(record);
        }
        records
    }

    #[test]
    fn test_clean_chain() {
        let records = linked(&[NOW - 3000, NOW - 2000, NOW - 1000]);
        let report = scan(&records, NOW, &AnomalyConfig::default());
        assert!(report.is_clean());
        assert_eq!(report.risk_score, 0);
        assert!(report.flagged_ids.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let report = scan(&[], NOW, &AnomalyConfig::default());
        assert!(report.is_clean());
    }

    #[test]
    fn test_future_timestamp() {
        let records = linked(&[NOW, NOW + 60_000, NOW + 60_001]);
        let report = scan(&records, NOW, &AnomalyConfig::default());

        // Exactly at the tolerance is fine
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].kind, AnomalyKind::FutureTimestamp);
        assert_eq!(report.flagged_ids, vec![RecordId::new("tx-2")]);
        assert_eq!(report.risk_score, 20);
    }

    #[test]
    fn test_backdated_link_is_regression() {
        // tx-1 is linked after tx-0 but stamped ten minutes earlier
        let records = linked(&[NOW, NOW - 600_000]);
        let report = scan(&records, NOW, &AnomalyConfig::default());

        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].kind, AnomalyKind::TimestampRegression);
        assert_eq!(report.findings[0].record_id, RecordId::new("tx-1"));
        assert!(report.descriptions()[0].contains("tx-0"));
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let records = linked(&[NOW, i64::MIN]);
        let report = scan(&records, NOW, &AnomalyConfig::default());
        assert_eq!(report.findings[0].kind, AnomalyKind::TimestampRegression);
        assert!(report.descriptions()[0].contains(&i64::MAX.to_string()));

        let records = linked(&[i64::MAX]);
        let report = scan(&records, i64::MIN, &AnomalyConfig::default());
        assert_eq!(report.findings[0].kind, AnomalyKind::FutureTimestamp);
    }

    #[test]
    fn test_small_regression_tolerated() {
        let records = linked(&[NOW, NOW - 300_000]);
        assert!(scan(&records, NOW, &AnomalyConfig::default()).is_clean());
    }

    #[test]
    fn test_link_order_follows_hashes() {
        let records = linked(&[NOW, NOW - 600_000, NOW - 700_000]);
        let order: Vec<&str> = link_order(&records).iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["tx-0", "tx-1", "tx-2"]);
    }

    #[test]
    fn test_link_order_appends_unreachable() {
        let mut records = linked(&[NOW - 2000, NOW - 1000]);
        let orphan = append(draft(9, NOW - 5000, Decimal::ONE), None);
        // Orphan also claims genesis; chain order puts it first, so it wins the genesis slot
        records.push(orphan);

        let order: Vec<&str> = link_order(&records).iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["tx-9", "tx-0", "tx-1"]);
    }

    #[test]
    fn test_amount_findings() {
        let mut records = linked(&[NOW - 2000, NOW - 1000]);
        records[0].amount = Decimal::new(10_000_001, 0);
        records[1].amount = Decimal::new(-5, 0);

        let report = scan(&records, NOW, &AnomalyConfig::default());
        let kinds: Vec<AnomalyKind> = report.findings.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&AnomalyKind::LargeAmount));
        assert!(kinds.contains(&AnomalyKind::NegativeAmount));
    }

    #[test]
    fn test_duplicate_ids_flagged_once() {
        let mut records = linked(&[NOW - 3000, NOW - 2000, NOW - 1000]);
        records[2].id = RecordId::new("tx-0");
        records.push(records[0].clone());

        let report = scan(&records, NOW, &AnomalyConfig::default());
        let duplicates: Vec<&Anomaly> = report
            .findings
            .iter()
            .filter(|a| a.kind == AnomalyKind::DuplicateId)
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert!(duplicates[0].description.contains("3 records"));
    }

    #[test]
    fn test_risk_score_caps_at_100() {
        let records = linked(&[
            NOW + 100_000,
            NOW + 200_000,
            NOW + 300_000,
            NOW + 400_000,
            NOW + 500_000,
            NOW + 600_000,
        ]);
        let report = scan(&records, NOW, &AnomalyConfig::default());
        assert_eq!(report.findings.len(), 6);
        assert_eq!(report.risk_score, 100);
    }
}
