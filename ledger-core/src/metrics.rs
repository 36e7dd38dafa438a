//! Metrics collection for observability
//!
//! Every [`Metrics`] owns a private Prometheus registry, so several ledgers can
//! live in one process.
//!
//! # Metrics
//!
//! - `ledger_records_appended_total` - Records appended
//! - `ledger_records_rechained_total` - Records re-linked by edits and soft deletes
//! - `ledger_verifications_total` - Verification passes
//! - `ledger_verification_failures_total` - Passes that found a broken chain
//! - `ledger_verify_duration_seconds` - Histogram of verification latencies
//! - `ledger_chain_length` - Records in the chain

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Records appended
    pub records_appended: IntCounter,

    /// Records re-chained
    pub records_rechained: IntCounter,

    /// Verification passes
    pub verifications: IntCounter,

    /// Failed verification passes
    pub verification_failures: IntCounter,

    /// Verification duration histogram
    pub verify_duration: Histogram,

    /// Chain length
    pub chain_length: IntGauge,

    /// Prometheus registry
    registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let records_appended = IntCounter::new(
            "ledger_records_appended_total",
            "Total number of records appended",
        )?;
        registry.register(Box::new(records_appended.clone()))?;

        let records_rechained = IntCounter::new(
            "ledger_records_rechained_total",
            "Total number of records re-linked after an edit",
        )?;
        registry.register(Box::new(records_rechained.clone()))?;

        let verifications = IntCounter::new(
            "ledger_verifications_total",
            "Total number of chain verifications",
        )?;
        registry.register(Box::new(verifications.clone()))?;

        let verification_failures = IntCounter::new(
            "ledger_verification_failures_total",
            "Total number of verifications that found a broken chain",
        )?;
        registry.register(Box::new(verification_failures.clone()))?;

        let verify_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_verify_duration_seconds",
                "Histogram of chain verification latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 5.0]),
        )?;
        registry.register(Box::new(verify_duration.clone()))?;

        let chain_length = IntGauge::new("ledger_chain_length", "Records in the chain")?;
        registry.register(Box::new(chain_length.clone()))?;

        Ok(Self {
            records_appended,
            records_rechained,
            verifications,
            verification_failures,
            verify_duration,
            chain_length,
            registry,
        })
    }

    /// Record an append
    pub fn record_append(&self, chain_length: usize) {
        self.records_appended.inc();
        self.chain_length.set(chain_length as i64);
    }

    /// Record a re-chain touching `count` records
    pub fn record_rechain(&self, count: usize) {
        self.records_rechained.inc_by(count as u64);
    }

    /// Record a verification pass
    pub fn record_verification(&self, valid: bool, duration_seconds: f64, chain_length: usize) {
        self.verifications.inc();
        if !valid {
            self.verification_failures.inc();
        }
        self.verify_duration.observe(duration_seconds);
        self.chain_length.set(chain_length as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every metric
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.records_appended.get(), 0);
        assert_eq!(metrics.verifications.get(), 0);
        assert_eq!(metrics.chain_length.get(), 0);
    }

    #[test]
    fn test_independent_instances() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_append(1);
        assert_eq!(a.records_appended.get(), 1);
        assert_eq!(b.records_appended.get(), 0);
    }

    #[test]
    fn test_record_append() {
        let metrics = Metrics::new().unwrap();
        metrics.record_append(1);
        metrics.record_append(2);
        assert_eq!(metrics.records_appended.get(), 2);
        assert_eq!(metrics.chain_length.get(), 2);
    }

    #[test]
    fn test_record_verification() {
        let metrics = Metrics::new().unwrap();
        metrics.record_verification(true, 0.001, 3);
        metrics.record_verification(false, 0.002, 3);
        assert_eq!(metrics.verifications.get(), 2);
        assert_eq!(metrics.verification_failures.get(), 1);
        assert_eq!(metrics.verify_duration.get_sample_count(), 2);
    }

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rechain(4);
        let text = metrics.render().unwrap();
        assert!(text.contains("ledger_records_rechained_total 4"));
        assert!(text.contains("ledger_chain_length"));
    }
}
