//! External collaborators the ledger consults when creating records: the
//! clock and the unique id supplier.

use crate::types::RecordId;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> i64;
}

/// Wall clock (UTC)
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock, for tests and replay tooling
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Start at `now_ms`
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Jump to `now_ms`
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// Move forward by `delta_ms`
    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Source of globally unique record ids
pub trait IdSupplier: Send + Sync {
    /// Produce a fresh id
    fn next_id(&self) -> RecordId;
}

/// UUIDv7 ids (time-ordered, collision resistant)
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7Supplier;

impl IdSupplier for UuidV7Supplier {
    fn next_id(&self) -> RecordId {
        RecordId::from(uuid::Uuid::now_v7())
    }
}

/// Sequential ids with a fixed prefix (`tx-1`, `tx-2`, ...), for tests
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    /// Ids `{prefix}-1`, `{prefix}-2`, ...
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdSupplier for SequentialIds {
    fn next_id(&self) -> RecordId {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        RecordId::new(format!("{}-{}", self.prefix, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_uuid_v7_ids_are_unique() {
        let ids = UuidV7Supplier;
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
        assert_eq!(uuid::Uuid::parse_str(a.as_str()).unwrap().get_version_num(), 7);
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::new("tx");
        assert_eq!(ids.next_id().as_str(), "tx-1");
        assert_eq!(ids.next_id().as_str(), "tx-2");
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
