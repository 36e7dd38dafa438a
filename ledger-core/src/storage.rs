//! Record store collaborators
//!
//! The ledger only needs [`RecordStore`]: list, get, save, update. Two
//! implementations ship with the crate:
//!
//! - [`MemoryStore`] - insertion-ordered `Vec`, for tests and embedding
//! - [`RocksStore`] - RocksDB, one column family keyed by record id
//!
//! # Column Families
//!
//! - `records` - Ledger records (key: record id, value: bincode)

use crate::{
    error::{Error, Result},
    types::{Record, RecordId},
    Config,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::sync::Arc;

/// Column family names
const CF_RECORDS: &str = "records";

/// Persistence boundary of the ledger.
///
/// Failures are returned as-is to the ledger's caller; retry policy, if any,
/// belongs to the implementation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every stored record, in no particular order
    async fn list_all(&self) -> Result<Vec<Record>>;

    /// Insert a new record. Saving an id twice is an error.
    async fn save(&self, record: &Record) -> Result<()>;

    /// Overwrite an existing record
    async fn update(&self, record: &Record) -> Result<()>;

    /// Overwrite several records (a re-chained suffix)
    async fn update_many(&self, records: &[Record]) -> Result<()> {
        for record in records {
            self.update(record).await?;
        }
        Ok(())
    }

    /// Remove every record. Ledger-external: never called by ledger operations.
    async fn wipe_all(&self) -> Result<()>;
}

/// In-memory record store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<Record>>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store holding `records` as-is (no hashing, no checks)
    pub fn with_records(records: Vec<Record>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<Record>> {
        Ok(self.records.read().clone())
    }

    async fn save(&self, record: &Record) -> Result<()> {
        let mut records = self.records.write();
        if records.iter().any(|r| r.id == record.id) {
            return Err(Error::Validation(format!(
                "Record {} already exists",
                record.id
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &Record) -> Result<()> {
        let mut records = self.records.write();
        let slot = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| Error::NotFound(record.id.to_string()))?;
        *slot = record.clone();
        Ok(())
    }

    async fn wipe_all(&self) -> Result<()> {
        self.records.write().clear();
        Ok(())
    }
}

/// RocksDB-backed record store
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.store.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.store.max_background_jobs);

        if config.store.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(
            CF_RECORDS,
            Self::cf_options_records(),
        )];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB record store");

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_RECORDS)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_RECORDS)))
    }

    fn read(&self, id: &RecordId) -> Result<Option<Record>> {
        let cf = self.cf_handle()?;
        match self.db.get_cf(cf, id.as_str().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn write(&self, record: &Record) -> Result<()> {
        let cf = self.cf_handle()?;
        let value = bincode::serialize(record)?;
        self.db.put_cf(cf, record.id.as_str().as_bytes(), &value)?;
        Ok(())
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RocksStore {
    async fn list_all(&self) -> Result<Vec<Record>> {
        let cf = self.cf_handle()?;
        let mut records = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }

        Ok(records)
    }

    async fn save(&self, record: &Record) -> Result<()> {
        if self.read(&record.id)?.is_some() {
            return Err(Error::Validation(format!(
                "Record {} already exists",
                record.id
            )));
        }
        self.write(record)?;

        tracing::debug!(record_id = %record.id, "Record saved");
        Ok(())
    }

    async fn update(&self, record: &Record) -> Result<()> {
        if self.read(&record.id)?.is_none() {
            return Err(Error::NotFound(record.id.to_string()));
        }
        self.write(record)
    }

    async fn update_many(&self, records: &[Record]) -> Result<()> {
        let cf = self.cf_handle()?;
        let mut batch = WriteBatch::default();

        for record in records {
            if self.read(&record.id)?.is_none() {
                return Err(Error::NotFound(record.id.to_string()));
            }
            batch.put_cf(cf, record.id.as_str().as_bytes(), bincode::serialize(record)?);
        }

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(count = records.len(), "Records updated atomically");
        Ok(())
    }

    async fn wipe_all(&self) -> Result<()> {
        let cf = self.cf_handle()?;
        let mut batch = WriteBatch::default();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(cf, key);
        }

        self.db.write(batch)?;
        tracing::info!("Record store wiped");
        Ok(())
    }
}
