//! Actor-based concurrency for the ledger
//!
//! Every chain mutation goes through one Tokio task:
//! - One logical writer: two appends can never both extend the same tip
//! - Snapshots are taken between mutations, never during one
//! - Async message passing with backpressure (bounded mailbox)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │            Ledger (verify / merkle / scan)            │
//! │        computes on snapshots, outside the actor       │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   Append │ Edit │ SoftDelete │ Snapshot               │
//! │                       │                               │
//! │                       ▼                               │
//! │        chain::append / chain::rechain_from            │
//! │                       │                               │
//! │                       ▼                               │
//! │            RecordStore::save / update_many            │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    chain,
    metrics::Metrics,
    providers::{Clock, IdSupplier},
    storage::RecordStore,
    types::{sort_chain, NewTransaction, Record, RecordId, RecordUpdate, FIELD_DELIMITER},
    Error, Result,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// External collaborators of a ledger instance
#[derive(Clone)]
pub struct Collaborators {
    /// Record store
    pub store: Arc<dyn RecordStore>,
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Unique id supplier
    pub ids: Arc<dyn IdSupplier>,
}

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Append a validated transaction at the tip
    Append {
        transaction: NewTransaction,
        response: oneshot::Sender<Result<Record>>,
    },

    /// Apply a validated update, re-chaining when the hash input changed
    Edit {
        id: RecordId,
        update: RecordUpdate,
        response: oneshot::Sender<Result<Record>>,
    },

    /// Zero the amount and tag the record as deleted
    SoftDelete {
        id: RecordId,
        response: oneshot::Sender<Result<Record>>,
    },

    /// Consistent copy of every record, in chain order
    Snapshot {
        response: oneshot::Sender<Result<Vec<Record>>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns every chain mutation
pub struct LedgerActor {
    collaborators: Collaborators,

    /// Tag marking soft-deleted records
    deletion_tag: String,

    metrics: Metrics,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        collaborators: Collaborators,
        deletion_tag: String,
        metrics: Metrics,
        mailbox: mpsc::Receiver<LedgerMessage>,
    ) -> Self {
        Self {
            collaborators,
            deletion_tag,
            metrics,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if let LedgerMessage::Shutdown = msg {
                tracing::info!("Ledger actor shutting down");
                break;
            }
            self.handle_message(msg).await;
        }
    }

    /// Handle a single message
    async fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Append {
                transaction,
                response,
            } => {
                let result = self.append(transaction).await;
                log_failure("append", &result);
                let _ = response.send(result);
            }

            LedgerMessage::Edit {
                id,
                update,
                response,
            } => {
                let result = self.edit(&id, update).await;
                log_failure("edit", &result);
                let _ = response.send(result);
            }

            LedgerMessage::SoftDelete { id, response } => {
                let result = self.soft_delete(&id).await;
                log_failure("soft_delete", &result);
                let _ = response.send(result);
            }

            LedgerMessage::Snapshot { response } => {
                let result = self.snapshot().await;
                log_failure("snapshot", &result);
                let _ = response.send(result);
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    async fn snapshot(&self) -> Result<Vec<Record>> {
        let mut records = self.collaborators.store.list_all().await?;
        sort_chain(&mut records);
        Ok(records)
    }

    async fn append(&self, transaction: NewTransaction) -> Result<Record> {
        let records = self.snapshot().await?;
        let tip = records.last();

        let id = self.collaborators.ids.next_id();
        if id.as_str().is_empty() || id.as_str().contains(FIELD_DELIMITER) {
            return Err(Error::Validation(format!(
                "Id supplier produced unusable id '{}'",
                id
            )));
        }
        if records.iter().any(|r| r.id == id) {
            return Err(Error::Validation(format!("Record {} already exists", id)));
        }

        // Strictly after the tip, so the new record always lands at the end
        let now = self.collaborators.clock.now_ms();
        let timestamp = match tip {
            Some(tip) => now.max(tip.timestamp.saturating_add(1)),
            None => now,
        };

        let record = chain::append(transaction.into_draft(id, timestamp), tip);
        self.collaborators.store.save(&record).await?;

        self.metrics.record_append(records.len() + 1);
        tracing::info!(
            record_id = %record.id,
            position = records.len(),
            timestamp = record.timestamp,
            "Record appended"
        );

        Ok(record)
    }

    async fn edit(&self, id: &RecordId, mut update: RecordUpdate) -> Result<Record> {
        let records = self.snapshot().await?;
        let position = position_of(&records, id)?;

        // A soft-deleted record keeps its marker through tag edits
        if records[position].is_deleted(&self.deletion_tag) {
            if let Some(ref mut tags) = update.tags {
                if !tags.contains(&self.deletion_tag) {
                    tags.push(self.deletion_tag.clone());
                }
            }
        }
        self.rewrite(records, position, &update).await
    }

    async fn soft_delete(&self, id: &RecordId) -> Result<Record> {
        let records = self.snapshot().await?;
        let position = position_of(&records, id)?;

        let record = &records[position];
        if record.is_deleted(&self.deletion_tag) {
            tracing::debug!(record_id = %id, "Record already soft-deleted");
            return Ok(record.clone());
        }

        let mut tags = record.tags.clone();
        if !tags.contains(&self.deletion_tag) {
            tags.push(self.deletion_tag.clone());
        }
        let update = RecordUpdate::default().amount(Decimal::ZERO).tags(tags);

        let record = self.rewrite(records, position, &update).await?;
        tracing::info!(record_id = %id, "Record soft-deleted");
        Ok(record)
    }

    /// Apply `update` to the record at `position` (chain order) and persist.
    ///
    /// A hash-relevant change re-chains from the earlier of the record's old
    /// and new positions; anything else rewrites the single record.
    async fn rewrite(
        &self,
        mut records: Vec<Record>,
        position: usize,
        update: &RecordUpdate,
    ) -> Result<Record> {
        let id = records[position].id.clone();
        let hash_relevant = records[position].apply(update);

        if !hash_relevant {
            let record = records.swap_remove(position);
            self.collaborators.store.update(&record).await?;
            tracing::debug!(record_id = %id, "Descriptive fields updated, no re-chain");
            return Ok(record);
        }

        sort_chain(&mut records);
        let new_position = position_of(&records, &id)?;
        let from_index = position.min(new_position);

        let records = chain::rechain_from(records, from_index);
        let touched = &records[from_index..];
        self.collaborators.store.update_many(touched).await?;

        self.metrics.record_rechain(touched.len());
        tracing::info!(
            record_id = %id,
            from_index,
            rechained = touched.len(),
            "Chain re-linked after edit"
        );

        Ok(records[new_position].clone())
    }
}

fn position_of(records: &[Record], id: &RecordId) -> Result<usize> {
    records
        .iter()
        .position(|r| &r.id == id)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

fn log_failure<T>(operation: &str, result: &Result<T>) {
    match result {
        Err(Error::Validation(_)) | Err(Error::NotFound(_)) | Ok(_) => {}
        Err(e) => tracing::error!(operation, error = %e, "Ledger operation failed"),
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Append a validated transaction
    pub async fn append(&self, transaction: NewTransaction) -> Result<Record> {
        self.request(|response| LedgerMessage::Append {
            transaction,
            response,
        })
        .await
    }

    /// Apply a validated update
    pub async fn edit(&self, id: RecordId, update: RecordUpdate) -> Result<Record> {
        self.request(|response| LedgerMessage::Edit {
            id,
            update,
            response,
        })
        .await
    }

    /// Soft-delete a record
    pub async fn soft_delete(&self, id: RecordId) -> Result<Record> {
        self.request(|response| LedgerMessage::SoftDelete { id, response })
            .await
    }

    /// Records in chain order
    pub async fn snapshot(&self) -> Result<Vec<Record>> {
        self.request(|response| LedgerMessage::Snapshot { response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor.
///
/// The join handle resolves once the actor has stopped and released the store.
pub fn spawn_ledger_actor(
    collaborators: Collaborators,
    deletion_tag: String,
    metrics: Metrics,
    mailbox_capacity: usize,
) -> (LedgerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = LedgerActor::new(collaborators, deletion_tag, metrics, rx);

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    (LedgerHandle::new(tx), task)
}
