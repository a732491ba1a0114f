//! Persistence boundary for the ledger.
//!
//! The ledger only talks to durable storage through [`RecordStore`]. Calls are
//! made from background tasks (and registration), never while the ledger lock
//! is held.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{BalanceUpdate, RecordId, StoredRecord, TransactionRecord, TxId, UserId};

mod memory;
pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record {0} not found")]
    RecordNotFound(RecordId),

    #[error("user {0} already exists")]
    UserExists(UserId),

    #[error("store lock poisoned")]
    LockPoisoned,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a batch of new records. All-or-nothing.
    async fn insert_records_batch(&self, records: &[TransactionRecord]) -> Result<(), StoreError>;

    /// Overwrite stored balances, matched by user id.
    async fn update_balances_batch(&self, balances: &[BalanceUpdate]) -> Result<(), StoreError>;

    /// Most recent `Processed` records with an odd id, newest first.
    async fn query_compensable(&self, limit: usize) -> Result<Vec<StoredRecord>, StoreError>;

    /// Overwrite a single stored record.
    async fn save_record(&self, record: &StoredRecord) -> Result<(), StoreError>;

    /// Create a user with a zero balance.
    async fn insert_user(&self, user: &str) -> Result<(), StoreError>;

    async fn load_all_users(&self) -> Result<Vec<BalanceUpdate>, StoreError>;

    async fn load_all_transaction_ids(&self) -> Result<Vec<TxId>, StoreError>;
}
