use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{RecordStore, StoreError};
use crate::Amount;
use crate::model::{
    BalanceUpdate, ProcessingStatus, RecordId, StoredRecord, TransactionRecord, TxId, UserId,
};

/// [`RecordStore`] kept in process memory.
///
/// Ids are assigned sequentially from 1, like a serial primary key.
/// [`MemoryStore::fail_next`] makes the next write calls fail, to exercise the
/// retry paths of the background tasks.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
    failures: AtomicUsize,
}

#[derive(Debug, Default)]
struct Tables {
    records: Vec<StoredRecord>,
    users: BTreeMap<UserId, Amount>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with users at the given balances.
    pub fn with_users(users: impl IntoIterator<Item = (UserId, Amount)>) -> Self {
        Self {
            inner: Mutex::new(Tables {
                records: Vec::new(),
                users: users.into_iter().collect(),
            }),
            failures: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` write operations with [`StoreError::Unavailable`].
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn records(&self) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self.tables()?.records.clone())
    }

    pub fn user_balance(&self, user: &str) -> Result<Option<Amount>, StoreError> {
        Ok(self.tables()?.users.get(user).copied())
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn check_available(&self, op: &str) -> Result<(), StoreError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable(format!("{op}: injected failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_records_batch(&self, records: &[TransactionRecord]) -> Result<(), StoreError> {
        self.check_available("insert_records_batch")?;
        let mut tables = self.tables()?;
        let mut next_id = tables.records.len() as RecordId + 1;
        for record in records {
            tables.records.push(StoredRecord {
                id: next_id,
                record: record.clone(),
            });
            next_id += 1;
        }
        Ok(())
    }

    async fn update_balances_batch(&self, balances: &[BalanceUpdate]) -> Result<(), StoreError> {
        self.check_available("update_balances_batch")?;
        let mut tables = self.tables()?;
        for update in balances {
            // unknown users match no row
            if let Some(amount) = tables.users.get_mut(&update.user_id) {
                *amount = update.amount;
            }
        }
        Ok(())
    }

    async fn query_compensable(&self, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .records
            .iter()
            .rev()
            .filter(|r| r.id % 2 == 1 && r.record.status == ProcessingStatus::Processed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save_record(&self, record: &StoredRecord) -> Result<(), StoreError> {
        self.check_available("save_record")?;
        let mut tables = self.tables()?;
        let slot = tables
            .records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or(StoreError::RecordNotFound(record.id))?;
        *slot = record.clone();
        Ok(())
    }

    async fn insert_user(&self, user: &str) -> Result<(), StoreError> {
        self.check_available("insert_user")?;
        let mut tables = self.tables()?;
        if tables.users.contains_key(user) {
            return Err(StoreError::UserExists(user.to_string()));
        }
        tables.users.insert(user.to_string(), Amount::ZERO);
        Ok(())
    }

    async fn load_all_users(&self) -> Result<Vec<BalanceUpdate>, StoreError> {
        Ok(self
            .tables()?
            .users
            .iter()
            .map(|(user, amount)| BalanceUpdate {
                user_id: user.clone(),
                amount: *amount,
            })
            .collect())
    }

    async fn load_all_transaction_ids(&self) -> Result<Vec<TxId>, StoreError> {
        Ok(self
            .tables()?
            .records
            .iter()
            .map(|r| r.record.transaction_id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Effect, SourceType};

    fn record(tx: &str, status: ProcessingStatus) -> TransactionRecord {
        TransactionRecord::new(
            "u1".to_string(),
            Effect::Win,
            Amount::from_cents(100),
            tx.to_string(),
            SourceType::Game,
            status,
        )
    }

    #[tokio::test]
    async fn insert_assigns_sequential_ids() {
        let store = MemoryStore::new();
        store
            .insert_records_batch(&[record("a", ProcessingStatus::Processed)])
            .await
            .unwrap();
        store
            .insert_records_batch(&[
                record("b", ProcessingStatus::Processed),
                record("c", ProcessingStatus::Errored),
            ])
            .await
            .unwrap();

        let ids: Vec<_> = store.records().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(
            store.load_all_transaction_ids().await.unwrap(),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn query_compensable_selects_latest_odd_processed() {
        let store = MemoryStore::new();
        let batch: Vec<_> = (1..=30)
            .map(|i| {
                let status = if i == 29 {
                    ProcessingStatus::Errored
                } else {
                    ProcessingStatus::Processed
                };
                record(&format!("t{i}"), status)
            })
            .collect();
        store.insert_records_batch(&batch).await.unwrap();

        let ids: Vec<_> = store
            .query_compensable(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![27, 25, 23, 21, 19, 17, 15, 13, 11, 9]);
    }

    #[tokio::test]
    async fn injected_failure_rejects_whole_batch() {
        let store = MemoryStore::new();
        store.fail_next(1);
        let result = store
            .insert_records_batch(&[record("a", ProcessingStatus::Processed)])
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(store.records().unwrap().is_empty());

        store
            .insert_records_batch(&[record("a", ProcessingStatus::Processed)])
            .await
            .unwrap();
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn save_record_requires_existing_id() {
        let store = MemoryStore::new();
        let missing = StoredRecord {
            id: 7,
            record: record("a", ProcessingStatus::Canceled),
        };
        assert_eq!(
            store.save_record(&missing).await,
            Err(StoreError::RecordNotFound(7))
        );
    }

    #[tokio::test]
    async fn users_and_balances() {
        let store = MemoryStore::with_users([("u1".to_string(), Amount::from_cents(500))]);
        store.insert_user("u2").await.unwrap();
        assert_eq!(
            store.insert_user("u1").await,
            Err(StoreError::UserExists("u1".to_string()))
        );

        store
            .update_balances_batch(&[
                BalanceUpdate {
                    user_id: "u2".to_string(),
                    amount: Amount::from_cents(42),
                },
                BalanceUpdate {
                    user_id: "ghost".to_string(),
                    amount: Amount::from_cents(1),
                },
            ])
            .await
            .unwrap();

        assert_eq!(store.user_balance("u2").unwrap(), Some(Amount::from_cents(42)));
        assert_eq!(store.user_balance("ghost").unwrap(), None);
        assert_eq!(store.load_all_users().await.unwrap().len(), 2);
    }
}
