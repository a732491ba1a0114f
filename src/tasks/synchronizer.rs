use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::{ShutdownSignal, spawn_batch_loop};
use crate::ledger::{LedgerService, user_ids};
use crate::store::{RecordStore, StoreError};

/// Write up to `cap` dirty balances to the store.
///
/// On failure the users of the chunk are marked dirty again; whatever their
/// balance is at the next cycle gets written then.
pub async fn sync_balances_once(
    ledger: &LedgerService,
    store: &dyn RecordStore,
    cap: usize,
) -> Result<usize, StoreError> {
    let chunk = ledger.drain_dirty(cap);
    if chunk.is_empty() {
        return Ok(0);
    }

    match store.update_balances_batch(&chunk).await {
        Ok(()) => {
            debug!(balances = chunk.len(), "balances synced");
            Ok(chunk.len())
        }
        Err(e) => {
            ledger.mark_dirty(user_ids(&chunk));
            Err(e)
        }
    }
}

pub fn spawn_balance_synchronizer(
    ledger: Arc<LedgerService>,
    store: Arc<dyn RecordStore>,
    cap: usize,
    interval: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    spawn_batch_loop("balance_synchronizer", cap, interval, shutdown, move || {
        let ledger = Arc::clone(&ledger);
        let store = Arc::clone(&store);
        async move { sync_balances_once(&ledger, store.as_ref(), cap).await }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::{BalanceUpdate, Event};
    use crate::store::MemoryStore;

    const USERS: usize = 5;

    fn setup() -> (LedgerService, MemoryStore) {
        let users: Vec<_> = (0..USERS).map(|i| (format!("u{i}"), Amount::ZERO)).collect();
        let store = MemoryStore::with_users(users.clone());
        let ledger = LedgerService::new();
        ledger.seed(
            users.into_iter().map(|(user_id, amount)| BalanceUpdate { user_id, amount }),
            Vec::new(),
        );
        for i in 0..USERS {
            ledger
                .apply(Event::win(&format!("u{i}"), "2.50", &format!("t{i}"), "server"))
                .unwrap();
        }
        (ledger, store)
    }

    #[tokio::test]
    async fn sync_is_bounded_and_eventually_complete() {
        let (ledger, store) = setup();

        assert_eq!(sync_balances_once(&ledger, &store, 2).await.unwrap(), 2);
        assert_eq!(ledger.dirty_len(), 3);
        assert_eq!(sync_balances_once(&ledger, &store, 2).await.unwrap(), 2);
        assert_eq!(sync_balances_once(&ledger, &store, 2).await.unwrap(), 1);
        assert_eq!(sync_balances_once(&ledger, &store, 2).await.unwrap(), 0);

        for i in 0..USERS {
            assert_eq!(
                store.user_balance(&format!("u{i}")).unwrap(),
                Some(Amount::from_cents(250))
            );
        }
    }

    #[tokio::test]
    async fn failed_chunk_is_retried_with_latest_amount() {
        let (ledger, store) = setup();
        store.fail_next(1);

        assert!(sync_balances_once(&ledger, &store, 10).await.is_err());
        assert_eq!(ledger.dirty_len(), USERS);
        assert_eq!(store.user_balance("u0").unwrap(), Some(Amount::ZERO));

        ledger.apply(Event::win("u0", "1.00", "late", "server")).unwrap();
        assert_eq!(sync_balances_once(&ledger, &store, 10).await.unwrap(), USERS);
        assert_eq!(
            store.user_balance("u0").unwrap(),
            Some(Amount::from_cents(350))
        );
        assert_eq!(ledger.dirty_len(), 0);
    }
}
