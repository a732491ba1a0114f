use std::sync::Arc;
use std::time::Duration;

use ledger_core::model::ProcessingStatus;
use ledger_core::store::MemoryStore;
use ledger_core::tasks::{BackgroundTasks, CompensationScheduler, flush_records_once};
use ledger_core::{Amount, Event, LedgerConfig, LedgerError, LedgerService};

fn fast_config() -> LedgerConfig {
    LedgerConfig {
        batch_cap: 7,
        flush_interval: Duration::from_millis(5),
        sync_interval: Duration::from_millis(5),
        compensation_interval: Duration::from_secs(3600),
        ..LedgerConfig::default()
    }
}

async fn registered(users: &[&str]) -> (Arc<LedgerService>, Arc<MemoryStore>) {
    let ledger = Arc::new(LedgerService::new());
    let store = Arc::new(MemoryStore::new());
    for user in users {
        ledger.register_user(store.as_ref(), user).await.unwrap();
    }
    (ledger, store)
}

async fn wait_until(done: impl Fn() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("background tasks did not persist the ledger in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_events_are_persisted_by_background_tasks() {
    let users = ["a", "b", "c"];
    let (ledger, store) = registered(&users).await;
    let tasks = BackgroundTasks::spawn(ledger.clone(), store.clone(), &fast_config());

    let handles: Vec<_> = (0..60)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                let user = ["a", "b", "c"][i % 3];
                ledger
                    .apply(Event::win(user, "1.00", &format!("tx-{i}"), "game"))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    wait_until(|| {
        store.records().unwrap().len() == 60
            && users
                .iter()
                .all(|u| store.user_balance(u).unwrap() == Some(Amount::from_cents(2000)))
    })
    .await;
    tasks.shutdown().await;

    assert_eq!(ledger.pending_len(), 0);
    assert_eq!(ledger.dirty_len(), 0);
    for user in users {
        assert_eq!(ledger.balance(user), Some(Amount::from_cents(2000)));
        assert_eq!(store.user_balance(user).unwrap(), Some(Amount::from_cents(2000)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn store_outage_delays_but_does_not_lose_writes() {
    let (ledger, store) = registered(&["u"]).await;
    store.fail_next(5);
    let tasks = BackgroundTasks::spawn(ledger.clone(), store.clone(), &fast_config());

    for i in 0..20 {
        ledger
            .apply(Event::win("u", "0.10", &format!("t{i}"), "server"))
            .unwrap();
    }

    wait_until(|| {
        store.records().unwrap().len() == 20
            && store.user_balance("u").unwrap() == Some(Amount::from_cents(200))
    })
    .await;
    tasks.shutdown().await;

    let txs: Vec<_> = store
        .records()
        .unwrap()
        .into_iter()
        .map(|r| r.record.transaction_id)
        .collect();
    let expected: Vec<_> = (0..20).map(|i| format!("t{i}")).collect();
    assert_eq!(txs, expected);
    assert_eq!(store.user_balance("u").unwrap(), Some(Amount::from_cents(200)));
}

#[tokio::test]
async fn scenario_with_compensation_and_restart() {
    let (ledger, store) = registered(&["U"]).await;

    assert_eq!(
        ledger.apply(Event::win("U", "27.99", "id-10", "game")).unwrap(),
        Amount::from_cents(2799)
    );
    assert_eq!(
        ledger.apply(Event::lose("U", "12.33", "id-11", "game")).unwrap(),
        Amount::from_cents(1566)
    );
    assert!(matches!(
        ledger.apply(Event::lose("U", "107.99", "id-12", "game")),
        Err(LedgerError::InsufficientBalance { .. })
    ));
    assert!(matches!(
        ledger.apply(Event::win("U", "27.99", "id-10", "game")),
        Err(LedgerError::DuplicateTransaction(_))
    ));
    assert_eq!(ledger.balance("U"), Some(Amount::from_cents(1566)));

    flush_records_once(&ledger, store.as_ref(), 500).await.unwrap();

    // ids: 1 = win 27.99, 2 = lose 12.33, 3 = errored lose
    let mut scheduler = CompensationScheduler::new(ledger.clone(), store.clone(), 10);
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.refused, 1);
    assert_eq!(ledger.balance("U"), Some(Amount::from_cents(1566)));

    ledger.apply(Event::win("U", "20.00", "id-13", "payment")).unwrap();
    flush_records_once(&ledger, store.as_ref(), 500).await.unwrap();
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.compensated, 1);
    assert_eq!(ledger.balance("U"), Some(Amount::from_cents(767)));

    let statuses: Vec<_> = store
        .records()
        .unwrap()
        .into_iter()
        .map(|r| r.record.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            ProcessingStatus::Canceled,
            ProcessingStatus::Processed,
            ProcessingStatus::Errored,
            ProcessingStatus::Processed,
        ]
    );

    // a fresh process sees every persisted id as already used
    let restarted = LedgerService::new();
    restarted.bootstrap(store.as_ref()).await.unwrap();
    assert!(matches!(
        restarted.apply(Event::lose("U", "1.00", "id-12", "game")),
        Err(LedgerError::DuplicateTransaction(_))
    ));
}
