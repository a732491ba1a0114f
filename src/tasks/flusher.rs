use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::{ShutdownSignal, spawn_batch_loop};
use crate::ledger::LedgerService;
use crate::store::{RecordStore, StoreError};

/// Move up to `cap` of the oldest pending records into the store.
///
/// The batch is inserted all-or-nothing. On failure it goes back to the head
/// of the pending queue so the next cycle retries it in the same order.
pub async fn flush_records_once(
    ledger: &LedgerService,
    store: &dyn RecordStore,
    cap: usize,
) -> Result<usize, StoreError> {
    let batch = ledger.take_pending(cap);
    if batch.is_empty() {
        return Ok(0);
    }

    match store.insert_records_batch(&batch).await {
        Ok(()) => {
            debug!(records = batch.len(), "records flushed");
            Ok(batch.len())
        }
        Err(e) => {
            ledger.requeue_pending(batch);
            Err(e)
        }
    }
}

pub fn spawn_record_flusher(
    ledger: Arc<LedgerService>,
    store: Arc<dyn RecordStore>,
    cap: usize,
    interval: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    spawn_batch_loop("record_flusher", cap, interval, shutdown, move || {
        let ledger = Arc::clone(&ledger);
        let store = Arc::clone(&store);
        async move { flush_records_once(&ledger, store.as_ref(), cap).await }
    })
}
