//! Background tasks that persist the in-memory ledger.
//!
//! Each task has a `*_once` entry point running exactly one cycle, used by
//! the spawned loops and directly by tests. Loops poll on fixed intervals and
//! stop when the [`ShutdownSignal`] fires.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::ledger::LedgerService;
use crate::store::{RecordStore, StoreError};

mod compensation;
pub use compensation::{CompensationReport, CompensationScheduler};

mod flusher;
pub use flusher::{flush_records_once, spawn_record_flusher};

mod synchronizer;
pub use synchronizer::{spawn_balance_synchronizer, sync_balances_once};

/// Fires once to stop every background loop.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving side of [`ShutdownTrigger`]; cheap to clone, one per task.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        // no receivers left means nothing to stop
        let _ = self.tx.send(true);
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown was triggered or the trigger was dropped.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Sleep for `period`. Returns `true` if shutdown fired first.
    pub async fn sleep(&mut self, period: Duration) -> bool {
        tokio::select! {
            _ = self.wait() => true,
            _ = tokio::time::sleep(period) => false,
        }
    }
}

/// Drive a batch-draining `cycle` until shutdown.
///
/// A cycle that moved a full batch is followed immediately by the next one;
/// an empty, partial or failed cycle sleeps for `interval` first.
pub(crate) fn spawn_batch_loop<F, Fut>(
    task: &'static str,
    cap: usize,
    interval: Duration,
    mut shutdown: ShutdownSignal,
    mut cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<usize, StoreError>> + Send + 'static,
{
    tokio::spawn(async move {
        info!(task, "background task started");
        loop {
            let full = match cycle().await {
                Ok(0) => {
                    debug!(task, "nothing to persist");
                    false
                }
                Ok(moved) => moved == cap,
                Err(e) => {
                    warn!(task, error = %e, "persistence failed, will retry");
                    false
                }
            };
            if shutdown.is_triggered() {
                break;
            }
            if !full && shutdown.sleep(interval).await {
                break;
            }
        }
        info!(task, "background task stopped");
    })
}

/// The three persistence loops of a running ledger.
pub struct BackgroundTasks {
    trigger: ShutdownTrigger,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn spawn(
        ledger: Arc<LedgerService>,
        store: Arc<dyn RecordStore>,
        config: &LedgerConfig,
    ) -> Self {
        let (trigger, signal) = shutdown_channel();
        let scheduler = CompensationScheduler::new(
            Arc::clone(&ledger),
            Arc::clone(&store),
            config.compensation_limit,
        );
        let handles = vec![
            spawn_record_flusher(
                Arc::clone(&ledger),
                Arc::clone(&store),
                config.batch_cap,
                config.flush_interval,
                signal.clone(),
            ),
            spawn_balance_synchronizer(
                ledger,
                store,
                config.batch_cap,
                config.sync_interval,
                signal.clone(),
            ),
            scheduler.spawn(config.compensation_interval, signal),
        ];
        Self { trigger, handles }
    }

    /// Signal every loop to stop and wait for them to exit.
    pub async fn shutdown(self) {
        self.trigger.trigger();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_is_cut_short_by_shutdown() {
        let (trigger, mut signal) = shutdown_channel();
        assert!(!signal.is_triggered());
        trigger.trigger();
        assert!(signal.is_triggered());
        assert!(signal.sleep(Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn dropped_trigger_counts_as_shutdown() {
        let (trigger, mut signal) = shutdown_channel();
        drop(trigger);
        assert!(signal.sleep(Duration::from_secs(3600)).await);
    }

    #[tokio::test]
    async fn sleep_elapses_without_shutdown() {
        let (_trigger, mut signal) = shutdown_channel();
        assert!(!signal.sleep(Duration::from_millis(1)).await);
    }
}
