use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::ShutdownSignal;
use crate::ledger::{LedgerService, reversal_label};
use crate::model::StoredRecord;
use crate::store::{RecordStore, StoreError};

/// Outcome of one compensation cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompensationReport {
    /// Records whose balance effect was reversed this cycle.
    pub compensated: usize,
    /// Records skipped because the reversal would overdraw the user.
    pub refused: usize,
    /// Reversed records whose `Canceled` status could not be saved yet.
    pub save_failures: usize,
    /// Earlier unsaved records persisted this cycle.
    pub retried: usize,
}

/// Periodically reverses the latest odd-numbered processed records.
///
/// A reversed record is marked `Canceled` and saved before the next one is
/// handled. Since only `Processed` records are selected, a saved record is
/// never picked again. A record whose save failed is kept in memory and only
/// its save is retried, so its balance effect is never reversed twice.
pub struct CompensationScheduler {
    ledger: Arc<LedgerService>,
    store: Arc<dyn RecordStore>,
    limit: usize,
    unsaved: Vec<StoredRecord>,
}

impl CompensationScheduler {
    pub fn new(ledger: Arc<LedgerService>, store: Arc<dyn RecordStore>, limit: usize) -> Self {
        Self {
            ledger,
            store,
            limit,
            unsaved: Vec::new(),
        }
    }

    /// Records reversed in memory whose cancellation is not persisted yet.
    pub fn unsaved_len(&self) -> usize {
        self.unsaved.len()
    }

    pub async fn run_once(&mut self) -> Result<CompensationReport, StoreError> {
        let mut report = CompensationReport {
            retried: self.retry_unsaved().await,
            ..CompensationReport::default()
        };

        let candidates = self.store.query_compensable(self.limit).await?;
        for mut stored in candidates {
            if self.unsaved.iter().any(|u| u.id == stored.id) {
                continue;
            }

            match self.ledger.compensate(&stored.record) {
                Ok(balance) => {
                    info!(
                        record = stored.id,
                        user = %stored.record.user_id,
                        amount = %stored.record.amount,
                        balance = %balance,
                        "{}",
                        reversal_label(stored.record.effect)
                    );
                }
                Err(e) => {
                    warn!(record = stored.id, reason = %e, "compensation refused");
                    report.refused += 1;
                    continue;
                }
            }

            stored.record.cancel();
            report.compensated += 1;
            if let Err(e) = self.store.save_record(&stored).await {
                warn!(record = stored.id, error = %e, "canceled status not saved, will retry");
                report.save_failures += 1;
                self.unsaved.push(stored);
            }
        }

        Ok(report)
    }

    /// Try to save previously reversed records again. Returns how many made it.
    async fn retry_unsaved(&mut self) -> usize {
        let mut saved = 0;
        for stored in std::mem::take(&mut self.unsaved) {
            match self.store.save_record(&stored).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    warn!(record = stored.id, error = %e, "canceled status still not saved");
                    self.unsaved.push(stored);
                }
            }
        }
        saved
    }

    /// Run a cycle every `interval` until shutdown. The first cycle runs after
    /// one full interval.
    pub fn spawn(mut self, interval: Duration, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(task = "compensation", "background task started");
            while !shutdown.sleep(interval).await {
                match self.run_once().await {
                    Ok(report) => info!(
                        compensated = report.compensated,
                        refused = report.refused,
                        save_failures = report.save_failures,
                        retried = report.retried,
                        "compensation cycle done"
                    ),
                    Err(e) => warn!(error = %e, "compensation cycle failed"),
                }
            }
            info!(task = "compensation", "background task stopped");
        })
    }
}
