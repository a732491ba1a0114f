//! In-memory ledger.
//!
//! [`LedgerService`] owns the idempotency registry, the balance cache and the
//! queue of records waiting to be persisted. All three live behind one mutex,
//! so an event is checked, applied and enqueued as a single atomic step.
//! The lock is never held across an `.await`: store calls only see data that
//! has already been copied out.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::Amount;
use crate::model::{
    BalanceUpdate, Command, Effect, Event, ProcessingStatus, SourceType, TransactionRecord,
    TxId, UserId,
};
use crate::store::{RecordStore, StoreError};

mod balances;
pub use balances::{BalanceStore, UserBalance};

mod error;
pub use error::{BalanceError, LedgerError};

mod queue;
pub use queue::PendingRecordQueue;

mod registry;
pub use registry::IdempotencyRegistry;

#[derive(Debug, Default)]
struct LedgerState {
    registry: IdempotencyRegistry,
    balances: BalanceStore,
    pending: PendingRecordQueue,
    /// Users whose store insert is in flight. They count as registered.
    registering: HashSet<UserId>,
}

/// Thread-safe entry point for balance-changing events.
///
/// Share it behind an `Arc` between request handlers and the background
/// tasks in [`crate::tasks`].
#[derive(Debug, Default)]
pub struct LedgerService {
    state: Mutex<LedgerState>,
    max_users: Option<usize>,
}

/// Public API
impl LedgerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of users [`register_user`](Self::register_user) accepts.
    pub fn with_max_users(max_users: Option<usize>) -> Self {
        Self {
            state: Mutex::default(),
            max_users,
        }
    }

    /// Apply a win or lose event and return the user's new balance.
    ///
    /// Validation failures, unknown users and duplicate ids are rejected
    /// without touching any state. Every event that gets past the duplicate
    /// check leaves exactly one record in the pending queue: `Processed` when
    /// the balance changed, `Errored` when it was refused.
    pub fn apply(&self, event: Event) -> Result<Amount, LedgerError> {
        let result = self.apply_event(&event);
        Self::log_result(&event, &result);
        result
    }

    /// Process every command of `stream` in order, logging and skipping
    /// failures.
    pub async fn run(
        &self,
        store: &dyn RecordStore,
        mut stream: impl Stream<Item = Command> + Unpin,
    ) {
        while let Some(command) = stream.next().await {
            match command {
                Command::Register { user } => {
                    if let Err(e) = self.register_user(store, &user).await {
                        warn!(user = %user, "registration rejected: {e}");
                    }
                }
                Command::Event(event) => {
                    // a rejected event must not stop the stream
                    let _ = self.apply(event);
                }
            }
        }
    }

    /// Register a new user with a zero balance, persisting it first.
    ///
    /// The user holds a registration slot while the store insert is in
    /// flight, so concurrent calls cannot both pass the duplicate check or
    /// the user limit.
    pub async fn register_user(
        &self,
        store: &dyn RecordStore,
        user: &str,
    ) -> Result<(), LedgerError> {
        if user.is_empty() {
            return Err(LedgerError::EmptyUserId);
        }
        let _slot = self.reserve_registration(user)?;

        match store.insert_user(user).await {
            Ok(()) => {}
            Err(StoreError::UserExists(_)) => {
                return Err(LedgerError::UserAlreadyRegistered(user.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let mut state = self.state();
        state.registering.remove(user);
        if !state.balances.insert(user.to_string(), Amount::ZERO) {
            return Err(LedgerError::UserAlreadyRegistered(user.to_string()));
        }
        info!(user = %user, "user registered");
        Ok(())
    }

    /// Load persisted users and transaction ids. Seeded balances start clean.
    pub async fn bootstrap(&self, store: &dyn RecordStore) -> Result<(), LedgerError> {
        let users = store.load_all_users().await?;
        let ids = store.load_all_transaction_ids().await?;
        info!(users = users.len(), transactions = ids.len(), "ledger bootstrapped");
        self.seed(users, ids);
        Ok(())
    }

    pub fn seed(
        &self,
        users: impl IntoIterator<Item = BalanceUpdate>,
        ids: impl IntoIterator<Item = TxId>,
    ) {
        let mut state = self.state();
        for user in users {
            state.balances.insert(user.user_id, user.amount);
        }
        state.registry.seed(ids);
    }

    /// Reverse the balance effect of a previously processed record.
    ///
    /// Reversing a win that would drive the balance negative is refused with
    /// [`LedgerError::InsufficientBalance`] and leaves the balance untouched.
    pub fn compensate(&self, record: &TransactionRecord) -> Result<Amount, LedgerError> {
        let reversal = -record.effect.delta(record.amount);
        let mut state = self.state();
        Ok(state.balances.apply_delta(&record.user_id, reversal)?)
    }

    pub fn balance(&self, user: &str) -> Option<Amount> {
        self.state().balances.get(user)
    }

    /// All balances, sorted by user id.
    pub fn balances(&self) -> Vec<BalanceUpdate> {
        self.state().balances.snapshot()
    }

    pub fn is_known_transaction(&self, id: &str) -> bool {
        self.state().registry.contains(id)
    }

    /// Copy of the records waiting to be persisted, oldest first.
    pub fn pending_records(&self) -> Vec<TransactionRecord> {
        self.state().pending.iter().cloned().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn dirty_len(&self) -> usize {
        self.state().balances.dirty_len()
    }

    /// Remove up to `max` of the oldest pending records for persistence.
    pub fn take_pending(&self, max: usize) -> Vec<TransactionRecord> {
        self.state().pending.take_batch(max)
    }

    /// Return a batch that failed to persist to the head of the queue.
    pub fn requeue_pending(&self, batch: Vec<TransactionRecord>) {
        self.state().pending.requeue(batch);
    }

    /// Snapshot up to `max` dirty balances and mark them clean.
    pub fn drain_dirty(&self, max: usize) -> Vec<BalanceUpdate> {
        self.state().balances.drain_dirty(max)
    }

    /// Mark users dirty again after a failed sync.
    pub fn mark_dirty<'a>(&self, users: impl IntoIterator<Item = &'a str>) {
        let mut state = self.state();
        for user in users {
            state.balances.mark_dirty(user);
        }
    }
}

/// Private API
impl LedgerService {
    fn state(&self) -> MutexGuard<'_, LedgerState> {
        // every mutation leaves the state consistent before any panic point,
        // so a poisoned lock is still safe to use
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reserve_registration<'a>(
        &'a self,
        user: &'a str,
    ) -> Result<RegistrationSlot<'a>, LedgerError> {
        let mut state = self.state();
        if state.balances.contains(user) || state.registering.contains(user) {
            return Err(LedgerError::UserAlreadyRegistered(user.to_string()));
        }
        if let Some(max) = self.max_users {
            if state.balances.len() + state.registering.len() >= max {
                return Err(LedgerError::UserLimitReached(max));
            }
        }
        state.registering.insert(user.to_string());
        Ok(RegistrationSlot { ledger: self, user })
    }

    /// Validate, then check and mutate under the lock:
    /// - Parse amount and source (no lock needed)
    /// - Reject empty transaction ids and unknown users
    /// - Reserve the transaction id
    /// - Apply the signed delta
    /// - Enqueue a `Processed` or `Errored` record
    fn apply_event(&self, event: &Event) -> Result<Amount, LedgerError> {
        let amount: Amount = event.amount.parse()?;
        let source = SourceType::from_name(&event.source)
            .ok_or_else(|| LedgerError::UnknownSource(event.source.clone()))?;
        if event.transaction_id.is_empty() {
            return Err(LedgerError::EmptyTransactionId);
        }

        let mut state = self.state();

        if !state.balances.contains(&event.user_id) {
            return Err(LedgerError::UserNotFound(event.user_id.clone()));
        }

        if !state.registry.try_reserve(&event.transaction_id) {
            return Err(LedgerError::DuplicateTransaction(event.transaction_id.clone()));
        }

        let applied = state
            .balances
            .apply_delta(&event.user_id, event.effect.delta(amount));

        let status = match applied {
            Ok(_) => ProcessingStatus::Processed,
            Err(_) => ProcessingStatus::Errored,
        };
        state.pending.append(TransactionRecord::new(
            event.user_id.clone(),
            event.effect,
            amount,
            event.transaction_id.clone(),
            source,
            status,
        ));

        Ok(applied?)
    }

    /// Small helper to log `apply` results
    fn log_result(event: &Event, result: &Result<Amount, LedgerError>) {
        match result {
            Ok(balance) => {
                info!(
                    user = %event.user_id,
                    tx = %event.transaction_id,
                    amount = %event.amount,
                    balance = %balance,
                    "{} applied",
                    event.effect
                );
            }
            Err(LedgerError::DuplicateTransaction(_)) => {
                debug!(
                    user = %event.user_id,
                    tx = %event.transaction_id,
                    "{} ignored as duplicate",
                    event.effect
                );
            }
            Err(e) => {
                info!(
                    user = %event.user_id,
                    tx = %event.transaction_id,
                    amount = %event.amount,
                    reason = %e,
                    "{} rejected",
                    event.effect
                );
            }
        }
    }
}

/// Releases a registration slot when `register_user` returns or is dropped.
struct RegistrationSlot<'a> {
    ledger: &'a LedgerService,
    user: &'a str,
}

impl Drop for RegistrationSlot<'_> {
    fn drop(&mut self) {
        self.ledger.state().registering.remove(self.user);
    }
}

/// Effect of a record once compensated, for logging.
pub(crate) fn reversal_label(effect: Effect) -> &'static str {
    match effect {
        Effect::Win => "win reversed",
        Effect::Lose => "lose refunded",
    }
}

/// User ids of a drained balance chunk.
pub(crate) fn user_ids(updates: &[BalanceUpdate]) -> impl Iterator<Item = &str> {
    updates.iter().map(|u| u.user_id.as_str())
}
