//! Core domain types for the ledger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Amount;

/// User identifier.
pub type UserId = String;

/// Caller-supplied transaction identifier, unique across the ledger.
pub type TxId = String;

/// Identifier assigned by the store when a record is persisted.
pub type RecordId = u64;

/// Direction of a balance-changing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Win,
    Lose,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Win => "win",
            Effect::Lose => "lose",
        }
    }

    /// Signed balance delta this effect applies for `amount`.
    pub fn delta(self, amount: Amount) -> Amount {
        match self {
            Effect::Win => amount,
            Effect::Lose => -amount,
        }
    }
}

impl FromStr for Effect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" => Ok(Effect::Win),
            "lose" => Ok(Effect::Lose),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of the system an event originates from.
///
/// New categories are added here and to [`SourceType::ALL`]; the lookup by
/// name goes through that table only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Game,
    Server,
    Payment,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [SourceType::Game, SourceType::Server, SourceType::Payment];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Game => "game",
            SourceType::Server => "server",
            SourceType::Payment => "payment",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a persisted transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Balance effect applied.
    Processed,
    /// Event recorded for audit, balance untouched.
    Errored,
    /// Balance effect reversed by compensation. Final.
    Canceled,
}

/// Inbound balance-changing event, as handed over by the transport layer.
///
/// `amount` and `source` are kept raw; [`LedgerService::apply`](crate::LedgerService::apply)
/// validates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub user_id: UserId,
    pub effect: Effect,
    pub amount: String,
    pub transaction_id: TxId,
    pub source: String,
}

/// One step of a [`LedgerService::run`](crate::LedgerService::run) stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register { user: UserId },
    Event(Event),
}

impl Event {
    pub fn win(user_id: &str, amount: &str, transaction_id: &str, source: &str) -> Self {
        Self::new(user_id, Effect::Win, amount, transaction_id, source)
    }

    pub fn lose(user_id: &str, amount: &str, transaction_id: &str, source: &str) -> Self {
        Self::new(user_id, Effect::Lose, amount, transaction_id, source)
    }

    fn new(user_id: &str, effect: Effect, amount: &str, transaction_id: &str, source: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            effect,
            amount: amount.to_string(),
            transaction_id: transaction_id.to_string(),
            source: source.to_string(),
        }
    }
}

/// Audit record of an event that passed the idempotency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub user_id: UserId,
    pub effect: Effect,
    pub amount: Amount,
    pub transaction_id: TxId,
    pub source: SourceType,
    pub status: ProcessingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(
        user_id: UserId,
        effect: Effect,
        amount: Amount,
        transaction_id: TxId,
        source: SourceType,
        status: ProcessingStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            effect,
            amount,
            transaction_id,
            source,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the record as compensated.
    pub fn cancel(&mut self) {
        self.status = ProcessingStatus::Canceled;
        self.updated_at = Utc::now();
    }
}

/// A record as held by the store, with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub record: TransactionRecord,
}

/// A balance snapshot exchanged with the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub user_id: UserId,
    pub amount: Amount,
}
