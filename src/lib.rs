pub mod amount;
pub mod config;
pub mod csv;
pub mod ledger;
pub mod model;
pub mod store;
pub mod tasks;

pub use amount::Amount;
pub use config::LedgerConfig;
pub use ledger::{LedgerError, LedgerService};
pub use model::{Command, Effect, Event, SourceType, TransactionRecord, TxId, UserId};
