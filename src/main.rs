use std::env;
use std::path::Path;
use std::sync::Arc;

use ledger_core::csv::{read_commands, write_balances};
use ledger_core::store::{MemoryStore, RecordStore};
use ledger_core::tasks::{BackgroundTasks, flush_records_once, sync_balances_once};
use ledger_core::{LedgerConfig, LedgerService};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = env::args()
        .nth(1)
        .expect("usage: ledger-core <events.csv>");

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = match LedgerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    let commands = match read_commands(Path::new(&path)) {
        Ok(commands) => commands,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let ledger = Arc::new(LedgerService::with_max_users(config.max_users));
    if let Err(e) = ledger.bootstrap(store.as_ref()).await {
        warn!("bootstrap failed, starting empty: {e}");
    }

    let tasks = BackgroundTasks::spawn(Arc::clone(&ledger), Arc::clone(&store), &config);
    let (command_sender, command_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    if command_sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    ledger
        .run(store.as_ref(), ReceiverStream::new(command_receiver))
        .await;

    tasks.shutdown().await;
    drain(&ledger, store.as_ref(), config.batch_cap).await;

    if let Err(e) = write_balances(&ledger.balances()) {
        error!("{e}");
        std::process::exit(1);
    }
}

/// Persist whatever the stopped loops left behind.
async fn drain(ledger: &LedgerService, store: &dyn RecordStore, cap: usize) {
    loop {
        match flush_records_once(ledger, store, cap).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("final record flush failed: {e}");
                break;
            }
        }
    }
    loop {
        match sync_balances_once(ledger, store, cap).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("final balance sync failed: {e}");
                break;
            }
        }
    }
}
