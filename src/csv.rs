use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::model::{BalanceUpdate, Command, Effect, Event};

/// Errors that can occur when reading or writing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("cannot open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized row type '{row_type}'")]
    UnrecognizedType { line: usize, row_type: String },

    #[error("line {line}: {row_type} missing {field}")]
    MissingField {
        line: usize,
        row_type: String,
        field: &'static str,
    },

    #[error("failed to write balances: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush balances: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    user: String,
    tx: Option<String>,
    amount: Option<String>,
    source: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    user: &'a str,
    balance: String,
}

/// Read `register`, `win` and `lose` rows from a csv file
pub fn read_commands(
    path: &Path,
) -> Result<impl Iterator<Item = Result<Command, CsvError>> + use<>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row)
        }))
}

fn parse_row(line: usize, row: InputRow) -> Result<Command, CsvError> {
    let effect = match row.r#type.as_str() {
        "register" => return Ok(Command::Register { user: row.user }),
        "win" => Effect::Win,
        "lose" => Effect::Lose,
        other => {
            return Err(CsvError::UnrecognizedType {
                line,
                row_type: other.to_string(),
            });
        }
    };

    let missing = |field| CsvError::MissingField {
        line,
        row_type: effect.to_string(),
        field,
    };
    Ok(Command::Event(Event {
        user_id: row.user,
        effect,
        amount: row.amount.ok_or_else(|| missing("amount"))?,
        transaction_id: row.tx.ok_or_else(|| missing("tx"))?,
        source: row.source.ok_or_else(|| missing("source"))?,
    }))
}

/// write balances to stdout in csv format
pub fn write_balances(balances: &[BalanceUpdate]) -> Result<(), CsvError> {
    let stdout = io::stdout();
    write_balances_to(stdout.lock(), balances)
}

pub fn write_balances_to(out: impl io::Write, balances: &[BalanceUpdate]) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);
    for balance in balances {
        writer.serialize(OutputRow {
            user: &balance.user_id,
            balance: balance.amount.to_string(),
        })?;
    }
    writer.flush()?;
    Ok(())
}
