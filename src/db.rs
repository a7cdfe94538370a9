//! Database initialisation and helpers shared by the table modules.

use std::str::FromStr;

use rusqlite::{Connection, Row, Transaction as SqlTransaction, types::Type};
use rust_decimal::Decimal;

use crate::{
    Error, account::create_account_table, exchange_rate::create_exchange_rate_table,
    settings::create_settings_table, transaction::create_transaction_table,
};

/// Create all of the application's tables if they do not already exist.
///
/// Foreign key enforcement is switched on for `connection` before the tables
/// are created inside a single exclusive transaction.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    connection.pragma_update(None, "foreign_keys", "ON")?;

    let transaction =
        SqlTransaction::new_unchecked(connection, rusqlite::TransactionBehavior::Exclusive)?;

    create_account_table(&transaction)?;
    create_transaction_table(&transaction)?;
    create_settings_table(&transaction)?;
    create_exchange_rate_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}

/// Read the decimal stored as text in column `index` of `row`.
///
/// Decimals are stored as TEXT so that they keep their exact value, SQLite's
/// REAL would round them to the nearest binary float.
pub(crate) fn get_decimal(row: &Row, index: usize) -> Result<Decimal, rusqlite::Error> {
    let text: String = row.get(index)?;

    Decimal::from_str(&text)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error)))
}
