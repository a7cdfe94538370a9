//! The user's display preferences.
//!
//! There is a single settings row. It is created with [DEFAULT_CURRENCY] the
//! first time it is read.

use rusqlite::Connection;

use crate::{
    Error,
    currency::{Currency, DEFAULT_CURRENCY},
};

/// The user's display preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// The currency that amounts from all accounts are converted into.
    pub currency: Currency,
}

/// Create the settings table in the database.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_settings_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS settings (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            currency TEXT NOT NULL
        )",
        (),
    )?;

    Ok(())
}

/// Get the settings, creating them with the default currency if they do not
/// exist yet.
///
/// # Errors
/// Returns [Error::SqlError] if there is an SQL error, e.g. the stored
/// currency code is not supported.
pub fn get_settings(connection: &Connection) -> Result<Settings, Error> {
    connection.execute(
        "INSERT INTO settings (id, currency) VALUES (1, ?1) ON CONFLICT(id) DO NOTHING",
        (DEFAULT_CURRENCY,),
    )?;

    let currency = connection.query_row("SELECT currency FROM settings WHERE id = 1", [], |row| {
        row.get(0)
    })?;

    Ok(Settings { currency })
}

/// Get the currency that amounts are displayed in.
///
/// # Errors
/// See [get_settings].
pub fn get_default_currency(connection: &Connection) -> Result<Currency, Error> {
    get_settings(connection).map(|settings| settings.currency)
}

/// Change the currency that amounts are displayed in.
///
/// # Errors
/// Returns [Error::SqlError] if there is an SQL error.
pub fn set_default_currency(currency: Currency, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO settings (id, currency) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET currency = excluded.currency",
        (currency,),
    )?;

    tracing::debug!("Default currency set to {currency}");

    Ok(())
}
