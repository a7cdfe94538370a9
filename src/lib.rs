//! Flowbook is a self-hosted web app for tracking a personal budget across
//! accounts held in different currencies.
//!
//! This library provides the exchange rate cache, the account and transaction
//! storage, and a web server that serves the account summary as HTML.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::response::{IntoResponse, Response};
use axum_server::Handle;
use tokio::signal;

mod account;
mod app_state;
mod currency;
mod database_id;
mod db;
mod endpoints;
mod exchange_rate;
mod html;
mod internal_server_error;
mod logging;
mod not_found;
mod routing;
mod settings;
mod summary;
#[cfg(test)]
mod test_utils;
mod timezone;
mod transaction;

pub use account::{
    Account, AccountKind, AccountWithBalance, create_account, get_accounts_with_balances,
};
pub use app_state::AppState;
pub use currency::{Currency, DEFAULT_CURRENCY, convert};
pub use database_id::{AccountId, TransactionId};
pub use db::initialize as initialize_db;
pub use exchange_rate::{
    Clock, EXPIRATION_HOURS, ExchangeRate, ExchangeRateCache, FRANKFURTER_API_URL,
    FrankfurterProvider, InMemoryRateRepository, ProviderError, RateProvider, RateRepository,
    RateTable, SQLiteRateRepository, SystemClock, fallback_rates,
};
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use routing::build_router;
pub use settings::{Settings, get_default_currency, get_settings, set_default_currency};
pub use summary::{AccountsSummary, ConvertedAccount, build_summary};
pub use timezone::get_local_offset;
pub use transaction::{
    MonthlyTotals, Transaction, TransactionBuilder, TransactionKind, create_transaction,
    get_monthly_totals,
};

use crate::{internal_server_error::InternalServerError, not_found::get_404_not_found_response};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!("could not listen for the Ctrl+C signal: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!("could not install the terminate signal handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
        },
    }

    handle.graceful_shutdown(Some(Duration::from_secs(1)));
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// Neither the cache nor the rate provider (live or fallback) had a rate
    /// for the currency pair.
    #[error("rate not found for {from}→{to}")]
    RateNotFound {
        /// The currency being converted from.
        from: Currency,
        /// The currency being converted to.
        to: Currency,
    },

    /// A string that is not one of the supported currency codes.
    #[error("\"{0}\" is not a supported currency code")]
    InvalidCurrency(String),

    /// The account name already exists in the database.
    #[error("the account \"{0}\" already exists in the database")]
    DuplicateAccountName(String),

    /// The account ID used to create a transaction did not match an account.
    #[error("the account ID {0} does not refer to a valid account")]
    InvalidAccount(AccountId),

    /// An error occurred while getting the local timezone from a canonical timezone string.
    #[error("invalid timezone {0}")]
    InvalidTimezoneError(String),

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::NotFound => get_404_not_found_response(),
            Error::InvalidTimezoneError(timezone) => InternalServerError {
                description: "Invalid Timezone Settings",
                fix: &format!(
                    "Could not get local timezone \"{timezone}\". Check your server settings and \
                    ensure the timezone has been set to valid, canonical timezone string"
                ),
            }
            .into_response(),
            Error::DatabaseLockError => InternalServerError::default().into_response(),
            // Any errors that are not handled above are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                InternalServerError::default().into_response()
            }
        }
    }
}
