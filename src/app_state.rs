//! Implements a struct that holds the state of the web server.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::{
    Error,
    db::initialize,
    exchange_rate::{ExchangeRateCache, FrankfurterProvider, SQLiteRateRepository, SystemClock},
};

/// The state of the web server.
#[derive(Clone)]
pub struct AppState {
    /// The local timezone as a canonical timezone name, e.g. "Pacific/Auckland".
    pub local_timezone: String,

    /// The database connection
    pub db_connection: Arc<Mutex<Connection>>,

    /// The exchange rate cache, which shares the database connection.
    pub exchange_rates: Arc<ExchangeRateCache>,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for the domain models.
    /// `local_timezone` should be a valid, canonical timezone name, e.g. "Pacific/Auckland".
    /// `rates_api_url` is the base URL of a Frankfurter compatible exchange rate API.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        local_timezone: &str,
        rates_api_url: &str,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;

        let connection = Arc::new(Mutex::new(db_connection));
        let exchange_rates = ExchangeRateCache::new(
            Arc::new(SQLiteRateRepository::new(connection.clone())),
            Arc::new(FrankfurterProvider::new(rates_api_url)),
            Arc::new(SystemClock),
        );

        Ok(Self {
            local_timezone: local_timezone.to_owned(),
            db_connection: connection,
            exchange_rates: Arc::new(exchange_rates),
        })
    }

    /// Create a new [AppState] around an existing exchange rate cache.
    ///
    /// The database is initialized as in [AppState::new].
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn with_exchange_rates(
        db_connection: Arc<Mutex<Connection>>,
        local_timezone: &str,
        exchange_rates: ExchangeRateCache,
    ) -> Result<Self, Error> {
        {
            let connection = db_connection
                .lock()
                .map_err(|_| Error::DatabaseLockError)?;
            initialize(&connection)?;
        }

        Ok(Self {
            local_timezone: local_timezone.to_owned(),
            db_connection,
            exchange_rates: Arc::new(exchange_rates),
        })
    }
}
