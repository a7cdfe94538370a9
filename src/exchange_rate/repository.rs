//! Persistence for cached exchange rates.
//!
//! The cache talks to storage through [RateRepository] so that the SQLite
//! table can be swapped for [InMemoryRateRepository] in tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use rand::Rng;
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::{Error, currency::Currency, db::get_decimal};

/// The number of decimal places that rates are stored with.
pub const RATE_DECIMAL_PLACES: u32 = 6;

const ID_LENGTH: usize = 12;
const ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";

/// A cached exchange rate such that `amount_in_target = amount_in_base * rate`.
///
/// There is at most one record per (base, target) pair. Records are updated
/// in place when refreshed and are never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRate {
    /// An opaque, randomly generated identifier.
    pub id: String,
    /// The currency being converted from.
    pub base_currency: Currency,
    /// The currency being converted to.
    pub target_currency: Currency,
    /// The rate, with [RATE_DECIMAL_PLACES] decimal places.
    pub rate: Decimal,
    /// When the rate was last written.
    pub updated_at: OffsetDateTime,
    /// When the rate should no longer be served from the cache.
    pub expires_at: OffsetDateTime,
}

impl ExchangeRate {
    /// Whether the rate can still be served at time `now`.
    ///
    /// There is no stored staleness flag, a record goes stale the moment
    /// `expires_at` is no longer in the future.
    pub fn is_fresh(&self, now: OffsetDateTime) -> bool {
        self.expires_at > now
    }
}

/// Storage for cached exchange rates.
pub trait RateRepository: Send + Sync {
    /// Get the record for exactly (`base`, `target`), fresh or stale.
    ///
    /// # Errors
    /// Returns an error if the storage cannot be read.
    fn find(&self, base: Currency, target: Currency) -> Result<Option<ExchangeRate>, Error>;

    /// Get every record whose base currency is `base` that is still fresh at
    /// time `now`, ordered by target currency.
    ///
    /// # Errors
    /// Returns an error if the storage cannot be read.
    fn find_fresh_for_base(
        &self,
        base: Currency,
        now: OffsetDateTime,
    ) -> Result<Vec<ExchangeRate>, Error>;

    /// Update the record for (`base`, `target`) in place if one exists,
    /// regardless of whether it has expired, otherwise insert a new record
    /// with a freshly generated ID.
    ///
    /// `now` is recorded as the update time. Returns the stored record.
    ///
    /// # Errors
    /// Returns an error if the storage cannot be written.
    fn upsert(
        &self,
        base: Currency,
        target: Currency,
        rate: Decimal,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<ExchangeRate, Error>;
}

/// Generate a 12 character, URL safe identifier for a new exchange rate record.
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();

    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Create the exchange rate table in the database.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_exchange_rate_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS exchange_rate (
            id TEXT PRIMARY KEY,
            base_currency TEXT NOT NULL,
            target_currency TEXT NOT NULL,
            rate TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            UNIQUE(base_currency, target_currency)
        )",
        (),
    )?;

    Ok(())
}

fn map_exchange_rate_row(row: &Row) -> Result<ExchangeRate, rusqlite::Error> {
    Ok(ExchangeRate {
        id: row.get(0)?,
        base_currency: row.get(1)?,
        target_currency: row.get(2)?,
        rate: get_decimal(row, 3)?,
        updated_at: row.get(4)?,
        expires_at: row.get(5)?,
    })
}

/// A [RateRepository] backed by the `exchange_rate` table.
#[derive(Debug, Clone)]
pub struct SQLiteRateRepository {
    connection: Arc<Mutex<Connection>>,
}

impl SQLiteRateRepository {
    /// Create a repository that shares `connection` with the rest of the app.
    ///
    /// The `exchange_rate` table must already exist, see [crate::initialize_db].
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.connection
            .lock()
            .inspect_err(|error| tracing::error!("could not acquire database lock: {error}"))
            .map_err(|_| Error::DatabaseLockError)
    }
}

impl RateRepository for SQLiteRateRepository {
    fn find(&self, base: Currency, target: Currency) -> Result<Option<ExchangeRate>, Error> {
        let connection = self.lock()?;

        let rate = connection
            .prepare(
                "SELECT id, base_currency, target_currency, rate, updated_at, expires_at
                 FROM exchange_rate
                 WHERE base_currency = ?1 AND target_currency = ?2",
            )?
            .query_row((base, target), map_exchange_rate_row);

        match rate {
            Ok(rate) => Ok(Some(rate)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn find_fresh_for_base(
        &self,
        base: Currency,
        now: OffsetDateTime,
    ) -> Result<Vec<ExchangeRate>, Error> {
        let connection = self.lock()?;

        // Expiry is checked on the decoded timestamps since the stored text
        // does not have a fixed width.
        let rates = connection
            .prepare(
                "SELECT id, base_currency, target_currency, rate, updated_at, expires_at
                 FROM exchange_rate
                 WHERE base_currency = ?1
                 ORDER BY target_currency ASC",
            )?
            .query_map((base,), map_exchange_rate_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rates.into_iter().filter(|rate| rate.is_fresh(now)).collect())
    }

    fn upsert(
        &self,
        base: Currency,
        target: Currency,
        rate: Decimal,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<ExchangeRate, Error> {
        let connection = self.lock()?;

        // The ID is only used when the pair does not exist yet, on conflict the
        // existing row keeps its ID.
        let stored = connection
            .prepare(
                "INSERT INTO exchange_rate
                    (id, base_currency, target_currency, rate, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(base_currency, target_currency) DO UPDATE SET
                    rate = excluded.rate,
                    updated_at = excluded.updated_at,
                    expires_at = excluded.expires_at
                 RETURNING id, base_currency, target_currency, rate, updated_at, expires_at",
            )?
            .query_row(
                (
                    generate_id(),
                    base,
                    target,
                    rate.round_dp(RATE_DECIMAL_PLACES).to_string(),
                    now,
                    expires_at,
                ),
                map_exchange_rate_row,
            )?;

        Ok(stored)
    }
}

/// A [RateRepository] that keeps rates in memory.
///
/// Rates do not survive a restart, which makes this useful for tests and for
/// running without a database file.
#[derive(Debug, Default)]
pub struct InMemoryRateRepository {
    rates: Mutex<HashMap<(Currency, Currency), ExchangeRate>>,
}

impl InMemoryRateRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<(Currency, Currency), ExchangeRate>>, Error> {
        self.rates
            .lock()
            .inspect_err(|error| tracing::error!("could not acquire rate store lock: {error}"))
            .map_err(|_| Error::DatabaseLockError)
    }
}

impl RateRepository for InMemoryRateRepository {
    fn find(&self, base: Currency, target: Currency) -> Result<Option<ExchangeRate>, Error> {
        Ok(self.lock()?.get(&(base, target)).cloned())
    }

    fn find_fresh_for_base(
        &self,
        base: Currency,
        now: OffsetDateTime,
    ) -> Result<Vec<ExchangeRate>, Error> {
        let mut rates: Vec<ExchangeRate> = self
            .lock()?
            .values()
            .filter(|rate| rate.base_currency == base && rate.is_fresh(now))
            .cloned()
            .collect();
        rates.sort_by_key(|rate| rate.target_currency);

        Ok(rates)
    }

    fn upsert(
        &self,
        base: Currency,
        target: Currency,
        rate: Decimal,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<ExchangeRate, Error> {
        let rate = rate.round_dp(RATE_DECIMAL_PLACES);
        let mut rates = self.lock()?;

        let stored = rates
            .entry((base, target))
            .and_modify(|existing| {
                existing.rate = rate;
                existing.updated_at = now;
                existing.expires_at = expires_at;
            })
            .or_insert_with(|| ExchangeRate {
                id: generate_id(),
                base_currency: base,
                target_currency: target,
                rate,
                updated_at: now,
                expires_at,
            });

        Ok(stored.clone())
    }
}


#[cfg(test)]
mod in_memory_rate_repository_tests {
    use rust_decimal_macros::dec;
    use time::{Duration, macros::datetime};

    use crate::{
        currency::Currency,
        exchange_rate::repository::{InMemoryRateRepository, RateRepository},
    };

    #[test]
    fn upsert_keeps_id_and_replaces_rate() {
        let repository = InMemoryRateRepository::new();
        let now = datetime!(2025-11-01 09:00 UTC);
        let inserted = repository
            .upsert(
                Currency::USD,
                Currency::CAD,
                dec!(1.40),
                now + Duration::hours(12),
                now,
            )
            .unwrap();

        let later = now + Duration::days(1);
        let updated = repository
            .upsert(
                Currency::USD,
                Currency::CAD,
                dec!(1.41),
                later + Duration::hours(12),
                later,
            )
            .unwrap();

        assert_eq!(updated.id, inserted.id);
        assert_eq!(updated.rate, dec!(1.41));
        assert_eq!(updated.updated_at, later);
    }

    #[test]
    fn find_fresh_for_base_is_sorted_by_target() {
        let repository = InMemoryRateRepository::new();
        let now = datetime!(2025-11-01 09:00 UTC);
        for (target, rate) in [
            (Currency::ZAR, dec!(17.349)),
            (Currency::AUD, dec!(1.5295)),
        ] {
            repository
                .upsert(Currency::USD, target, rate, now + Duration::hours(12), now)
                .unwrap();
        }

        let targets: Vec<Currency> = repository
            .find_fresh_for_base(Currency::USD, now)
            .unwrap()
            .into_iter()
            .map(|rate| rate.target_currency)
            .collect();

        assert_eq!(targets, vec![Currency::AUD, Currency::ZAR]);
    }
}
