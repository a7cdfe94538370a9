//! The cache-aside layer that serves exchange rates from storage and refreshes
//! them from the live provider when they expire.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use rust_decimal::Decimal;
use time::{Duration, OffsetDateTime};
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    Error,
    currency::Currency,
    exchange_rate::{
        provider::{RateProvider, RateTable, fallback_rates},
        repository::RateRepository,
    },
};

/// How long a fetched rate is served from the cache before it is refreshed.
pub const EXPIRATION_HOURS: i64 = 12;

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// The current time in UTC.
    fn now(&self) -> OffsetDateTime;
}

/// A [Clock] that reads the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Serves exchange rates from a [RateRepository], fetching from a
/// [RateProvider] when a rate is missing or has expired.
///
/// Provider failures never reach the caller: the static table from
/// [fallback_rates] is used instead.
pub struct ExchangeRateCache {
    repository: Arc<dyn RateRepository>,
    provider: Arc<dyn RateProvider>,
    clock: Arc<dyn Clock>,
    /// One lock per base currency so that concurrent misses for the same base
    /// result in a single provider call.
    fetch_locks: HashMap<Currency, Mutex<()>>,
}

impl ExchangeRateCache {
    /// Create a cache over `repository` that refreshes rates from `provider`.
    pub fn new(
        repository: Arc<dyn RateRepository>,
        provider: Arc<dyn RateProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let fetch_locks = Currency::ALL
            .iter()
            .map(|&currency| (currency, Mutex::new(())))
            .collect();

        Self {
            repository,
            provider,
            clock,
            fetch_locks,
        }
    }

    /// Get the rate such that `amount_in_to = amount_in_from * rate`.
    ///
    /// # Errors
    /// Returns [Error::RateNotFound] if neither the live provider nor the
    /// fallback table has a rate for `to`, or an error if storage fails.
    pub async fn get_rate(&self, from: Currency, to: Currency) -> Result<Decimal, Error> {
        if from == to {
            return Ok(Decimal::ONE);
        }

        if let Some(rate) = self.find_fresh(from, to)? {
            tracing::debug!("Cache hit for {from}→{to}: {rate}");
            return Ok(rate);
        }

        let _guard = self.lock_base(from).await;

        // Another caller may have refreshed the rate while we waited for the lock.
        if let Some(rate) = self.find_fresh(from, to)? {
            tracing::debug!("Cache hit for {from}→{to} after waiting for refresh: {rate}");
            return Ok(rate);
        }

        tracing::info!("Cache miss for {from}→{to}, fetching rates");
        let table = self.fetch_or_fallback(from).await;

        let rate = *table.get(&to).ok_or(Error::RateNotFound { from, to })?;
        let now = self.clock.now();
        self.repository
            .upsert(from, to, rate, self.expiry_from(now), now)?;

        Ok(rate)
    }

    /// Get the rates from `from` to each of `to_currencies` with at most one
    /// provider call.
    ///
    /// The result always maps `from` to 1. Duplicate targets are ignored and
    /// targets that neither the cache nor the provider know about are left out.
    ///
    /// # Errors
    /// Returns an error if storage fails.
    pub async fn get_rates(
        &self,
        from: Currency,
        to_currencies: &[Currency],
    ) -> Result<HashMap<Currency, Decimal>, Error> {
        let targets: BTreeSet<Currency> = to_currencies
            .iter()
            .copied()
            .filter(|&currency| currency != from)
            .collect();

        let mut rates = HashMap::from([(from, Decimal::ONE)]);

        if targets.is_empty() {
            return Ok(rates);
        }

        let mut needs_fetch = self.collect_fresh(from, &targets, &mut rates)?;

        if needs_fetch.is_empty() {
            tracing::debug!("All {} rates for {from} served from cache", targets.len());
            return Ok(rates);
        }

        let _guard = self.lock_base(from).await;

        needs_fetch = self.collect_fresh(from, &needs_fetch, &mut rates)?;

        if needs_fetch.is_empty() {
            return Ok(rates);
        }

        tracing::info!(
            "Fetching {} of {} rates for {from}",
            needs_fetch.len(),
            targets.len()
        );
        let table = self.fetch_or_fallback(from).await;
        let now = self.clock.now();
        let expires_at = self.expiry_from(now);

        for target in needs_fetch {
            match table.get(&target) {
                Some(&rate) => {
                    self.repository
                        .upsert(from, target, rate, expires_at, now)?;
                    rates.insert(target, rate);
                }
                None => tracing::debug!("No rate available for {from}→{target}, skipping"),
            }
        }

        Ok(rates)
    }

    fn find_fresh(&self, from: Currency, to: Currency) -> Result<Option<Decimal>, Error> {
        let now = self.clock.now();

        Ok(self
            .repository
            .find(from, to)?
            .filter(|rate| rate.is_fresh(now))
            .map(|rate| rate.rate))
    }

    /// Add the fresh cached rates for `targets` to `rates` and return the
    /// targets that still need fetching.
    fn collect_fresh(
        &self,
        from: Currency,
        targets: &BTreeSet<Currency>,
        rates: &mut HashMap<Currency, Decimal>,
    ) -> Result<BTreeSet<Currency>, Error> {
        let cached = self
            .repository
            .find_fresh_for_base(from, self.clock.now())?;

        for rate in cached {
            if targets.contains(&rate.target_currency) {
                rates.insert(rate.target_currency, rate.rate);
            }
        }

        Ok(targets
            .iter()
            .copied()
            .filter(|target| !rates.contains_key(target))
            .collect())
    }

    async fn lock_base(&self, base: Currency) -> Option<MutexGuard<'_, ()>> {
        match self.fetch_locks.get(&base) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }

    async fn fetch_or_fallback(&self, base: Currency) -> RateTable {
        match self.provider.fetch_rates(base).await {
            Ok(table) => table,
            Err(error) => {
                tracing::warn!("Could not fetch live rates for {base}, using fallback rates: {error}");
                fallback_rates(base)
            }
        }
    }

    fn expiry_from(&self, now: OffsetDateTime) -> OffsetDateTime {
        now + Duration::hours(EXPIRATION_HOURS)
    }
}


#[cfg(test)]
mod get_rate_tests {
    use std::{sync::Arc, time::Duration as StdDuration};

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use time::{Duration, OffsetDateTime, macros::datetime};

    use crate::{
        Error,
        currency::Currency,
        exchange_rate::{
            cache::{
                ExchangeRateCache,
                test_doubles::{FixedClock, StubProvider},
            },
            repository::{InMemoryRateRepository, RateRepository},
        },
    };

    const NOW: OffsetDateTime = datetime!(2025-11-01 09:00 UTC);

    struct Fixture {
        repository: Arc<InMemoryRateRepository>,
        provider: Arc<StubProvider>,
        clock: Arc<FixedClock>,
        cache: ExchangeRateCache,
    }

    fn fixture(provider: StubProvider) -> Fixture {
        let repository = Arc::new(InMemoryRateRepository::new());
        let provider = Arc::new(provider);
        let clock = Arc::new(FixedClock::new(NOW));
        let cache = ExchangeRateCache::new(repository.clone(), provider.clone(), clock.clone());

        Fixture {
            repository,
            provider,
            clock,
            cache,
        }
    }

    #[tokio::test]
    async fn same_currency_is_one_without_lookups() {
        let Fixture {
            repository,
            provider,
            cache,
            ..
        } = fixture(StubProvider::with_rates(&[]));

        for &currency in Currency::ALL {
            assert_eq!(cache.get_rate(currency, currency).await, Ok(Decimal::ONE));
        }

        assert_eq!(provider.calls(), 0);
        assert!(
            repository
                .find_fresh_for_base(Currency::USD, NOW)
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn fetches_and_stores_on_empty_cache() {
        let Fixture {
            repository,
            provider,
            cache,
            ..
        } = fixture(StubProvider::with_rates(&[(Currency::EUR, dec!(0.9))]));

        let rate = cache.get_rate(Currency::USD, Currency::EUR).await;

        assert_eq!(rate, Ok(dec!(0.9)));
        assert_eq!(provider.calls(), 1);
        let stored = repository
            .find(Currency::USD, Currency::EUR)
            .unwrap()
            .expect("rate should have been stored");
        assert_eq!(stored.rate, dec!(0.9));
        assert_eq!(stored.updated_at, NOW);
        assert_eq!(stored.expires_at, NOW + Duration::hours(12));
    }

    #[tokio::test]
    async fn fresh_cached_rate_skips_provider() {
        let Fixture {
            repository,
            provider,
            cache,
            ..
        } = fixture(StubProvider::with_rates(&[(Currency::GBP, dec!(0.8))]));
        repository
            .upsert(
                Currency::USD,
                Currency::GBP,
                dec!(0.75),
                NOW + Duration::hours(1),
                NOW - Duration::hours(11),
            )
            .unwrap();

        let rate = cache.get_rate(Currency::USD, Currency::GBP).await;

        assert_eq!(rate, Ok(dec!(0.75)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn expired_rate_is_refreshed_in_place() {
        let Fixture {
            repository,
            provider,
            cache,
            ..
        } = fixture(StubProvider::with_rates(&[(Currency::GBP, dec!(0.8))]));
        let stale = repository
            .upsert(
                Currency::USD,
                Currency::GBP,
                dec!(0.75),
                NOW,
                NOW - Duration::hours(12),
            )
            .unwrap();

        let rate = cache.get_rate(Currency::USD, Currency::GBP).await;

        assert_eq!(rate, Ok(dec!(0.8)));
        assert_eq!(provider.calls(), 1);
        let refreshed = repository
            .find(Currency::USD, Currency::GBP)
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.id, stale.id);
        assert_eq!(refreshed.rate, dec!(0.8));
        assert_eq!(refreshed.expires_at, NOW + Duration::hours(12));
    }

    #[tokio::test]
    async fn sequential_calls_fetch_once() {
        let Fixture { provider, cache, .. } =
            fixture(StubProvider::with_rates(&[(Currency::JPY, dec!(154.18))]));

        let first = cache.get_rate(Currency::USD, Currency::JPY).await;
        let second = cache.get_rate(Currency::USD, Currency::JPY).await;

        assert_eq!(first, Ok(dec!(154.18)));
        assert_eq!(second, Ok(dec!(154.18)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn refetches_after_expiry() {
        let Fixture {
            provider,
            clock,
            cache,
            ..
        } = fixture(StubProvider::with_rates(&[(Currency::JPY, dec!(154.18))]));

        cache.get_rate(Currency::USD, Currency::JPY).await.unwrap();
        clock.advance(Duration::hours(11));
        cache.get_rate(Currency::USD, Currency::JPY).await.unwrap();
        clock.advance(Duration::hours(1));
        cache.get_rate(Currency::USD, Currency::JPY).await.unwrap();

        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_fetch_once() {
        let Fixture { provider, cache, .. } = fixture(
            StubProvider::with_rates(&[(Currency::JPY, dec!(154.18))])
                .with_delay(StdDuration::from_millis(50)),
        );
        let cache = Arc::new(cache);

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_rate(Currency::USD, Currency::JPY).await }
        });
        let second = tokio::spawn({
            let cache = cache.clone();
            async move { cache.get_rate(Currency::USD, Currency::JPY).await }
        });

        assert_eq!(first.await.unwrap(), Ok(dec!(154.18)));
        assert_eq!(second.await.unwrap(), Ok(dec!(154.18)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn provider_failure_uses_fallback() {
        let Fixture {
            repository, cache, ..
        } = fixture(StubProvider::failing());

        let rate = cache.get_rate(Currency::USD, Currency::EUR).await;

        assert_eq!(rate, Ok(dec!(0.8655)));
        assert!(
            repository
                .find(Currency::USD, Currency::EUR)
                .unwrap()
                .is_some(),
            "fallback rates should be cached too"
        );
    }

    #[tokio::test]
    async fn missing_target_is_rate_not_found() {
        let Fixture { cache, .. } =
            fixture(StubProvider::with_rates(&[(Currency::EUR, dec!(0.9))]));

        let rate = cache.get_rate(Currency::USD, Currency::KRW).await;

        assert_eq!(
            rate,
            Err(Error::RateNotFound {
                from: Currency::USD,
                to: Currency::KRW
            })
        );
    }
}


#[cfg(test)]
mod sqlite_cache_tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;
    use rust_decimal_macros::dec;
    use time::{Duration, OffsetDateTime, macros::datetime};

    use crate::{
        currency::Currency,
        db::initialize,
        exchange_rate::{
            cache::{
                ExchangeRateCache,
                test_doubles::{FixedClock, StubProvider},
            },
            repository::{RateRepository, SQLiteRateRepository},
        },
    };

    const NOW: OffsetDateTime = datetime!(2025-11-01 09:00 UTC);

    #[tokio::test]
    async fn stores_and_refreshes_rates_in_sqlite() {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).unwrap();
        let repository = Arc::new(SQLiteRateRepository::new(Arc::new(Mutex::new(connection))));
        let provider = Arc::new(StubProvider::with_rates(&[(Currency::JPY, dec!(154.18))]));
        let clock = Arc::new(FixedClock::new(NOW));
        let cache = ExchangeRateCache::new(repository.clone(), provider.clone(), clock.clone());

        let first = cache.get_rate(Currency::USD, Currency::JPY).await;
        let second = cache.get_rate(Currency::USD, Currency::JPY).await;

        assert_eq!(first, Ok(dec!(154.18)));
        assert_eq!(second, Ok(dec!(154.18)));
        assert_eq!(provider.calls(), 1);
        let stored = repository
            .find(Currency::USD, Currency::JPY)
            .unwrap()
            .expect("rate should have been stored");
        assert_eq!(stored.rate, dec!(154.18));
        assert_eq!(stored.expires_at, NOW + Duration::hours(12));

        clock.advance(Duration::hours(12));
        let refreshed_rate = cache.get_rate(Currency::USD, Currency::JPY).await;

        assert_eq!(refreshed_rate, Ok(dec!(154.18)));
        assert_eq!(provider.calls(), 2);
        let refreshed = repository
            .find(Currency::USD, Currency::JPY)
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.id, stored.id);
        assert_eq!(refreshed.updated_at, NOW + Duration::hours(12));
        assert_eq!(refreshed.expires_at, NOW + Duration::hours(24));
    }
}
