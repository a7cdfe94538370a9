//! Exchange rates: the live provider, the persisted cache and the fallback table.

mod cache;
mod provider;
mod repository;

pub use cache::{Clock, EXPIRATION_HOURS, ExchangeRateCache, SystemClock};
pub use provider::{
    FRANKFURTER_API_URL, FrankfurterProvider, ProviderError, RateProvider, RateTable,
    fallback_rates,
};
pub use repository::{
    ExchangeRate, InMemoryRateRepository, RateRepository, SQLiteRateRepository,
    create_exchange_rate_table,
};

#[cfg(test)]
pub(crate) use cache::test_doubles;
