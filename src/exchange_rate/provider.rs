//! Live exchange rates from the Frankfurter API and the static fallback table.

use std::{collections::HashMap, str::FromStr, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{currency::Currency, exchange_rate::repository::RATE_DECIMAL_PLACES};

/// The public Frankfurter API.
pub const FRANKFURTER_API_URL: &str = "https://api.frankfurter.dev";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A mapping from currency to its rate relative to some base currency.
pub type RateTable = HashMap<Currency, Decimal>;

/// The ways fetching live rates can fail.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The request could not be sent, timed out or the body could not be decoded.
    #[error("could not fetch exchange rates: {0}")]
    Request(#[from] reqwest::Error),

    /// The API responded with a non-success status code.
    #[error("exchange rate API responded with status {0}")]
    Status(StatusCode),
}

/// A source of live exchange rates.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the rate of every supported currency relative to `base`.
    ///
    /// The returned table always maps `base` to 1.
    async fn fetch_rates(&self, base: Currency) -> Result<RateTable, ProviderError>;
}

/// Fetches the latest rates from a Frankfurter compatible API.
#[derive(Debug, Clone)]
pub struct FrankfurterProvider {
    client: Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct LatestRatesResponse {
    #[allow(dead_code)]
    amount: f64,
    #[allow(dead_code)]
    base: String,
    #[allow(dead_code)]
    date: String,
    rates: HashMap<String, f64>,
}

impl FrankfurterProvider {
    /// Create a provider for the API hosted at `api_url`, e.g.
    /// [FRANKFURTER_API_URL].
    pub fn new(api_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl RateProvider for FrankfurterProvider {
    async fn fetch_rates(&self, base: Currency) -> Result<RateTable, ProviderError> {
        let url = format!("{}/v1/latest", self.api_url);
        tracing::debug!("Fetching exchange rates for {base} from {url}");

        let response = self
            .client
            .get(&url)
            .query(&[("base", base.code())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status(response.status()));
        }

        let body: LatestRatesResponse = response.json().await?;

        Ok(parse_rates(base, body.rates))
    }
}

/// Keep the supported currencies from `rates` and make sure `base` maps to 1.
fn parse_rates(base: Currency, rates: HashMap<String, f64>) -> RateTable {
    let mut table: RateTable = rates
        .into_iter()
        .filter_map(|(code, rate)| {
            let currency = Currency::from_str(&code).ok()?;
            let rate = Decimal::try_from(rate).ok()?;

            Some((currency, rate.round_dp(RATE_DECIMAL_PLACES)))
        })
        .collect();

    table.insert(base, Decimal::ONE);

    table
}

/// The hardcoded rates relative to `base`, used when the live API is unavailable.
///
/// For USD this is the snapshot table as-is. For any other base the USD rates
/// are rebased, i.e. `rate(base → X) = usd_rate(X) / usd_rate(base)`, rounded
/// to six decimal places.
pub fn fallback_rates(base: Currency) -> RateTable {
    let usd_rate = |currency: Currency| currency.fallback_usd_rate().unwrap_or(Decimal::ONE);
    let base_rate = usd_rate(base);

    Currency::ALL
        .iter()
        .map(|&currency| {
            let rate = if currency == base {
                Decimal::ONE
            } else {
                (usd_rate(currency) / base_rate).round_dp(RATE_DECIMAL_PLACES)
            };

            (currency, rate)
        })
        .collect()
}
