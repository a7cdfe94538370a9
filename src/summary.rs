//! Aggregates account balances and monthly totals held in different currencies
//! into the user's default currency.

use std::collections::{BTreeSet, HashMap};

use futures::future::try_join_all;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::{
    Error,
    account::{Account, AccountWithBalance},
    currency::{Currency, convert},
    exchange_rate::ExchangeRateCache,
    transaction::MonthlyTotals,
};

/// An account with its balance in its own currency and in the default currency.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedAccount {
    /// The account.
    pub account: Account,
    /// The balance in the account's currency.
    pub balance: Decimal,
    /// The balance in the default currency, rounded to two decimal places.
    pub converted_balance: Decimal,
}

/// The figures shown on the accounts page, all in [AccountsSummary::currency].
#[derive(Debug, Clone, PartialEq)]
pub struct AccountsSummary {
    /// The currency every total is expressed in.
    pub currency: Currency,
    /// The accounts with their converted balances.
    pub accounts: Vec<ConvertedAccount>,
    /// The sum of every account's converted balance.
    pub total_assets: Decimal,
    /// Income this month.
    pub monthly_income: Decimal,
    /// Expenses this month, as a positive amount.
    pub monthly_expenses: Decimal,
    /// Income minus expenses this month.
    pub net_cash_flow: Decimal,
}

/// Convert every account balance and monthly total into `currency`.
///
/// Each source currency is converted with its own `source → currency` rate so
/// that the stored rate is multiplied rather than inverted. This keeps full
/// precision when `currency` is worth little per unit, e.g. IDR or KRW, at the
/// cost of one cache lookup (and at most one provider call) per distinct
/// source currency. The lookups run concurrently.
///
/// # Errors
/// Returns [Error::RateNotFound] if there is no rate for one of the account
/// currencies, or an error if the rate cache cannot read or write storage.
pub async fn build_summary(
    accounts: Vec<AccountWithBalance>,
    totals: &MonthlyTotals,
    currency: Currency,
    exchange_rates: &ExchangeRateCache,
) -> Result<AccountsSummary, Error> {
    let sources: BTreeSet<Currency> = accounts
        .iter()
        .map(|account| account.account.currency)
        .chain(totals.income_by_currency.keys().copied())
        .chain(totals.expenses_by_currency.keys().copied())
        .filter(|&source| source != currency)
        .collect();

    let lookups = sources.into_iter().map(|source| async move {
        exchange_rates
            .get_rate(source, currency)
            .await
            .map(|rate| (source, rate))
    });
    let rates: HashMap<Currency, Decimal> = try_join_all(lookups).await?.into_iter().collect();

    summarise(accounts, totals, currency, &rates)
}

/// Convert with already resolved `rates`, where `rates[X]` converts from `X`
/// into `currency`.
fn summarise(
    accounts: Vec<AccountWithBalance>,
    totals: &MonthlyTotals,
    currency: Currency,
    rates: &HashMap<Currency, Decimal>,
) -> Result<AccountsSummary, Error> {
    let to_default = |amount: Decimal, source: Currency| -> Result<Decimal, Error> {
        if source == currency {
            return Ok(round_money(amount));
        }

        let rate = rates
            .get(&source)
            .copied()
            .filter(|rate| !rate.is_zero())
            .ok_or(Error::RateNotFound {
                from: source,
                to: currency,
            })?;

        Ok(round_money(convert(amount, rate)))
    };

    let accounts = accounts
        .into_iter()
        .map(|AccountWithBalance { account, balance }| {
            Ok(ConvertedAccount {
                converted_balance: to_default(balance, account.currency)?,
                account,
                balance,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    let total_assets = accounts
        .iter()
        .map(|account| account.converted_balance)
        .sum();

    let mut monthly_income = Decimal::ZERO;
    for (&source, &amount) in &totals.income_by_currency {
        monthly_income += to_default(amount, source)?;
    }

    let mut monthly_expenses = Decimal::ZERO;
    for (&source, &amount) in &totals.expenses_by_currency {
        monthly_expenses += to_default(amount, source)?;
    }

    Ok(AccountsSummary {
        currency,
        accounts,
        total_assets,
        monthly_income,
        monthly_expenses,
        net_cash_flow: monthly_income - monthly_expenses,
    })
}

fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}


#[cfg(test)]
mod build_summary_tests {
    use std::{collections::BTreeMap, sync::Arc};

    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    use crate::{
        account::{Account, AccountKind, AccountWithBalance},
        currency::Currency,
        exchange_rate::{
            ExchangeRateCache, InMemoryRateRepository,
            test_doubles::{FixedClock, StubProvider},
        },
        summary::build_summary,
        transaction::MonthlyTotals,
    };

    fn new_cache(provider: &Arc<StubProvider>) -> ExchangeRateCache {
        ExchangeRateCache::new(
            Arc::new(InMemoryRateRepository::new()),
            provider.clone(),
            Arc::new(FixedClock::new(datetime!(2025-11-01 09:00 UTC))),
        )
    }

    fn account(id: i64, name: &str, currency: Currency, balance: Decimal) -> AccountWithBalance {
        AccountWithBalance {
            account: Account {
                id,
                name: name.to_owned(),
                kind: AccountKind::Savings,
                currency,
                deleted_at: None,
            },
            balance,
        }
    }

    #[tokio::test]
    async fn fetches_once_per_source_currency() {
        let provider = Arc::new(
            StubProvider::with_rates(&[])
                .with_base_rates(Currency::EUR, &[(Currency::USD, dec!(2))])
                .with_base_rates(Currency::GBP, &[(Currency::USD, dec!(4))]),
        );
        let cache = new_cache(&provider);
        let accounts = vec![
            account(1, "Euro", Currency::EUR, dec!(10)),
            account(2, "Dollar", Currency::USD, dec!(5)),
            account(3, "Pound", Currency::GBP, dec!(1)),
        ];
        let totals = MonthlyTotals {
            income_by_currency: BTreeMap::from([(Currency::GBP, dec!(1))]),
            expenses_by_currency: BTreeMap::from([(Currency::EUR, dec!(2))]),
        };

        let summary = build_summary(accounts, &totals, Currency::USD, &cache)
            .await
            .unwrap();

        assert_eq!(provider.calls(), 2);
        assert_eq!(summary.total_assets, dec!(29));
        assert_eq!(summary.monthly_income, dec!(4));
        assert_eq!(summary.monthly_expenses, dec!(4));
        assert_eq!(summary.net_cash_flow, dec!(0));
    }

    #[tokio::test]
    async fn cached_rates_make_no_provider_call() {
        let provider = Arc::new(
            StubProvider::with_rates(&[])
                .with_base_rates(Currency::EUR, &[(Currency::USD, dec!(2))]),
        );
        let cache = new_cache(&provider);
        let accounts = vec![account(1, "Euro", Currency::EUR, dec!(10))];

        build_summary(accounts.clone(), &MonthlyTotals::default(), Currency::USD, &cache)
            .await
            .unwrap();
        let summary = build_summary(accounts, &MonthlyTotals::default(), Currency::USD, &cache)
            .await
            .unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(summary.total_assets, dec!(20));
    }

    #[tokio::test]
    async fn low_value_default_currency_keeps_precision() {
        let provider = Arc::new(StubProvider::failing());
        let cache = new_cache(&provider);
        let accounts = vec![account(1, "Pound", Currency::GBP, dec!(1000))];

        let summary = build_summary(accounts, &MonthlyTotals::default(), Currency::IDR, &cache)
            .await
            .unwrap();

        // The fallback GBP→IDR rate is 16662 / 0.76303 = 21836.625034 at 6 dp.
        assert_eq!(summary.accounts[0].converted_balance, dec!(21836625.03));
        assert_eq!(summary.total_assets, dec!(21836625.03));
    }

    #[tokio::test]
    async fn no_foreign_currencies_makes_no_provider_call() {
        let provider = Arc::new(StubProvider::with_rates(&[]));
        let cache = new_cache(&provider);

        let summary = build_summary(vec![], &MonthlyTotals::default(), Currency::NZD, &cache)
            .await
            .unwrap();

        assert_eq!(provider.calls(), 0);
        assert!(summary.accounts.is_empty());
        assert!(summary.total_assets.is_zero());
    }
}
