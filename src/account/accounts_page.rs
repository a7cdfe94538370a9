//! Displays accounts, their balances and this month's totals in the default currency.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{FromRef, State},
    response::{IntoResponse, Response},
};
use maud::{Markup, html};
use rusqlite::Connection;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    account::get_accounts_with_balances,
    currency::Currency,
    exchange_rate::ExchangeRateCache,
    html::{
        CARD_STYLE, PAGE_CONTAINER_STYLE, TABLE_CELL_STYLE, TABLE_HEADER_STYLE, TABLE_ROW_STYLE,
        base, format_money,
    },
    settings::get_default_currency,
    summary::{AccountsSummary, ConvertedAccount, build_summary},
    timezone::{get_local_offset, month_to_date},
    transaction::get_monthly_totals,
};

/// The state needed for the [get_accounts_page](crate::account::get_accounts_page) route handler.
#[derive(Clone)]
pub struct AccountsPageState {
    pub db_connection: Arc<Mutex<Connection>>,
    pub exchange_rates: Arc<ExchangeRateCache>,
    /// The local timezone as a canonical timezone name, e.g. "Pacific/Auckland".
    pub local_timezone: String,
}

impl FromRef<AppState> for AccountsPageState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            exchange_rates: state.exchange_rates.clone(),
            local_timezone: state.local_timezone.clone(),
        }
    }
}

fn summary_card(label: &str, amount: Decimal, currency: Currency) -> Markup {
    html!(
        li class=(CARD_STYLE) data-summary-card=(label)
        {
            div class="text-sm text-gray-500 dark:text-gray-400" { (label) }
            div class="text-xl font-semibold tabular-nums" { (format_money(amount, currency)) }
        }
    )
}

fn accounts_view(summary: &AccountsSummary) -> Markup {
    let currency = summary.currency;

    let table_row = |row: &ConvertedAccount| {
        html!(
            tr class=(TABLE_ROW_STYLE)
            {
                th
                    scope="row"
                    class="px-6 py-4 font-medium text-gray-900 whitespace-nowrap dark:text-white"
                {
                    (row.account.name)
                }

                td class=(TABLE_CELL_STYLE) { (row.account.kind) }

                td class=(TABLE_CELL_STYLE) { (row.account.currency) }

                td class="px-6 py-4 text-right tabular-nums"
                {
                    (format_money(row.balance, row.account.currency))
                }

                td class="px-6 py-4 text-right tabular-nums"
                {
                    (format_money(row.converted_balance, currency))
                }
            }
        )
    };

    let content = html!(
        main class=(PAGE_CONTAINER_STYLE)
        {
            section class="space-y-4 w-full lg:max-w-5xl"
            {
                header class="flex justify-between flex-wrap items-end"
                {
                    h1 class="text-xl font-bold" { "Accounts" }

                    span class="text-sm text-gray-500 dark:text-gray-400"
                    {
                        "Amounts shown in " (currency.name()) " (" (currency) ")"
                    }
                }

                ul class="grid grid-cols-2 lg:grid-cols-4 gap-4"
                {
                    (summary_card("Total Assets", summary.total_assets, currency))
                    (summary_card("Monthly Income", summary.monthly_income, currency))
                    (summary_card("Monthly Expenses", summary.monthly_expenses, currency))
                    (summary_card("Net Cash Flow", summary.net_cash_flow, currency))
                }

                section class="w-full overflow-x-auto dark:bg-gray-800"
                {
                    table class="w-full text-sm text-left rtl:text-right
                        text-gray-500 dark:text-gray-400"
                    {
                        thead class=(TABLE_HEADER_STYLE)
                        {
                            tr
                            {
                                th scope="col" class=(TABLE_CELL_STYLE) { "Name" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "Type" }
                                th scope="col" class=(TABLE_CELL_STYLE) { "Currency" }
                                th scope="col" class="px-6 py-3 text-right" { "Balance" }
                                th scope="col" class="px-6 py-3 text-right"
                                {
                                    "Balance (" (currency) ")"
                                }
                            }
                        }

                        tbody
                        {
                            @for row in &summary.accounts {
                                (table_row(row))
                            }

                            @if summary.accounts.is_empty() {
                                tr
                                {
                                    td
                                        colspan="5"
                                        class="px-6 py-4 text-center
                                            text-gray-500 dark:text-gray-400"
                                    {
                                        "No accounts"
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    );

    base("Accounts", &content)
}

/// Renders the accounts page showing all accounts and this month's totals
/// converted into the default currency.
pub async fn get_accounts_page(State(state): State<AccountsPageState>) -> Result<Response, Error> {
    let local_offset = get_local_offset(&state.local_timezone)
        .ok_or_else(|| Error::InvalidTimezoneError(state.local_timezone.clone()))?;
    let today = OffsetDateTime::now_utc().to_offset(local_offset).date();
    let (month_start, month_end) = month_to_date(today);

    let (currency, accounts, totals) = {
        let connection = state
            .db_connection
            .lock()
            .inspect_err(|error| tracing::error!("could not acquire database lock: {error}"))
            .map_err(|_| Error::DatabaseLockError)?;

        let currency = get_default_currency(&connection)
            .inspect_err(|error| tracing::error!("could not get default currency: {error}"))?;
        let accounts = get_accounts_with_balances(&connection)
            .inspect_err(|error| tracing::error!("could not get accounts: {error}"))?;
        let totals = get_monthly_totals(&connection, month_start, month_end)
            .inspect_err(|error| tracing::error!("could not get monthly totals: {error}"))?;

        (currency, accounts, totals)
    };

    let summary = build_summary(accounts, &totals, currency, &state.exchange_rates)
        .await
        .inspect_err(|error| tracing::error!("could not build accounts summary: {error}"))?;

    Ok(accounts_view(&summary).into_response())
}

#[cfg(test)]
mod accounts_view_tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use scraper::{ElementRef, Html, Selector};

    use crate::{
        account::{Account, AccountKind, accounts_page::accounts_view},
        currency::Currency,
        html::format_money,
        summary::{AccountsSummary, ConvertedAccount},
        test_utils::assert_valid_html,
    };

    fn empty_summary(currency: Currency) -> AccountsSummary {
        AccountsSummary {
            currency,
            accounts: vec![],
            total_assets: Decimal::ZERO,
            monthly_income: Decimal::ZERO,
            monthly_expenses: Decimal::ZERO,
            net_cash_flow: Decimal::ZERO,
        }
    }

    #[test]
    fn renders_summary_cards() {
        let summary = AccountsSummary {
            total_assets: dec!(1500),
            monthly_income: dec!(200),
            monthly_expenses: dec!(50.5),
            net_cash_flow: dec!(149.5),
            ..empty_summary(Currency::NZD)
        };

        let html = Html::parse_document(&accounts_view(&summary).into_string());

        assert_valid_html(&html);
        assert_card_amount(&html, "Total Assets", "1,500.00 NZD");
        assert_card_amount(&html, "Monthly Income", "200.00 NZD");
        assert_card_amount(&html, "Monthly Expenses", "50.50 NZD");
        assert_card_amount(&html, "Net Cash Flow", "149.50 NZD");
    }

    #[test]
    fn renders_native_and_converted_balances() {
        let summary = AccountsSummary {
            accounts: vec![ConvertedAccount {
                account: Account {
                    id: 1,
                    name: "Euro Savings".to_owned(),
                    kind: AccountKind::Savings,
                    currency: Currency::EUR,
                    deleted_at: None,
                },
                balance: dec!(90),
                converted_balance: dec!(100),
            }],
            total_assets: dec!(100),
            ..empty_summary(Currency::USD)
        };

        let html = Html::parse_document(&accounts_view(&summary).into_string());

        assert_valid_html(&html);
        let rows = must_get_table_rows(&html, 1);
        let name = rows[0]
            .select(&Selector::parse("th").unwrap())
            .next()
            .expect("Could not find row header")
            .text()
            .collect::<String>();
        let cells: Vec<String> = rows[0]
            .select(&Selector::parse("td").unwrap())
            .map(|cell| cell.text().collect::<String>().trim().to_owned())
            .collect();
        assert_eq!(name.trim(), "Euro Savings");
        assert_eq!(
            cells,
            vec![
                "Savings".to_owned(),
                "EUR".to_owned(),
                format_money(dec!(90), Currency::EUR),
                format_money(dec!(100), Currency::USD),
            ]
        );
    }

    #[test]
    fn renders_no_accounts_row() {
        let html =
            Html::parse_document(&accounts_view(&empty_summary(Currency::USD)).into_string());

        assert_valid_html(&html);
        let rows = must_get_table_rows(&html, 1);
        let cell = rows[0]
            .select(&Selector::parse("td[colspan='5']").unwrap())
            .next()
            .expect("Could not find table cell with colspan='5'");
        assert_eq!(cell.text().collect::<String>().trim(), "No accounts");
    }

    #[track_caller]
    fn must_get_table_rows(html: &Html, want_row_count: usize) -> Vec<ElementRef<'_>> {
        let table_row_selector = Selector::parse("table tbody tr").unwrap();
        let table_rows = html.select(&table_row_selector).collect::<Vec<_>>();

        assert_eq!(
            table_rows.len(),
            want_row_count,
            "want {want_row_count} table row, got {}",
            table_rows.len()
        );

        table_rows
    }

    #[track_caller]
    fn assert_card_amount(html: &Html, label: &str, want_amount: &str) {
        let selector = Selector::parse(&format!("li[data-summary-card='{label}']")).unwrap();
        let card = html
            .select(&selector)
            .next()
            .unwrap_or_else(|| panic!("Could not find summary card '{label}'"));
        let text = card.text().collect::<String>();

        assert!(
            text.contains(want_amount),
            "want card '{label}' to contain {want_amount}, got {text:?}"
        );
    }
}
