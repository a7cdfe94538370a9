//! Defines the core data models and database queries for transactions.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use rust_decimal::Decimal;
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    currency::Currency,
    database_id::{AccountId, TransactionId},
    db::get_decimal,
};

// ============================================================================
// MODELS
// ============================================================================

/// Whether money entered, left or moved between accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Money earned.
    Income,
    /// Money spent.
    Expense,
    /// Money moved between the user's own accounts.
    Transfer,
}

impl TransactionKind {
    fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
            TransactionKind::Transfer => "transfer",
        }
    }

    /// The effect of a transaction of this kind on its account's balance.
    ///
    /// Transfers do not change the balance.
    pub fn signed_amount(self, amount: Decimal) -> Decimal {
        match self {
            TransactionKind::Income => amount,
            TransactionKind::Expense => -amount,
            TransactionKind::Transfer => Decimal::ZERO,
        }
    }
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "income" => Ok(TransactionKind::Income),
            "expense" => Ok(TransactionKind::Expense),
            "transfer" => Ok(TransactionKind::Transfer),
            other => Err(format!("invalid transaction kind \"{other}\"")),
        }
    }
}

impl ToSql for TransactionKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: String| FromSqlError::Other(error.into()))
    }
}

/// An expense, income or transfer recorded against an account.
///
/// To create a new `Transaction`, use [Transaction::build].
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// The account the money moved in or out of.
    pub account_id: AccountId,
    /// The amount of money, always positive. [Transaction::kind] gives the direction.
    pub amount: Decimal,
    /// A text description of what the transaction was for.
    pub description: String,
    /// When the transaction happened.
    pub date: Date,
    /// Whether this is income, an expense or a transfer.
    pub kind: TransactionKind,
    /// When the transaction was soft deleted, if it has been.
    pub deleted_at: Option<OffsetDateTime>,
}

impl Transaction {
    /// Create a new transaction.
    ///
    /// Shortcut for [TransactionBuilder] for discoverability.
    pub fn build(
        account_id: AccountId,
        amount: Decimal,
        date: Date,
        kind: TransactionKind,
    ) -> TransactionBuilder {
        TransactionBuilder {
            account_id,
            amount,
            date,
            kind,
            description: String::new(),
        }
    }
}

/// A builder for creating [Transaction] instances.
///
/// ```ignore
/// use rust_decimal_macros::dec;
/// use time::macros::date;
///
/// let transaction = Transaction::build(1, dec!(45.99), date!(2025-01-15), TransactionKind::Expense)
///     .description("Coffee shop purchase");
/// let transaction = create_transaction(transaction, &connection)?;
/// ```
#[derive(Debug, PartialEq, Clone)]
pub struct TransactionBuilder {
    /// The account the transaction belongs to.
    pub account_id: AccountId,

    /// The amount of money, which is rounded to two decimal places when stored.
    pub amount: Decimal,

    /// The date when the transaction occurred.
    pub date: Date,

    /// Whether this is income, an expense or a transfer.
    pub kind: TransactionKind,

    /// A human-readable description of the transaction, empty by default.
    pub description: String,
}

impl TransactionBuilder {
    /// Set the description for the transaction.
    pub fn description(mut self, description: &str) -> Self {
        description.clone_into(&mut self.description);
        self
    }
}

/// The income and expense totals for a period, each grouped by the currency
/// of the account the transactions belong to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonthlyTotals {
    /// Total income per currency.
    pub income_by_currency: BTreeMap<Currency, Decimal>,
    /// Total expenses per currency, as positive amounts.
    pub expenses_by_currency: BTreeMap<Currency, Decimal>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
            id INTEGER PRIMARY KEY,
            account_id INTEGER NOT NULL,
            amount TEXT NOT NULL,
            description TEXT NOT NULL,
            date TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('income', 'expense', 'transfer')),
            deleted_at TEXT,
            FOREIGN KEY(account_id) REFERENCES account(id) ON UPDATE CASCADE ON DELETE CASCADE
        )",
        (),
    )?;

    // Improve performance of the per month totals.
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_date ON \"transaction\"(date);",
        (),
    )?;

    Ok(())
}

pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        amount: get_decimal(row, 2)?,
        description: row.get(3)?,
        date: row.get(4)?,
        kind: row.get(5)?,
        deleted_at: row.get(6)?,
    })
}

/// Create a new transaction in the database from a builder.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidAccount] if the account ID does not refer to an account,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_transaction(
    builder: TransactionBuilder,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(
            "INSERT INTO \"transaction\" (account_id, amount, description, date, kind)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id, account_id, amount, description, date, kind, deleted_at",
        )?
        .query_row(
            (
                builder.account_id,
                builder.amount.round_dp(2).to_string(),
                &builder.description,
                builder.date,
                builder.kind,
            ),
            map_transaction_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY,
                },
                _,
            ) => Error::InvalidAccount(builder.account_id),
            error => error.into(),
        })?;

    Ok(transaction)
}

/// Get the income and expense totals for non-deleted transactions dated from
/// `start` to `end` inclusive, grouped by the currency of each transaction's
/// account.
///
/// Transfers are not counted.
///
/// # Errors
/// Returns [Error::SqlError] if there is an SQL error.
pub fn get_monthly_totals(
    connection: &Connection,
    start: Date,
    end: Date,
) -> Result<MonthlyTotals, Error> {
    let mut statement = connection.prepare(
        "SELECT account.currency, \"transaction\".kind, \"transaction\".amount
         FROM \"transaction\"
         INNER JOIN account ON account.id = \"transaction\".account_id
         WHERE \"transaction\".deleted_at IS NULL
            AND \"transaction\".kind IN ('income', 'expense')
            AND \"transaction\".date BETWEEN ?1 AND ?2",
    )?;
    let mut rows = statement.query((start, end))?;

    let mut totals = MonthlyTotals::default();

    while let Some(row) = rows.next()? {
        let currency: Currency = row.get(0)?;
        let kind: TransactionKind = row.get(1)?;
        let amount = get_decimal(row, 2)?;

        let bucket = match kind {
            TransactionKind::Income => &mut totals.income_by_currency,
            TransactionKind::Expense => &mut totals.expenses_by_currency,
            TransactionKind::Transfer => continue,
        };

        *bucket.entry(currency).or_default() += amount;
    }

    Ok(totals)
}
