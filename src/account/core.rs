use std::{collections::HashMap, fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::{
    Error,
    currency::Currency,
    database_id::AccountId,
    db::get_decimal,
    transaction::TransactionKind,
};

/// The type of bank account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    /// An everyday transaction account.
    Checking,
    /// An account for saving money.
    Savings,
}

impl AccountKind {
    fn as_str(self) -> &'static str {
        match self {
            AccountKind::Checking => "checking",
            AccountKind::Savings => "savings",
        }
    }
}

impl Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountKind::Checking => f.write_str("Checking"),
            AccountKind::Savings => f.write_str("Savings"),
        }
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "checking" => Ok(AccountKind::Checking),
            "savings" => Ok(AccountKind::Savings),
            other => Err(format!("invalid account kind \"{other}\"")),
        }
    }
}

impl ToSql for AccountKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AccountKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: String| FromSqlError::Other(error.into()))
    }
}

/// A bank account that holds money in a single currency.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// The id for the account.
    pub id: AccountId,
    /// The name of the account, unique across all accounts.
    pub name: String,
    /// What the account is used for.
    pub kind: AccountKind,
    /// The currency that the account's transactions are in.
    pub currency: Currency,
    /// When the account was soft deleted, if it has been.
    pub deleted_at: Option<OffsetDateTime>,
}

/// An account along with its balance in the account's own currency.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountWithBalance {
    /// The account.
    pub account: Account,
    /// Income minus expenses over the account's non-deleted transactions.
    pub balance: Decimal,
}

pub fn create_account_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS account (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL CHECK (kind IN ('checking', 'savings')),
            currency TEXT NOT NULL,
            deleted_at TEXT
        )",
        (),
    )?;

    Ok(())
}

pub fn map_row_to_account(row: &Row) -> Result<Account, rusqlite::Error> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        currency: row.get(3)?,
        deleted_at: row.get(4)?,
    })
}

/// Create a new account.
///
/// # Errors
/// Returns [Error::DuplicateAccountName] if an account called `name` already
/// exists, or [Error::SqlError] if there is some other SQL error.
pub fn create_account(
    name: &str,
    kind: AccountKind,
    currency: Currency,
    connection: &Connection,
) -> Result<Account, Error> {
    connection
        .prepare(
            "INSERT INTO account (name, kind, currency) VALUES (?1, ?2, ?3)
             RETURNING id, name, kind, currency, deleted_at",
        )?
        .query_row((name, kind, currency), map_row_to_account)
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
                },
                _,
            ) => Error::DuplicateAccountName(name.to_owned()),
            error => error.into(),
        })
}

/// Get all accounts that have not been deleted, ordered by name, along with
/// their balances.
///
/// Income adds to the balance and expenses subtract from it. Transfers and
/// deleted transactions are ignored. An account without transactions has a
/// balance of zero.
///
/// # Errors
/// Returns [Error::SqlError] if there is an SQL error.
pub fn get_accounts_with_balances(
    connection: &Connection,
) -> Result<Vec<AccountWithBalance>, Error> {
    let accounts = connection
        .prepare(
            "SELECT id, name, kind, currency, deleted_at FROM account
             WHERE deleted_at IS NULL
             ORDER BY name ASC",
        )?
        .query_map([], map_row_to_account)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut balances: HashMap<AccountId, Decimal> = HashMap::new();
    let mut statement = connection.prepare(
        "SELECT account_id, kind, amount FROM \"transaction\" WHERE deleted_at IS NULL",
    )?;
    let mut rows = statement.query([])?;

    while let Some(row) = rows.next()? {
        let account_id: AccountId = row.get(0)?;
        let kind: TransactionKind = row.get(1)?;
        let amount = get_decimal(row, 2)?;

        *balances.entry(account_id).or_default() += kind.signed_amount(amount);
    }

    Ok(accounts
        .into_iter()
        .map(|account| AccountWithBalance {
            balance: balances.get(&account.id).copied().unwrap_or_default(),
            account,
        })
        .collect())
}
