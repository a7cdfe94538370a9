//! The supported currencies, the fallback exchange rates and currency conversion.

use std::{fmt::Display, str::FromStr};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::Error;

macro_rules! currencies {
    ($($code:ident => $name:literal,)+) => {
        /// An ISO 4217 currency code supported by the exchange rate provider.
        #[allow(clippy::upper_case_acronyms)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum Currency {
            $(
                #[doc = $name]
                $code,
            )+
        }

        impl Currency {
            /// Every supported currency in alphabetical order.
            pub const ALL: &[Currency] = &[$(Currency::$code,)+];

            /// The three letter ISO 4217 code, e.g. "NZD".
            pub fn code(self) -> &'static str {
                match self {
                    $(Currency::$code => stringify!($code),)+
                }
            }

            /// The English name of the currency, e.g. "New Zealand Dollar".
            pub fn name(self) -> &'static str {
                match self {
                    $(Currency::$code => $name,)+
                }
            }
        }

        impl FromStr for Currency {
            type Err = Error;

            fn from_str(code: &str) -> Result<Self, Self::Err> {
                match code {
                    $(stringify!($code) => Ok(Currency::$code),)+
                    other => Err(Error::InvalidCurrency(other.to_owned())),
                }
            }
        }
    };
}

currencies! {
    AUD => "Australian Dollar",
    BGN => "Bulgarian Lev",
    BRL => "Brazilian Real",
    CAD => "Canadian Dollar",
    CHF => "Swiss Franc",
    CNY => "Chinese Renminbi Yuan",
    CZK => "Czech Koruna",
    DKK => "Danish Krone",
    EUR => "Euro",
    GBP => "British Pound",
    HKD => "Hong Kong Dollar",
    HUF => "Hungarian Forint",
    IDR => "Indonesian Rupiah",
    ILS => "Israeli New Sheqel",
    INR => "Indian Rupee",
    ISK => "Icelandic Króna",
    JPY => "Japanese Yen",
    KRW => "South Korean Won",
    MXN => "Mexican Peso",
    MYR => "Malaysian Ringgit",
    NOK => "Norwegian Krone",
    NZD => "New Zealand Dollar",
    PHP => "Philippine Peso",
    PLN => "Polish Złoty",
    RON => "Romanian Leu",
    SEK => "Swedish Krona",
    SGD => "Singapore Dollar",
    THB => "Thai Baht",
    TRY => "Turkish Lira",
    USD => "United States Dollar",
    ZAR => "South African Rand",
}

/// The currency used for display when the user has not chosen one.
pub const DEFAULT_CURRENCY: Currency = Currency::USD;

impl Currency {
    /// The hardcoded USD based rate for this currency, i.e. how much of this
    /// currency one US dollar buys.
    ///
    /// Returns `None` for [Currency::USD] since the table is USD based.
    /// The snapshot was taken on 2025-10-31 and is only used when the live
    /// rate provider cannot be reached.
    pub fn fallback_usd_rate(self) -> Option<Decimal> {
        let rate = match self {
            Currency::AUD => dec!(1.5295),
            Currency::BGN => dec!(1.6927),
            Currency::BRL => dec!(5.3809),
            Currency::CAD => dec!(1.4027),
            Currency::CHF => dec!(0.80379),
            Currency::CNY => dec!(7.1162),
            Currency::CZK => dec!(21.055),
            Currency::DKK => dec!(6.4633),
            Currency::EUR => dec!(0.8655),
            Currency::GBP => dec!(0.76303),
            Currency::HKD => dec!(7.7711),
            Currency::HUF => dec!(335.9),
            Currency::IDR => dec!(16662),
            Currency::ILS => dec!(3.2494),
            Currency::INR => dec!(88.72),
            Currency::ISK => dec!(125.32),
            Currency::JPY => dec!(154.18),
            Currency::KRW => dec!(1428.14),
            Currency::MXN => dec!(18.5468),
            Currency::MYR => dec!(4.188),
            Currency::NOK => dec!(10.0818),
            Currency::NZD => dec!(1.7494),
            Currency::PHP => dec!(58.711),
            Currency::PLN => dec!(3.6836),
            Currency::RON => dec!(4.4018),
            Currency::SEK => dec!(9.4556),
            Currency::SGD => dec!(1.3016),
            Currency::THB => dec!(32.325),
            Currency::TRY => dec!(42.049),
            Currency::USD => return None,
            Currency::ZAR => dec!(17.349),
        };

        Some(rate)
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl ToSql for Currency {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for Currency {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: Error| FromSqlError::Other(Box::new(error)))
    }
}

/// Convert `amount` with an exchange rate that has already been resolved for
/// the currency pair, i.e. `amount * rate`.
pub fn convert(amount: Decimal, rate: Decimal) -> Decimal {
    amount * rate
}
