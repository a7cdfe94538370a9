//! Transactions recorded against accounts and the per-currency monthly totals.

mod core;

pub use core::{
    MonthlyTotals, Transaction, TransactionBuilder, TransactionKind, create_transaction,
    create_transaction_table, get_monthly_totals,
};
